use tokio::select;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use visage_types::FrameData;

/// Bounded multi-producer multi-consumer frame queue.
///
/// `push` blocks on a full queue (back-pressure), `pop` on an empty one.
/// `shutdown` unblocks every waiter: pushes start reporting `false`, pops
/// return `None`, which workers treat as termination.
pub struct FrameQueue {
    sender: mpsc::Sender<FrameData>,
    receiver: Mutex<mpsc::Receiver<FrameData>>,
    shutdown: CancellationToken,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(receiver),
            shutdown: CancellationToken::new(),
        }
    }

    pub async fn push(&self, frame: FrameData) -> bool {
        select! {
            // Shutdown wins over a send slot becoming available.
            biased;

            _ = self.shutdown.cancelled() => false,
            result = self.sender.send(frame) => result.is_ok(),
        }
    }

    pub async fn pop(&self) -> Option<FrameData> {
        // Consumers serialize on the receiver; waiters observe shutdown as
        // soon as the current holder releases.
        let mut receiver = select! {
            biased;

            _ = self.shutdown.cancelled() => return None,
            guard = self.receiver.lock() => guard,
        };
        select! {
            biased;

            _ = self.shutdown.cancelled() => None,
            frame = receiver.recv() => frame,
        }
    }

    pub fn try_pop(&self) -> Option<FrameData> {
        if self.shutdown.is_cancelled() {
            return None;
        }
        self.receiver.try_lock().ok()?.try_recv().ok()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn push_then_pop_preserves_fifo_order() {
        let queue = FrameQueue::new(4);
        assert!(queue.push(FrameData::end_of_stream(1)).await);
        assert!(queue.push(FrameData::end_of_stream(2)).await);
        assert_eq!(queue.pop().await.unwrap().sequence_id, 1);
        assert_eq!(queue.pop().await.unwrap().sequence_id, 2);
    }

    #[tokio::test]
    async fn try_pop_never_blocks() {
        let queue = FrameQueue::new(2);
        assert!(queue.try_pop().is_none());
        queue.push(FrameData::end_of_stream(5)).await;
        assert_eq!(queue.try_pop().unwrap().sequence_id, 5);
    }

    #[tokio::test]
    async fn full_queue_applies_back_pressure() {
        let queue = Arc::new(FrameQueue::new(1));
        assert!(queue.push(FrameData::end_of_stream(1)).await);

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(FrameData::end_of_stream(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.pop().await.unwrap().sequence_id, 1);
        assert!(producer.await.unwrap());
    }

    #[tokio::test]
    async fn shutdown_unblocks_waiting_consumers() {
        let queue = Arc::new(FrameQueue::new(1));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shutdown();
        assert!(consumer.await.unwrap().is_none());
        assert!(queue.is_shutdown());
        assert!(!queue.push(FrameData::end_of_stream(1)).await);
    }
}
