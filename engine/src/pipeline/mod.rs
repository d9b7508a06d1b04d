mod queue;

pub use queue::FrameQueue;

use crate::processors::FrameProcessor;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use task_manager::{Task, TaskManager, TaskState};
use tokio::sync::Mutex;
use visage_types::FrameData;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub worker_thread_count: usize,
    pub max_queue_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_thread_count: 2,
            max_queue_size: 16,
        }
    }
}

/// One stage worker: pop, process, push. A popped EOS sentinel is handed to
/// the sibling workers via the input queue; the last worker of the stage
/// forwards it downstream so every stage drains exactly once.
struct StageWorker {
    stage_name: String,
    worker_index: usize,
    input: Arc<FrameQueue>,
    output: Arc<FrameQueue>,
    processor: Arc<dyn FrameProcessor>,
    remaining_workers: Arc<AtomicUsize>,
}

#[async_trait]
impl Task for StageWorker {
    fn task_name(&self) -> String {
        format!("{}-worker-{}", self.stage_name, self.worker_index)
    }

    async fn run(&self) -> TaskState {
        let Some(frame) = self.input.pop().await else {
            return TaskState::Break;
        };

        if frame.is_end_of_stream {
            let left = self.remaining_workers.fetch_sub(1, Ordering::SeqCst) - 1;
            if left == 0 {
                self.output.push(frame).await;
            } else {
                self.input.push(frame).await;
            }
            return TaskState::Break;
        }

        let sequence_id = frame.sequence_id;
        match self.processor.process(frame).await {
            Ok(processed) => {
                if !self.output.push(processed).await {
                    return TaskState::Break;
                }
            }
            Err(e) => {
                // Recoverable conditions are absorbed inside the stage; an
                // error here lost the frame pixels, so a failed placeholder
                // keeps the sequence dense for the reorder buffer.
                tracing::warn!(stage = %self.stage_name, sequence_id, "frame failed: {e}");
                let placeholder = FrameData {
                    sequence_id,
                    failed: true,
                    ..Default::default()
                };
                if !self.output.push(placeholder).await {
                    return TaskState::Break;
                }
            }
        }
        TaskState::Continue
    }
}

/// Staged, back-pressured processing graph:
///
/// input queue → stage₁ workers → queue → … → stageₙ workers → final queue.
///
/// Frames leave `pop_frame` in strict sequence-id order; a reorder buffer
/// keyed by sequence id absorbs worker interleaving.
pub struct Pipeline {
    config: PipelineConfig,
    processors: Vec<Arc<dyn FrameProcessor>>,
    queues: Vec<Arc<FrameQueue>>,
    task_manager: TaskManager,
    started: AtomicBool,
    reorder: Mutex<ReorderBuffer>,
}

struct ReorderBuffer {
    next_sequence_id: u64,
    pending: BTreeMap<u64, FrameData>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, processors: Vec<Arc<dyn FrameProcessor>>) -> Self {
        let queue_count = processors.len() + 1;
        let queues = (0..queue_count)
            .map(|_| Arc::new(FrameQueue::new(config.max_queue_size)))
            .collect();
        Self {
            config,
            processors,
            queues,
            task_manager: TaskManager::new(),
            started: AtomicBool::new(false),
            reorder: Mutex::new(ReorderBuffer {
                next_sequence_id: 0,
                pending: BTreeMap::new(),
            }),
        }
    }

    /// First sequence id the consumer should expect; used when resuming a
    /// task from a checkpoint.
    pub fn set_first_sequence_id(&mut self, sequence_id: u64) {
        self.reorder.get_mut().next_sequence_id = sequence_id;
    }

    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        for (stage_index, processor) in self.processors.iter().enumerate() {
            let remaining = Arc::new(AtomicUsize::new(self.config.worker_thread_count));
            for worker_index in 0..self.config.worker_thread_count {
                let worker = StageWorker {
                    stage_name: processor.name(),
                    worker_index,
                    input: Arc::clone(&self.queues[stage_index]),
                    output: Arc::clone(&self.queues[stage_index + 1]),
                    processor: Arc::clone(processor),
                    remaining_workers: Arc::clone(&remaining),
                };
                self.task_manager.spawn_task_loop(worker).await;
            }
        }
        tracing::debug!(
            stages = self.processors.len(),
            workers_per_stage = self.config.worker_thread_count,
            "pipeline started"
        );
    }

    pub async fn push_frame(&self, frame: FrameData) -> bool {
        self.queues[0].push(frame).await
    }

    /// Next frame in sequence order, or `None` once the pipeline shuts
    /// down. EOS frames are returned like any other so callers can detect
    /// the end of the stream.
    pub async fn pop_frame(&self) -> Option<FrameData> {
        let mut reorder = self.reorder.lock().await;
        loop {
            let next_id = reorder.next_sequence_id;
            if let Some(frame) = reorder.pending.remove(&next_id) {
                reorder.next_sequence_id += 1;
                return Some(frame);
            }
            let frame = self.final_queue().pop().await?;
            if frame.is_end_of_stream {
                // EOS carries the highest id of the task; hold it back until
                // every preceding frame has been delivered.
                if reorder.pending.is_empty() && frame.sequence_id <= reorder.next_sequence_id {
                    return Some(frame);
                }
                reorder.pending.insert(frame.sequence_id, frame);
                continue;
            }
            reorder.pending.insert(frame.sequence_id, frame);
        }
    }

    fn final_queue(&self) -> &Arc<FrameQueue> {
        self.queues.last().expect("pipeline always has queues")
    }

    pub fn stage_count(&self) -> usize {
        self.processors.len()
    }

    /// Cooperative shutdown: every queue unblocks, workers observe `None`
    /// and exit, then the task set drains.
    pub async fn stop(&self) {
        for queue in &self.queues {
            queue.shutdown();
        }
        self.task_manager.cancel_all();
        self.task_manager.wait().await;
    }

    /// Wait for workers to finish after the EOS sentinel has drained.
    pub async fn join(&self) {
        self.task_manager.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use pretty_assertions::assert_eq;

    struct PassThrough;

    #[async_trait]
    impl FrameProcessor for PassThrough {
        fn name(&self) -> String {
            "pass_through".to_string()
        }

        async fn process(&self, frame: FrameData) -> Result<FrameData, EngineError> {
            Ok(frame)
        }
    }

    /// Sleeps a pseudo-random amount so worker completion order scrambles.
    struct Jitter;

    #[async_trait]
    impl FrameProcessor for Jitter {
        fn name(&self) -> String {
            "jitter".to_string()
        }

        async fn process(&self, frame: FrameData) -> Result<FrameData, EngineError> {
            let delay = (frame.sequence_id * 7919) % 5;
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            Ok(frame)
        }
    }

    #[tokio::test]
    async fn frames_leave_in_sequence_order_with_many_workers() {
        let pipeline = Pipeline::new(
            PipelineConfig {
                worker_thread_count: 4,
                max_queue_size: 8,
            },
            vec![Arc::new(Jitter) as Arc<dyn FrameProcessor>],
        );
        pipeline.start().await;

        let total = 60u64;
        for sequence_id in 0..total {
            let frame = FrameData {
                sequence_id,
                ..Default::default()
            };
            assert!(pipeline.push_frame(frame).await);
        }
        assert!(pipeline.push_frame(FrameData::end_of_stream(total)).await);

        let mut seen = Vec::new();
        loop {
            let frame = pipeline.pop_frame().await.expect("stream should not cut off");
            if frame.is_end_of_stream {
                break;
            }
            seen.push(frame.sequence_id);
        }
        let expected: Vec<u64> = (0..total).collect();
        assert_eq!(seen, expected);
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn eos_traverses_every_stage() {
        let pipeline = Pipeline::new(
            PipelineConfig {
                worker_thread_count: 3,
                max_queue_size: 4,
            },
            vec![
                Arc::new(PassThrough) as Arc<dyn FrameProcessor>,
                Arc::new(PassThrough) as Arc<dyn FrameProcessor>,
                Arc::new(PassThrough) as Arc<dyn FrameProcessor>,
            ],
        );
        pipeline.start().await;

        pipeline
            .push_frame(FrameData {
                sequence_id: 0,
                ..Default::default()
            })
            .await;
        pipeline.push_frame(FrameData::end_of_stream(1)).await;

        assert_eq!(pipeline.pop_frame().await.unwrap().sequence_id, 0);
        let eos = pipeline.pop_frame().await.unwrap();
        assert!(eos.is_end_of_stream);
        // All workers terminated on their own after the sentinel.
        pipeline.join().await;
    }

    #[tokio::test]
    async fn stop_unblocks_a_waiting_consumer() {
        let pipeline = Arc::new(Pipeline::new(
            PipelineConfig::default(),
            vec![Arc::new(PassThrough) as Arc<dyn FrameProcessor>],
        ));
        pipeline.start().await;

        let consumer = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.pop_frame().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        pipeline.stop().await;
        assert!(consumer.await.unwrap().is_none());
    }
}
