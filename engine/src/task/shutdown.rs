use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Graceful-shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Requested,
    Completed,
    TimedOut,
}

impl ShutdownState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ShutdownState::Requested,
            2 => ShutdownState::Completed,
            3 => ShutdownState::TimedOut,
            _ => ShutdownState::Running,
        }
    }
}

/// Captures SIGINT/SIGTERM, runs the shutdown callback on its own task and
/// enforces the graceful deadline with a watchdog.
///
/// `Running → Requested → Completed | TimedOut`; past the deadline the
/// timeout callback fires (typically a hard exit).
pub struct ShutdownHandler {
    state: Arc<AtomicU8>,
    signal: Arc<Notify>,
    installed: AtomicBool,
    timeout: Duration,
    cancellation_token: CancellationToken,
}

impl ShutdownHandler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(0)),
            signal: Arc::new(Notify::new()),
            installed: AtomicBool::new(false),
            timeout,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Token cancelled as soon as shutdown is requested; producers and
    /// consumers select on it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.state() != ShutdownState::Running
    }

    /// Programmatic trigger, equivalent to receiving a signal.
    pub fn request_shutdown(&self) {
        self.signal.notify_waiters();
        self.signal.notify_one();
    }

    /// The shutdown callback reports completion through this.
    pub fn mark_completed(&self) {
        self.state.store(2, Ordering::Release);
        tracing::info!("shutdown marked as completed");
    }

    /// Install the signal watchdog. Idempotent: the second install is
    /// ignored with a warning.
    pub fn install<F, T>(self: &Arc<Self>, on_shutdown: F, on_timeout: T)
    where
        F: FnOnce() + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        if self.installed.swap(true, Ordering::SeqCst) {
            tracing::warn!("shutdown handler already installed, ignoring duplicate call");
            return;
        }

        let handler = Arc::clone(self);
        tokio::spawn(async move {
            handler.wait_for_signal().await;

            // Running -> Requested; a second signal changes nothing.
            if handler
                .state
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            tracing::warn!("shutdown signal received, initiating graceful shutdown");
            handler.cancellation_token.cancel();

            // The callback runs on its own task so the watchdog can keep
            // polling the deadline even if it stalls.
            tokio::spawn(async move { on_shutdown() });

            let deadline = tokio::time::Instant::now() + handler.timeout;
            loop {
                if handler.state() == ShutdownState::Completed {
                    tracing::info!("graceful shutdown completed");
                    return;
                }
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }

            if handler
                .state
                .compare_exchange(1, 3, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                tracing::error!(
                    timeout_s = handler.timeout.as_secs(),
                    "graceful shutdown timed out, forcing termination"
                );
                on_timeout();
            }
        });
    }

    #[cfg(unix)]
    async fn wait_for_signal(&self) {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("sigterm handler can always be installed");
        select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("SIGINT received");
            }
            _ = sigterm.recv() => {
                tracing::warn!("SIGTERM received");
            }
            _ = self.signal.notified() => {
                tracing::debug!("programmatic shutdown requested");
            }
        }
    }

    #[cfg(not(unix))]
    async fn wait_for_signal(&self) {
        select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("console interrupt received");
            }
            _ = self.signal.notified() => {
                tracing::debug!("programmatic shutdown requested");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn requested_then_completed_within_deadline() {
        let handler = Arc::new(ShutdownHandler::new(Duration::from_secs(2)));
        let calls = Arc::new(AtomicUsize::new(0));

        let callback_handler = Arc::clone(&handler);
        let callback_calls = Arc::clone(&calls);
        handler.install(
            move || {
                callback_calls.fetch_add(1, Ordering::SeqCst);
                callback_handler.mark_completed();
            },
            || panic!("timeout must not fire"),
        );

        assert_eq!(handler.state(), ShutdownState::Running);
        handler.request_shutdown();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.state(), ShutdownState::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handler.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn stalled_callback_times_out() {
        let handler = Arc::new(ShutdownHandler::new(Duration::from_millis(100)));
        let timed_out = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&timed_out);
        handler.install(
            || { /* never reports completion */ },
            move || {
                flag.store(true, Ordering::SeqCst);
            },
        );
        handler.request_shutdown();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(handler.state(), ShutdownState::TimedOut);
        assert!(timed_out.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn double_install_is_ignored() {
        let handler = Arc::new(ShutdownHandler::new(Duration::from_secs(1)));
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let handler_for_callback = Arc::clone(&handler);
            let calls_for_callback = Arc::clone(&calls);
            handler.install(
                move || {
                    calls_for_callback.fetch_add(1, Ordering::SeqCst);
                    handler_for_callback.mark_completed();
                },
                || {},
            );
        }
        handler.request_shutdown();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
