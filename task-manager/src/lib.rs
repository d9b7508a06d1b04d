use log::info;
use tokio::{select, signal};
/// TaskManager spawns long running "tasks" that expect to be run in a loop
/// and breaks the loop when one of the following happens:
///
/// - the task itself reports `TaskState::Break`
/// - SIGterm or SIGint is received
/// - the shared cancellation token is triggered
///
/// It extends `tokio_util::task::TaskTracker` so every loop is tracked and
/// tasks get the chance to perform cleanup before ending.
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Whether a task loop should keep running after one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Continue,
    Break,
}

#[async_trait::async_trait]
pub trait Task {
    fn task_name(&self) -> String;

    /// One iteration of the loop. Returning `Break` ends the loop.
    async fn run(&self) -> TaskState;
}

#[derive(Debug, Clone)]
pub struct TaskManager {
    cancellation_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            cancellation_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Child manager sharing this manager's cancellation scope.
    pub fn child(&self) -> Self {
        Self {
            cancellation_token: self.cancellation_token.child_token(),
            task_tracker: TaskTracker::new(),
        }
    }

    pub async fn spawn_task_loop<T>(&self, task: T)
    where
        T: Task + Send + Sync + 'static,
    {
        let task_name = task.task_name();
        let cancellation_token = self.cancellation_token.clone();
        self.task_tracker.spawn(async move {
            loop {
                select! {
                    // Shutdown signals are checked first so a saturated task
                    // cannot starve cancellation.
                    biased;

                    _ = cancellation_token.cancelled() => {
                        info!("Received cancellation token signal, breaking [{task_name}] task loop");
                        break;
                    }
                    state = task.run() => {
                        if let TaskState::Break = state {
                            log::debug!("Task [{task_name}] completed its loop");
                            break;
                        }
                    }
                }
            }
        });
        log::debug!("Spawned task loop");
    }

    /// Spawn a loop that additionally breaks on Ctrl-C.
    pub async fn spawn_signal_aware_task_loop<T>(&self, task: T)
    where
        T: Task + Send + Sync + 'static,
    {
        let task_name = task.task_name();
        let cancellation_token = self.cancellation_token.clone();
        self.task_tracker.spawn(async move {
            loop {
                select! {
                    biased;

                    _ = signal::ctrl_c() => {
                        info!("Received Ctrl-C signal, cancelling [{task_name}] task");
                        break;
                    }
                    _ = cancellation_token.cancelled() => {
                        info!("Received cancellation token signal, cancelling [{task_name}] task");
                        break;
                    }
                    state = task.run() => {
                        if let TaskState::Break = state {
                            break;
                        }
                    }
                }
            }
        });
    }

    pub fn cancel_all(&self) {
        self.cancellation_token.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub async fn wait(&self) {
        self.task_tracker.close();
        self.task_tracker.wait().await
    }

    pub fn task_count(&self) -> usize {
        self.task_tracker.len()
    }
}
