pub mod checkpoint;
pub mod metrics;
pub mod runner;
pub mod shutdown;

pub use checkpoint::CheckpointManager;
pub use metrics::{MetricsCollector, StepTimer};
pub use runner::{exit_code, ProgressCallback, TaskProgress, TaskReport, TaskRunner};
pub use shutdown::{ShutdownHandler, ShutdownState, DEFAULT_SHUTDOWN_TIMEOUT};
