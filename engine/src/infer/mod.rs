pub mod pool;
pub mod registry;
pub mod session;

pub use pool::{PoolConfig, PoolStats, SessionPool};
pub use registry::{SessionKey, SessionRegistry};
pub use session::{InferenceSession, Provider, SessionOptions};
