pub mod repository;

pub use repository::{DownloadStrategy, ModelRepository};
