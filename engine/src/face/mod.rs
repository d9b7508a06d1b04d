pub mod analyser;
pub mod classifier;
pub mod detector;
pub mod helper;
pub mod landmarker;
pub mod recognizer;
pub mod registry;
pub mod selector;
pub mod store;

pub use analyser::{AnalyserConfig, AnalyserMode, AnalyserOptions, FaceAnalyser};
pub use registry::FaceModelRegistry;
pub use store::{FaceStore, FaceStoreOptions, HashStrategy};
