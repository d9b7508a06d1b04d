pub mod checkpoint;
pub mod errors;
pub mod face;
pub mod frame;
pub mod geometry;
pub mod model;

pub use checkpoint::CheckpointRecord;
pub use errors::ErrorCode;
pub use face::{AgeRange, Embedding, Face, Gender, Landmarks, Race};
pub use frame::{Frame, FrameData, MetadataValue};
pub use geometry::{BBox, Point2};
pub use model::{ModelInfo, ModelKind};
