mod image_sequence;

pub use image_sequence::{ImageSequenceBackend, ImageSequenceSink, ImageSequenceSource};

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use visage_types::Frame;

/// What to do with the source audio track when muxing the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioPolicy {
    #[default]
    Copy,
    Skip,
}

/// Demuxer contract. Real containers are decoded by an external wrapper
/// around the system video library; the engine only consumes this trait.
pub trait MediaSource: Send {
    fn frame_count(&self) -> u64;
    fn fps(&self) -> f64;
    /// (width, height)
    fn dimensions(&self) -> (usize, usize);
    fn seek(&mut self, frame_index: u64) -> Result<(), EngineError>;
    fn read_frame(&mut self) -> Result<Option<Frame>, EngineError>;
}

/// Muxer contract. `finalize` runs the audio policy (remux the source
/// track on `Copy`) and makes the output durable.
pub trait MediaSink: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), EngineError>;
    fn frames_written(&self) -> u64;
    fn finalize(self: Box<Self>, audio: AudioPolicy) -> Result<(), EngineError>;
}

/// Factory over the two traits so the task runner stays agnostic of the
/// container format.
pub trait MediaBackend: Send + Sync {
    /// Whether `path` looks like a video this backend can open.
    fn probe(&self, path: &Path) -> bool;
    fn open_source(&self, path: &Path) -> Result<Box<dyn MediaSource>, EngineError>;
    fn create_sink(
        &self,
        path: &Path,
        fps: f64,
        dimensions: (usize, usize),
    ) -> Result<Box<dyn MediaSink>, EngineError>;
    /// Reopen a partially written sink for checkpoint resume. Returns the
    /// sink plus the number of frames already written.
    fn resume_sink(&self, path: &Path) -> Result<(Box<dyn MediaSink>, u64), EngineError>;
    /// Atomically move the finalized temp output into place.
    fn commit(&self, temp_path: &Path, final_path: &Path) -> Result<(), EngineError>;
}
