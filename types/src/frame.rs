use crate::face::{Embedding, Face};
use ndarray::Array3;
use std::collections::HashMap;

/// A decoded video or image frame: 8-bit BGR pixels in HWC layout.
pub type Frame = Array3<u8>;

/// Untyped per-frame state carried between pipeline stages.
#[derive(Debug, Clone)]
pub enum MetadataValue {
    Embedding(Embedding),
    Faces(Vec<Face>),
    Image(Frame),
    Text(String),
    Number(f64),
    Flag(bool),
}

impl MetadataValue {
    pub fn as_embedding(&self) -> Option<&Embedding> {
        match self {
            MetadataValue::Embedding(embedding) => Some(embedding),
            _ => None,
        }
    }

    pub fn as_faces(&self) -> Option<&[Face]> {
        match self {
            MetadataValue::Faces(faces) => Some(faces),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&Frame> {
        match self {
            MetadataValue::Image(image) => Some(image),
            _ => None,
        }
    }
}

/// Standard metadata key for the averaged source identity embedding.
pub const SOURCE_EMBEDDING_KEY: &str = "source_embedding";

/// Standard metadata key for the pristine decoded frame, kept for stages
/// that compare against the unprocessed pixels (expression restore).
pub const ORIGINAL_IMAGE_KEY: &str = "original_image";

/// The unit of work flowing through the processor pipeline.
///
/// Sequence ids are dense and unique within one task. The end-of-stream
/// sentinel carries no image and is forwarded through every stage so that
/// downstream workers can terminate.
#[derive(Debug, Clone, Default)]
pub struct FrameData {
    pub sequence_id: u64,
    pub image: Option<Frame>,
    pub metadata: HashMap<String, MetadataValue>,
    pub is_end_of_stream: bool,
    /// A recoverable per-frame error left this frame unprocessed.
    pub skipped: bool,
    /// A stage failed on this frame; it was forwarded unchanged.
    pub failed: bool,
}

impl FrameData {
    pub fn new(sequence_id: u64, image: Frame) -> Self {
        Self {
            sequence_id,
            image: Some(image),
            ..Default::default()
        }
    }

    pub fn end_of_stream(sequence_id: u64) -> Self {
        Self {
            sequence_id,
            is_end_of_stream: true,
            ..Default::default()
        }
    }

    pub fn source_embedding(&self) -> Option<&Embedding> {
        self.metadata
            .get(SOURCE_EMBEDDING_KEY)
            .and_then(MetadataValue::as_embedding)
    }

    pub fn set_source_embedding(&mut self, embedding: Embedding) {
        self.metadata.insert(
            SOURCE_EMBEDDING_KEY.to_string(),
            MetadataValue::Embedding(embedding),
        );
    }

    pub fn original_image(&self) -> Option<&Frame> {
        self.metadata
            .get(ORIGINAL_IMAGE_KEY)
            .and_then(MetadataValue::as_image)
    }

    pub fn set_original_image(&mut self, image: Frame) {
        self.metadata
            .insert(ORIGINAL_IMAGE_KEY.to_string(), MetadataValue::Image(image));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_of_stream_frames_carry_no_image() {
        let eos = FrameData::end_of_stream(42);
        assert!(eos.is_end_of_stream);
        assert!(eos.image.is_none());
        assert_eq!(eos.sequence_id, 42);
    }

    #[test]
    fn source_embedding_round_trips_through_metadata() {
        let mut frame = FrameData::end_of_stream(0);
        frame.set_source_embedding(vec![0.5; 512]);
        assert_eq!(frame.source_embedding().map(Vec::len), Some(512));
    }
}
