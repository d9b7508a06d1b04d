use super::FrameProcessor;
use crate::error::EngineError;
use crate::face::helper::{self, WarpTemplate};
use crate::face::{AnalyserOptions, FaceAnalyser};
use crate::mask::{MaskOptions, MaskerHub};
use crate::vision;
use async_trait::async_trait;
use std::sync::Arc;
use visage_types::{Frame, FrameData};

/// A model operating on one aligned face crop. The adapter supplies the
/// shared outer loop: warp in, apply, mask, paste back, blend.
pub trait CropProcessor: Send + Sync {
    fn name(&self) -> String;
    fn warp_template(&self) -> WarpTemplate;
    /// (width, height) of the canonical crop.
    fn crop_size(&self) -> (usize, usize);
    fn apply(&self, crop: &Frame, source_embedding: Option<&[f32]>) -> Result<Frame, EngineError>;
}

/// Generic face-processor stage:
///
/// ```text
/// for each selected face:
///     (crop, affine) = warp_face_by_landmark5(image, face, template, size)
///     processed      = processor.apply(crop, source_embedding)
///     mask           = masker_hub.compose(...)
///     output         = paste_back(output, processed, mask, affine)
/// output = blend(original, output, face_blend)
/// ```
///
/// Frames with no detectable face pass through unchanged and are counted as
/// skipped; that condition never fails a task.
pub struct FaceProcessorAdapter<P: CropProcessor> {
    processor: Arc<P>,
    analyser: Arc<FaceAnalyser>,
    masker_hub: Arc<MaskerHub>,
    analyser_options: AnalyserOptions,
    mask_options: MaskOptions,
    face_blend: u32,
}

impl<P: CropProcessor> FaceProcessorAdapter<P> {
    pub fn new(
        processor: Arc<P>,
        analyser: Arc<FaceAnalyser>,
        masker_hub: Arc<MaskerHub>,
        analyser_options: AnalyserOptions,
        mask_options: MaskOptions,
        face_blend: u32,
    ) -> Self {
        Self {
            processor,
            analyser,
            masker_hub,
            analyser_options,
            mask_options,
            face_blend,
        }
    }
}

#[async_trait]
impl<P: CropProcessor> FrameProcessor for FaceProcessorAdapter<P> {
    fn name(&self) -> String {
        self.processor.name()
    }

    #[tracing::instrument(skip_all, fields(sequence_id = frame.sequence_id))]
    async fn process(&self, mut frame: FrameData) -> Result<FrameData, EngineError> {
        if frame.is_end_of_stream {
            return Ok(frame);
        }
        let Some(image) = frame.image.take() else {
            return Ok(frame);
        };

        let faces = self.analyser.get_many_faces(&image, &self.analyser_options)?;
        if faces.is_empty() {
            tracing::debug!("no face detected, frame passes through");
            frame.skipped = true;
            frame.image = Some(image);
            return Ok(frame);
        }

        let source_embedding = frame.source_embedding().cloned();
        let template = self.processor.warp_template();
        let crop_size = self.processor.crop_size();

        let mut output = image.clone();
        for face in &faces {
            let landmark5 = face.alignment_landmark5();
            if landmark5.len() != 5 {
                continue;
            }
            let (crop, affine) =
                helper::warp_face_by_landmark5(&image, landmark5, template, crop_size)?;
            let processed = self
                .processor
                .apply(&crop, source_embedding.as_deref())
                .map_err(|e| EngineError::ProcessorFailed {
                    name: self.processor.name(),
                    message: e.to_string(),
                })?;
            let mask = self
                .masker_hub
                .compose(&self.mask_options, &crop, &processed)?;
            output = helper::paste_back(&output, &processed, &mask, &affine)?;
        }

        let blended = vision::blend_frames(&image, &output, self.face_blend);
        frame.image = Some(blended);
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::{AnalyserConfig, FaceModelRegistry, FaceStore};
    use crate::infer::SessionRegistry;
    use ndarray::Array3;
    use pretty_assertions::assert_eq;

    struct IdentityCrop;

    impl CropProcessor for IdentityCrop {
        fn name(&self) -> String {
            "identity".to_string()
        }

        fn warp_template(&self) -> WarpTemplate {
            WarpTemplate::Arcface128V2
        }

        fn crop_size(&self) -> (usize, usize) {
            (128, 128)
        }

        fn apply(
            &self,
            crop: &Frame,
            _source_embedding: Option<&[f32]>,
        ) -> Result<Frame, EngineError> {
            Ok(crop.clone())
        }
    }

    fn adapter() -> FaceProcessorAdapter<IdentityCrop> {
        let sessions = Arc::new(SessionRegistry::new());
        let registry = Arc::new(FaceModelRegistry::new(sessions));
        let analyser = Arc::new(FaceAnalyser::new(
            registry,
            Arc::new(FaceStore::default()),
            AnalyserConfig::default(),
        ));
        FaceProcessorAdapter::new(
            Arc::new(IdentityCrop),
            analyser,
            Arc::new(MaskerHub::new(None, None)),
            AnalyserOptions::default(),
            MaskOptions::default(),
            100,
        )
    }

    #[tokio::test]
    async fn frames_without_faces_pass_through_as_skipped() {
        // No detector configured: every frame counts as face-free.
        let adapter = adapter();
        let image: Frame = Array3::zeros((32, 32, 3));
        let frame = FrameData::new(7, image.clone());

        let result = adapter.process(frame).await.unwrap();
        assert!(result.skipped);
        assert!(!result.failed);
        assert_eq!(result.image.unwrap(), image);
    }

    #[tokio::test]
    async fn end_of_stream_frames_are_forwarded_untouched() {
        let adapter = adapter();
        let result = adapter.process(FrameData::end_of_stream(3)).await.unwrap();
        assert!(result.is_end_of_stream);
        assert!(result.image.is_none());
    }
}
