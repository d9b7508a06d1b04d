use crate::error::EngineError;
use crate::face::helper::{self, WarpTemplate};
use crate::infer::InferenceSession;
use crate::vision;
use ndarray::Axis;
use std::sync::Arc;
use visage_types::{Embedding, Frame, Landmarks};

/// Faces closer than this cosine distance count as the same identity.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.6;

/// ArcFace identity model: 5-point aligned 112x112 crop in, 512-float
/// embedding out.
pub struct ArcFace {
    session: Arc<InferenceSession>,
    input_height: usize,
    input_width: usize,
}

impl ArcFace {
    pub fn new(session: Arc<InferenceSession>) -> Self {
        let (input_height, input_width) = session.input_hw_or((112, 112));
        Self {
            session,
            input_height,
            input_width,
        }
    }

    /// Returns the raw embedding and its L2-normalized copy.
    #[tracing::instrument(skip_all)]
    pub fn recognize(
        &self,
        frame: &Frame,
        landmark5: &Landmarks,
    ) -> Result<(Embedding, Embedding), EngineError> {
        let (crop, _) = helper::warp_face_by_landmark5(
            frame,
            landmark5,
            WarpTemplate::Arcface112V2,
            (self.input_width, self.input_height),
        )?;

        // `(x / 127.5) - 1`, RGB planar.
        let tensor =
            vision::frame_to_chw_f32(&crop, [127.5; 3], [127.5; 3], true).insert_axis(Axis(0));

        let input_name = self.session.primary_input_name();
        let outputs = self
            .session
            .run(ort::inputs![input_name.as_str() => tensor.view()]
                .map_err(|e| EngineError::PreprocessingFailed(e.to_string()))?)
            .map_err(|e| EngineError::InferenceFailed(e.to_string()))?;

        let output_name = self.session.primary_output_name();
        let raw = outputs[output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::PostprocessingFailed(e.to_string()))?;
        let embedding: Embedding = raw.iter().copied().collect();
        let normed = helper::normalize_embedding(&embedding);
        Ok((embedding, normed))
    }
}
