use super::{Landmark68Result, LandmarkerKind};
use crate::error::EngineError;
use crate::face::helper;
use crate::infer::InferenceSession;
use crate::vision;
use ndarray::Axis;
use std::sync::Arc;
use visage_types::{BBox, Frame, Point2};

/// Scale constant placing the face box inside the canonical 256 crop.
const BOX_SCALE: f32 = 195.0;

/// Dense 68-point landmark model (2DFAN or PeppaWutz). Both share the crop
/// layout, the `v / 64 * size` decode and the [0, 0.9] → [0, 1] score remap.
pub struct DenseLandmarker {
    kind: LandmarkerKind,
    session: Arc<InferenceSession>,
    input_height: usize,
    input_width: usize,
}

impl DenseLandmarker {
    pub fn new(kind: LandmarkerKind, session: Arc<InferenceSession>) -> Self {
        let (input_height, input_width) = session.input_hw_or((256, 256));
        Self {
            kind,
            session,
            input_height,
            input_width,
        }
    }

    pub fn kind(&self) -> LandmarkerKind {
        self.kind
    }

    #[tracing::instrument(skip_all)]
    pub fn detect(&self, frame: &Frame, bbox: &BBox) -> Result<Landmark68Result, EngineError> {
        let scale = BOX_SCALE / bbox.width().max(bbox.height()).max(1.0);
        let translation = (
            (self.input_width as f32 - (bbox.x_min * 2.0 + bbox.width()) * scale) * 0.5,
            (self.input_height as f32 - (bbox.y_min * 2.0 + bbox.height()) * scale) * 0.5,
        );

        let (crop, affine) = helper::warp_face_by_translation(
            frame,
            translation,
            scale,
            (self.input_width, self.input_height),
        )?;
        let crop = vision::conditional_optimize_contrast(&crop);
        let inverse_affine = helper::invert_affine(&affine)?;

        // Pixels in [0, 1], planar, keeping the BGR plane order the models
        // were exported with.
        let tensor = vision::frame_to_chw_f32(&crop, [0.0; 3], [255.0; 3], false)
            .insert_axis(Axis(0));

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
        let shape = raw.shape().to_vec();
        if shape.len() < 2 {
            return Err(EngineError::PostprocessingFailed(format!(
                "landmark output has unexpected shape {shape:?}"
            )));
        }
        let num_points = shape[1];
        let data = raw.as_slice().ok_or_else(|| {
            EngineError::PostprocessingFailed("non-contiguous landmark output".into())
        })?;
        if data.len() < num_points * 3 {
            return Err(EngineError::PostprocessingFailed(
                "landmark output too small for x/y/score triplets".into(),
            ));
        }

        let mut points = Vec::with_capacity(num_points);
        let mut score_sum = 0.0f32;
        for i in 0..num_points {
            let x = data[i * 3] / 64.0 * self.input_width as f32;
            let y = data[i * 3 + 1] / 64.0 * self.input_width as f32;
            score_sum += data[i * 3 + 2];
            points.push(Point2::new(x, y));
        }

        let landmark68 = helper::transform_points(&points, &inverse_affine);
        let mean_score = score_sum / num_points.max(1) as f32;
        let score = helper::interp(mean_score, (0.0, 0.9), (0.0, 1.0));

        Ok(Landmark68Result { landmark68, score })
    }
}
