use super::{prepare_detector_input, Detection, FaceDetector};
use crate::error::EngineError;
use crate::infer::InferenceSession;
use std::sync::Arc;
use visage_types::{BBox, Frame, Point2};

/// YOLOFace detector: a single output tensor of shape (1, C, N) where the
/// first rows are cx/cy/w/h/score followed by 5 landmark triplets.
pub struct YoloFace {
    session: Arc<InferenceSession>,
    input_height: usize,
    input_width: usize,
    score_threshold: f32,
}

impl YoloFace {
    pub fn new(session: Arc<InferenceSession>, score_threshold: f32) -> Self {
        // Dynamic dims fall back to the canonical 640; models with other
        // static sizes are used as-is.
        let (input_height, input_width) = session.input_hw_or((640, 640));
        Self {
            session,
            input_height,
            input_width,
            score_threshold,
        }
    }
}

impl FaceDetector for YoloFace {
    #[tracing::instrument(skip_all)]
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, EngineError> {
        let (tensor, ratio_height, ratio_width) =
            prepare_detector_input(frame, self.input_height, self.input_width);
        let (frame_height, frame_width, _) = frame.dim();

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
        if shape.len() != 3 {
            return Err(EngineError::PostprocessingFailed(format!(
                "yoloface expects a (1, C, N) output, got {shape:?}"
            )));
        }
        let rows = shape[1];
        let num_boxes = shape[2];
        if rows < 20 {
            return Err(EngineError::PostprocessingFailed(format!(
                "yoloface expects 20 rows (box, score, landmarks), got {rows}"
            )));
        }
        let data = raw.as_slice().ok_or_else(|| {
            EngineError::PostprocessingFailed("non-contiguous yolo output".into())
        })?;
        let at = |row: usize, column: usize| data[row * num_boxes + column];

        let mut detections = Vec::new();
        for i in 0..num_boxes {
            let score = at(4, i);
            if score <= self.score_threshold {
                continue;
            }

            let x_min = (at(0, i) - 0.5 * at(2, i)) * ratio_width;
            let y_min = (at(1, i) - 0.5 * at(3, i)) * ratio_height;
            let x_max = (at(0, i) + 0.5 * at(2, i)) * ratio_width;
            let y_max = (at(1, i) + 0.5 * at(3, i)) * ratio_height;

            let bbox = BBox::new(x_min, y_min, x_max, y_max)
                .clamp_to(frame_width as f32, frame_height as f32);

            // Landmarks are x/y/confidence triplets starting at row 5.
            let mut landmark5 = Vec::with_capacity(5);
            for j in (5..20).step_by(3) {
                landmark5.push(Point2::new(
                    at(j, i) * ratio_width,
                    at(j + 1, i) * ratio_height,
                ));
            }

            detections.push(Detection {
                bbox,
                score,
                landmark5,
            });
        }

        Ok(detections)
    }
}
