use super::{prepare_detector_input, Detection, FaceDetector};
use crate::error::EngineError;
use crate::face::helper;
use crate::infer::InferenceSession;
use std::sync::Arc;
use visage_types::Frame;

const FEATURE_STRIDES: [usize; 3] = [8, 16, 32];
const ANCHOR_TOTAL: usize = 2;
const FEATURE_MAP_CHANNEL: usize = 3;

/// SCRFD detector. Shares the RetinaFace anchor layout but reads per-anchor
/// rows rather than flat blocks, mirroring the upstream decode.
pub struct Scrfd {
    session: Arc<InferenceSession>,
    input_height: usize,
    input_width: usize,
    score_threshold: f32,
}

impl Scrfd {
    pub fn new(session: Arc<InferenceSession>, score_threshold: f32) -> Self {
        let (input_height, input_width) = session.input_hw_or((640, 640));
        Self {
            session,
            input_height,
            input_width,
            score_threshold,
        }
    }
}

impl FaceDetector for Scrfd {
    #[tracing::instrument(skip_all)]
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, EngineError> {
        let (tensor, ratio_height, ratio_width) =
            prepare_detector_input(frame, self.input_height, self.input_width);

        let input_name = self.session.primary_input_name();
        let outputs = self
            .session
            .run(ort::inputs![input_name.as_str() => tensor.view()]
                .map_err(|e| EngineError::PreprocessingFailed(e.to_string()))?)
            .map_err(|e| EngineError::InferenceFailed(e.to_string()))?;

        let output_names = self.session.output_names();
        if output_names.len() < FEATURE_STRIDES.len() * FEATURE_MAP_CHANNEL {
            return Err(EngineError::PostprocessingFailed(format!(
                "scrfd expects {} outputs, model has {}",
                FEATURE_STRIDES.len() * FEATURE_MAP_CHANNEL,
                output_names.len()
            )));
        }

        let mut detections = Vec::new();
        for (index, feature_stride) in FEATURE_STRIDES.iter().enumerate() {
            let scores = outputs[output_names[index].as_str()]
                .try_extract_tensor::<f32>()
                .map_err(|e| EngineError::PostprocessingFailed(e.to_string()))?;
            let boxes = outputs[output_names[index + FEATURE_MAP_CHANNEL].as_str()]
                .try_extract_tensor::<f32>()
                .map_err(|e| EngineError::PostprocessingFailed(e.to_string()))?;
            let landmarks = outputs[output_names[index + 2 * FEATURE_MAP_CHANNEL].as_str()]
                .try_extract_tensor::<f32>()
                .map_err(|e| EngineError::PostprocessingFailed(e.to_string()))?;

            let scores = scores.as_slice().ok_or_else(|| {
                EngineError::PostprocessingFailed("non-contiguous score tensor".into())
            })?;
            let boxes = boxes.as_slice().ok_or_else(|| {
                EngineError::PostprocessingFailed("non-contiguous bbox tensor".into())
            })?;
            let landmarks = landmarks.as_slice().ok_or_else(|| {
                EngineError::PostprocessingFailed("non-contiguous landmark tensor".into())
            })?;

            let stride_height = self.input_height / feature_stride;
            let stride_width = self.input_width / feature_stride;
            let anchors = helper::create_static_anchors(
                *feature_stride,
                ANCHOR_TOTAL,
                stride_height,
                stride_width,
            );

            let stride_f = *feature_stride as f32;
            for (i, anchor) in anchors.iter().enumerate() {
                if i >= scores.len() {
                    break;
                }
                let score = scores[i];
                if score < self.score_threshold {
                    continue;
                }
                if boxes.len() < i * 4 + 4 || landmarks.len() < i * 10 + 10 {
                    break;
                }

                let distance = [
                    boxes[i * 4] * stride_f,
                    boxes[i * 4 + 1] * stride_f,
                    boxes[i * 4 + 2] * stride_f,
                    boxes[i * 4 + 3] * stride_f,
                ];
                let mut bbox = helper::distance_to_bbox(*anchor, distance);
                bbox.x_min *= ratio_width;
                bbox.x_max *= ratio_width;
                bbox.y_min *= ratio_height;
                bbox.y_max *= ratio_height;

                let mut offsets = [[0.0f32; 2]; 5];
                for (k, offset) in offsets.iter_mut().enumerate() {
                    offset[0] = landmarks[i * 10 + k * 2] * stride_f;
                    offset[1] = landmarks[i * 10 + k * 2 + 1] * stride_f;
                }
                let mut landmark5 = helper::distance_to_landmark5(*anchor, &offsets);
                for point in &mut landmark5 {
                    point.x *= ratio_width;
                    point.y *= ratio_height;
                }

                detections.push(Detection {
                    bbox,
                    score,
                    landmark5,
                });
            }
        }

        Ok(detections)
    }
}
