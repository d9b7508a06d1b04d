use crate::error::EngineError;
use crate::infer::InferenceSession;
use crate::vision;
use ndarray::{Array2, Array4};
use std::sync::Arc;
use visage_types::Frame;

const OCCLUSION_BLUR_SIGMA: f32 = 5.0;

/// XSeg-style occlusion segmenter. The model scores each pixel with an
/// occlusion probability; the final map is inverted so occluded pixels end
/// at 0 and are left untouched by paste-back.
pub struct OcclusionMasker {
    session: Arc<InferenceSession>,
    input_height: usize,
    input_width: usize,
}

impl OcclusionMasker {
    pub fn new(session: Arc<InferenceSession>) -> Self {
        // XSeg graphs are NHWC; dims are [1, H, W, 3].
        let dims = session.input_dims().first().cloned().unwrap_or_default();
        let (input_height, input_width) = if dims.len() >= 3 && dims[1] > 0 && dims[2] > 0 {
            (dims[1] as usize, dims[2] as usize)
        } else {
            (256, 256)
        };
        Self {
            session,
            input_height,
            input_width,
        }
    }

    #[tracing::instrument(skip_all)]
    pub fn create_occlusion_mask(&self, crop: &Frame) -> Result<Array2<f32>, EngineError> {
        let (crop_height, crop_width, _) = crop.dim();
        let resized = vision::resize_frame(
            crop,
            self.input_width,
            self.input_height,
            image::imageops::FilterType::Triangle,
        );

        // NHWC, RGB, pixels in [0, 1].
        let mut tensor = Array4::<f32>::zeros((1, self.input_height, self.input_width, 3));
        for y in 0..self.input_height {
            for x in 0..self.input_width {
                for c in 0..3 {
                    tensor[[0, y, x, c]] = resized[[y, x, 2 - c]] as f32 / 255.0;
                }
            }
        }

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
        let (out_height, out_width) = if shape.len() >= 3 {
            (shape[1], shape[2])
        } else {
            (self.input_height, self.input_width)
        };
        let data = raw.as_slice().ok_or_else(|| {
            EngineError::PostprocessingFailed("non-contiguous occlusion output".into())
        })?;
        if data.len() < out_height * out_width {
            return Err(EngineError::PostprocessingFailed(
                "occlusion output smaller than its declared shape".into(),
            ));
        }

        // Threshold -> resize -> blur -> invert, occluded pixels end at 0.
        let mut occlusion = Array2::<f32>::zeros((out_height, out_width));
        for y in 0..out_height {
            for x in 0..out_width {
                let probability = data[y * out_width + x].clamp(0.0, 1.0);
                occlusion[[y, x]] = if probability >= 0.5 { 1.0 } else { 0.0 };
            }
        }
        let occlusion = vision::resize_map_bilinear(&occlusion, crop_height, crop_width);
        let occlusion = vision::gaussian_blur_f32(&occlusion, OCCLUSION_BLUR_SIGMA);
        Ok(occlusion.mapv(|v| (1.0 - v).clamp(0.0, 1.0)))
    }
}
