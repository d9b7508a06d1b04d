use super::adapter::CropProcessor;
use super::onnx_graph::{extract_last_initializer, EmbeddedMatrix};
use crate::error::EngineError;
use crate::face::helper::WarpTemplate;
use crate::infer::InferenceSession;
use crate::vision;
use ndarray::{Array2, Axis, Ix4};
use std::path::Path;
use std::sync::Arc;
use visage_types::Frame;

/// InSwapper-128 identity swapper.
///
/// The model embeds a 512x512 projection matrix as its final graph
/// initializer; it is extracted once at load and applied to the source
/// embedding on every call.
pub struct InSwapper {
    session: Arc<InferenceSession>,
    matrix: EmbeddedMatrix,
    input_height: usize,
    input_width: usize,
}

impl InSwapper {
    #[tracing::instrument(skip(session))]
    pub fn load(session: Arc<InferenceSession>, model_path: &Path) -> Result<Self, EngineError> {
        let matrix = extract_last_initializer(model_path)?;
        if matrix.rows != matrix.cols {
            return Err(EngineError::ModelLoadFailed {
                path: model_path.to_path_buf(),
                message: format!(
                    "expected a square projection matrix, got {}x{}",
                    matrix.rows, matrix.cols
                ),
            });
        }
        let (input_height, input_width) = session.input_hw_or((128, 128));
        Ok(Self {
            session,
            matrix,
            input_height,
            input_width,
        })
    }

    /// `projected = (source · M) / ||source||`
    pub fn project_embedding(&self, source: &[f32]) -> Result<Vec<f32>, EngineError> {
        if source.len() != self.matrix.rows {
            return Err(EngineError::PreprocessingFailed(format!(
                "source embedding has {} values, projection expects {}",
                source.len(),
                self.matrix.rows
            )));
        }
        let norm: f64 = source
            .iter()
            .map(|v| *v as f64 * *v as f64)
            .sum::<f64>()
            .sqrt();
        let norm = if norm > 1e-6 { norm } else { 1.0 };

        let mut projected = vec![0.0f32; self.matrix.cols];
        for (i, out) in projected.iter_mut().enumerate() {
            let mut sum = 0.0f64;
            for (j, value) in source.iter().enumerate() {
                sum += *value as f64 * self.matrix.at(j, i) as f64;
            }
            *out = (sum / norm) as f32;
        }
        Ok(projected)
    }
}

impl CropProcessor for InSwapper {
    fn name(&self) -> String {
        "face_swapper.inswapper_128".to_string()
    }

    fn warp_template(&self) -> WarpTemplate {
        WarpTemplate::Arcface128V2
    }

    fn crop_size(&self) -> (usize, usize) {
        (self.input_width, self.input_height)
    }

    #[tracing::instrument(skip_all)]
    fn apply(&self, crop: &Frame, source_embedding: Option<&[f32]>) -> Result<Frame, EngineError> {
        let source = source_embedding.ok_or_else(|| EngineError::ProcessorFailed {
            name: self.name(),
            message: "no source embedding on frame".to_string(),
        })?;
        let projected = self.project_embedding(source)?;
        let source_tensor = Array2::from_shape_vec((1, projected.len()), projected)
            .map_err(|e| EngineError::PreprocessingFailed(e.to_string()))?;

        // Target pixels in [0, 1], RGB planar.
        let target_tensor =
            vision::frame_to_chw_f32(crop, [0.0; 3], [255.0; 3], true).insert_axis(Axis(0));

        // The graph binds by name: "source" takes the projected identity,
        // "target" the crop tensor.
        let outputs = self
            .session
            .run(ort::inputs![
                "source" => source_tensor.view(),
                "target" => target_tensor.view(),
            ]
            .map_err(|e| EngineError::PreprocessingFailed(e.to_string()))?)
            .map_err(|e| EngineError::InferenceFailed(e.to_string()))?;

        let output_name = self.session.primary_output_name();
        let raw = outputs[output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::PostprocessingFailed(e.to_string()))?;
        let tensor = raw
            .to_owned()
            .into_dimensionality::<Ix4>()
            .map_err(|e| EngineError::PostprocessingFailed(e.to_string()))?;
        let tensor = tensor.index_axis(Axis(0), 0).to_owned();
        Ok(vision::chw_f32_to_frame(&tensor, 255.0, 0.0, true))
    }
}
