use crate::error::EngineError;
use crate::face::helper::{self, WarpTemplate};
use crate::infer::InferenceSession;
use ndarray::Array3;
use std::sync::Arc;
use visage_types::{Landmarks, Point2};

/// Geometric regression model expanding 5 landmarks into a dense 68-point
/// set. Works purely on coordinates, no pixels involved: the 5 points are
/// normalized into FFHQ template space, fed as a (1, 5, 2) tensor, and the
/// 68 outputs are mapped back through the inverse transform.
pub struct Landmark68From5 {
    session: Arc<InferenceSession>,
}

impl Landmark68From5 {
    pub fn new(session: Arc<InferenceSession>) -> Self {
        Self { session }
    }

    #[tracing::instrument(skip_all)]
    pub fn expand(&self, landmark5: &Landmarks) -> Result<Landmarks, EngineError> {
        if landmark5.len() != 5 {
            return Ok(Vec::new());
        }

        let affine =
            helper::estimate_matrix_by_landmark5(landmark5, WarpTemplate::Ffhq512, (1, 1))?;
        let normalized = helper::transform_points(landmark5, &affine);

        let mut tensor = Array3::<f32>::zeros((1, 5, 2));
        for (i, point) in normalized.iter().enumerate() {
            tensor[[0, i, 0]] = point.x;
            tensor[[0, i, 1]] = point.y;
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
        if shape.len() < 2 {
            return Err(EngineError::PostprocessingFailed(format!(
                "68-from-5 output has unexpected shape {shape:?}"
            )));
        }
        let num_points = shape[1];
        let data = raw.as_slice().ok_or_else(|| {
            EngineError::PostprocessingFailed("non-contiguous 68-from-5 output".into())
        })?;

        let points: Vec<Point2> = (0..num_points)
            .map(|i| Point2::new(data[i * 2], data[i * 2 + 1]))
            .collect();

        let inverse = helper::invert_affine(&affine)?;
        Ok(helper::transform_points(&points, &inverse))
    }
}
