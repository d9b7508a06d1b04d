use super::adapter::CropProcessor;
use crate::error::EngineError;
use crate::face::helper::WarpTemplate;
use crate::infer::InferenceSession;
use crate::vision;
use ndarray::{Array2, Axis, Ix4};
use std::sync::Arc;
use strum::Display;
use visage_types::Frame;

#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaceEnhancerKind {
    GfpGan,
    CodeFormer,
}

/// GFPGAN / CodeFormer face restoration over an FFHQ-aligned 512 crop.
/// CodeFormer additionally takes a fidelity weight input.
pub struct FaceEnhancer {
    kind: FaceEnhancerKind,
    session: Arc<InferenceSession>,
    input_height: usize,
    input_width: usize,
    codeformer_weight: f64,
}

impl FaceEnhancer {
    pub fn new(kind: FaceEnhancerKind, session: Arc<InferenceSession>) -> Self {
        let (input_height, input_width) = session.input_hw_or((512, 512));
        Self {
            kind,
            session,
            input_height,
            input_width,
            codeformer_weight: 1.0,
        }
    }

    pub fn with_codeformer_weight(mut self, weight: f64) -> Self {
        self.codeformer_weight = weight;
        self
    }
}

impl CropProcessor for FaceEnhancer {
    fn name(&self) -> String {
        match self.kind {
            FaceEnhancerKind::GfpGan => "face_enhancer.gfpgan".to_string(),
            FaceEnhancerKind::CodeFormer => "face_enhancer.codeformer".to_string(),
        }
    }

    fn warp_template(&self) -> WarpTemplate {
        WarpTemplate::Ffhq512
    }

    fn crop_size(&self) -> (usize, usize) {
        (self.input_width, self.input_height)
    }

    #[tracing::instrument(skip_all)]
    fn apply(&self, crop: &Frame, _source_embedding: Option<&[f32]>) -> Result<Frame, EngineError> {
        let crop = if crop.dim() == (self.input_height, self.input_width, 3) {
            crop.clone()
        } else {
            vision::resize_frame(
                crop,
                self.input_width,
                self.input_height,
                image::imageops::FilterType::CatmullRom,
            )
        };

        // `(x / 127.5) - 1`, RGB planar.
        let tensor =
            vision::frame_to_chw_f32(&crop, [127.5; 3], [127.5; 3], true).insert_axis(Axis(0));

        let outputs = match self.kind {
            FaceEnhancerKind::GfpGan => self
                .session
                .run(ort::inputs!["input" => tensor.view()]
                    .map_err(|e| EngineError::PreprocessingFailed(e.to_string()))?)
                .map_err(|e| EngineError::InferenceFailed(e.to_string()))?,
            FaceEnhancerKind::CodeFormer => {
                let weight = Array2::<f64>::from_elem((1, 1), self.codeformer_weight);
                self.session
                    .run(ort::inputs![
                        "input" => tensor.view(),
                        "weight" => weight.view(),
                    ]
                    .map_err(|e| EngineError::PreprocessingFailed(e.to_string()))?)
                    .map_err(|e| EngineError::InferenceFailed(e.to_string()))?
            }
        };

        let output_name = self.session.primary_output_name();
        let raw = outputs[output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::PostprocessingFailed(e.to_string()))?;
        let tensor = raw
            .to_owned()
            .into_dimensionality::<Ix4>()
            .map_err(|e| EngineError::PostprocessingFailed(e.to_string()))?;
        let tensor = tensor.index_axis(Axis(0), 0).to_owned();
        // `(y + 1) * 127.5` clamped into 8-bit range.
        Ok(vision::chw_f32_to_frame(&tensor, 127.5, 127.5, true))
    }
}
