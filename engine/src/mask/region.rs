use crate::error::EngineError;
use crate::infer::InferenceSession;
use crate::vision;
use ndarray::{s, Array2, Axis};
use std::collections::HashSet;
use std::sync::Arc;
use strum::{Display, EnumIter};
use visage_types::Frame;

/// BiSeNet face-parsing classes.
#[derive(EnumIter, Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaceRegion {
    Background,
    Skin,
    LeftEyebrow,
    RightEyebrow,
    LeftEye,
    RightEye,
    EyeGlasses,
    LeftEar,
    RightEar,
    Earring,
    Nose,
    Mouth,
    UpperLip,
    LowerLip,
    Neck,
    Necklace,
    Cloth,
    Hair,
    Hat,
}

impl FaceRegion {
    pub fn class_id(&self) -> usize {
        match self {
            FaceRegion::Background => 0,
            FaceRegion::Skin => 1,
            FaceRegion::LeftEyebrow => 2,
            FaceRegion::RightEyebrow => 3,
            FaceRegion::LeftEye => 4,
            FaceRegion::RightEye => 5,
            FaceRegion::EyeGlasses => 6,
            FaceRegion::LeftEar => 7,
            FaceRegion::RightEar => 8,
            FaceRegion::Earring => 9,
            FaceRegion::Nose => 10,
            FaceRegion::Mouth => 11,
            FaceRegion::UpperLip => 12,
            FaceRegion::LowerLip => 13,
            FaceRegion::Neck => 14,
            FaceRegion::Necklace => 15,
            FaceRegion::Cloth => 16,
            FaceRegion::Hair => 17,
            FaceRegion::Hat => 18,
        }
    }

    /// The facial regions a swap normally replaces.
    pub fn default_set() -> HashSet<FaceRegion> {
        [
            FaceRegion::Skin,
            FaceRegion::LeftEyebrow,
            FaceRegion::RightEyebrow,
            FaceRegion::LeftEye,
            FaceRegion::RightEye,
            FaceRegion::EyeGlasses,
            FaceRegion::Nose,
            FaceRegion::Mouth,
            FaceRegion::UpperLip,
            FaceRegion::LowerLip,
        ]
        .into_iter()
        .collect()
    }
}

/// BiSeNet face parser producing a keep-mask over the requested classes.
pub struct RegionMasker {
    session: Arc<InferenceSession>,
    input_height: usize,
    input_width: usize,
}

impl RegionMasker {
    pub fn new(session: Arc<InferenceSession>) -> Self {
        let (input_height, input_width) = session.input_hw_or((512, 512));
        Self {
            session,
            input_height,
            input_width,
        }
    }

    /// Argmax over class logits, keeping pixels whose class is requested.
    /// The parser was trained on mirrored crops, so the input flips before
    /// inference and the mask flips back.
    #[tracing::instrument(skip_all)]
    pub fn create_region_mask(
        &self,
        crop: &Frame,
        regions: &HashSet<FaceRegion>,
        blur_sigma: f32,
    ) -> Result<Array2<f32>, EngineError> {
        let (crop_height, crop_width, _) = crop.dim();
        let resized = vision::resize_frame(
            crop,
            self.input_width,
            self.input_height,
            image::imageops::FilterType::Triangle,
        );
        let flipped = resized.slice(s![.., ..;-1, ..]).as_standard_layout().to_owned();

        // NCHW, RGB, `(x / 127.5) - 1`.
        let tensor = vision::frame_to_chw_f32(&flipped, [127.5; 3], [127.5; 3], true)
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
        if shape.len() != 4 {
            return Err(EngineError::PostprocessingFailed(format!(
                "face parser expects (1, classes, H, W) logits, got {shape:?}"
            )));
        }
        let (num_classes, out_height, out_width) = (shape[1], shape[2], shape[3]);
        let data = raw.as_slice().ok_or_else(|| {
            EngineError::PostprocessingFailed("non-contiguous parser output".into())
        })?;

        let target_ids: HashSet<usize> = regions.iter().map(FaceRegion::class_id).collect();
        let pixels = out_height * out_width;
        let mut mask = Array2::<f32>::zeros((out_height, out_width));
        for i in 0..pixels {
            let mut best_class = 0;
            let mut best_value = f32::NEG_INFINITY;
            for class in 0..num_classes {
                let value = data[class * pixels + i];
                if value > best_value {
                    best_value = value;
                    best_class = class;
                }
            }
            if target_ids.contains(&best_class) {
                mask[[i / out_width, i % out_width]] = 1.0;
            }
        }

        // Mirror back and return to crop resolution.
        let mask = mask.slice(s![.., ..;-1]).to_owned();
        let mut mask = vision::resize_map_nearest(&mask, crop_height, crop_width);
        if blur_sigma > 0.0 {
            mask = vision::gaussian_blur_f32(&mask, blur_sigma);
        }
        Ok(mask)
    }
}
