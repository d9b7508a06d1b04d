use super::FrameProcessor;
use crate::error::EngineError;
use crate::face::helper::{self, WarpTemplate};
use crate::face::{AnalyserOptions, FaceAnalyser};
use crate::infer::InferenceSession;
use crate::mask::{MaskOptions, MaskerHub};
use crate::vision;
use async_trait::async_trait;
use ndarray::{Array2, ArrayD, Axis, Ix4};
use std::sync::Arc;
use visage_types::{Frame, FrameData};

/// Per-coefficient bounds for the 21x3 expression offsets, shipped with the
/// LivePortrait weights.
const EXPRESSION_MIN: [f32; 63] = [
    -2.880_671_2e-2, -8.127_313_1e-2, -1.705_411_6e-3,
    -4.885_986_8e-2, -3.321_966_2e-2, -1.674_315_0e-4,
    -6.754_250_8e-2, -4.286_817_5e-2, -1.989_508_2e-4,
    -7.231_039_6e-2, -3.285_033_3e-2, -7.313_247_2e-4,
    -3.870_736_4e-2, -6.015_464_7e-2, -5.502_699_6e-4,
    -6.380_487_2e-2, -2.238_407_3e-1, -7.132_618_3e-4,
    -3.027_107_0e-2, -3.931_954_5e-2, -8.240_865_1e-6,
    -2.957_998_6e-2, -5.393_188_8e-2, -1.742_196_0e-4,
    -2.923_595_2e-2, -1.530_509_4e-2, -6.304_608_5e-5,
    -5.564_938_8e-3, -2.343_446_0e-2, -1.268_582_4e-4,
    -4.375_930_1e-2, -2.777_683_0e-2, -2.705_036_9e-2,
    -1.769_266_5e-2, -1.916_765_4e-2, -1.150_908_2e-4,
    -8.342_683_3e-3, -3.997_755_7e-3, -3.274_812_5e-5,
    -3.401_628_9e-2, -2.818_689_7e-2, -1.966_795_2e-4,
    -2.918_554_1e-2, -3.975_111_6e-2, -2.812_306_8e-5,
    -1.503_957_3e-2, -2.494_945_9e-2, -9.425_735_3e-5,
    -1.679_387_7e-2, -2.009_539_3e-2, -4.007_506_1e-4,
    -1.864_356_2e-2, -2.485_351_6e-2, -2.744_164_3e-2,
    -4.612_112_0e-3, -1.216_607_9e-2, -2.931_730_4e-4,
    -4.100_170_7e-2, -7.438_240_2e-2, -4.427_629_7e-2,
    -1.903_710_0e-2, -3.743_633_6e-2, -1.347_403_9e-2,
];

const EXPRESSION_MAX: [f32; 63] = [
    4.466_829_5e-2, 7.087_729_1e-2, 4.083_442_0e-4,
    2.143_082_2e-2, 6.158_948_3e-2, 4.853_196_2e-5,
    3.023_637_8e-2, 4.450_433_0e-2, 1.282_987_2e-5,
    3.058_696_9e-2, 3.798_124_9e-2, 6.570_401_0e-4,
    4.456_705_2e-2, 3.972_592_2e-2, 7.109_667_6e-4,
    9.436_992_6e-2, 9.859_263_2e-2, 2.025_519_5e-4,
    1.611_314_0e-2, 2.929_061_3e-2, 3.447_334_2e-6,
    5.238_259_2e-2, 1.070_650_8e-1, 6.615_109_7e-4,
    2.857_186_8e-3, 8.323_201_9e-3, 2.393_146_1e-4,
    2.579_472_6e-2, 1.609_359_7e-2, 2.418_535_6e-5,
    4.908_332_2e-2, 3.439_030_8e-2, 3.223_533_6e-2,
    1.447_660_8e-2, 3.392_489_6e-2, 1.422_914_8e-4,
    8.757_490_4e-4, 6.822_126_5e-3, 2.760_970_5e-5,
    1.869_580_2e-2, 3.840_161_9e-2, 7.330_859_1e-5,
    2.017_141_1e-2, 4.905_442_2e-2, 2.340_289_2e-5,
    2.465_184_2e-2, 3.291_513_8e-2, 3.485_716_3e-5,
    2.224_575_9e-2, 1.217_965_4e-2, 1.563_965_9e-4,
    1.721_096_2e-2, 3.016_269_6e-2, 1.365_568_8e-2,
    1.834_602_8e-2, 1.611_419_6e-2, 2.874_401_7e-4,
    3.575_941_6e-2, 1.805_546_9e-1, 2.755_541_5e-2,
    2.174_509_5e-2, 8.668_112_0e-2, 3.342_417_3e-2,
];

/// Motion parameters decoded from one crop.
#[derive(Debug, Clone)]
pub struct Motion {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
    pub scale: f32,
    pub translation: [f32; 3],
    pub expression: Array2<f32>,
    pub points: Array2<f32>,
}

/// LivePortrait expression transfer: feature extractor + motion extractor +
/// generator.
pub struct LivePortrait {
    feature: Arc<InferenceSession>,
    motion: Arc<InferenceSession>,
    generator: Arc<InferenceSession>,
}

/// `R = Rz(roll) · Ry(yaw) · Rx(pitch)`, angles in degrees.
pub fn create_rotation(pitch: f32, yaw: f32, roll: f32) -> Array2<f32> {
    let (pitch, yaw, roll) = (
        pitch.to_radians(),
        yaw.to_radians(),
        roll.to_radians(),
    );
    let rx = ndarray::array![
        [1.0, 0.0, 0.0],
        [0.0, pitch.cos(), -pitch.sin()],
        [0.0, pitch.sin(), pitch.cos()]
    ];
    let ry = ndarray::array![
        [yaw.cos(), 0.0, yaw.sin()],
        [0.0, 1.0, 0.0],
        [-yaw.sin(), 0.0, yaw.cos()]
    ];
    let rz = ndarray::array![
        [roll.cos(), -roll.sin(), 0.0],
        [roll.sin(), roll.cos(), 0.0],
        [0.0, 0.0, 1.0]
    ];
    rz.dot(&ry).dot(&rx)
}

/// Clamp a 21x3 expression offset into the model's shipped bounds.
pub fn limit_expression(expression: &Array2<f32>) -> Array2<f32> {
    let mut limited = expression.clone();
    for (index, value) in limited.iter_mut().enumerate() {
        if index < EXPRESSION_MIN.len() {
            *value = value.clamp(EXPRESSION_MIN[index], EXPRESSION_MAX[index]);
        }
    }
    limited
}

/// Expectation over 66 soft-binned degrees: `Σ softmax(x)·i·3 − 97.5`.
fn decode_binned_angle(bins: &[f32]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let max = bins.iter().cloned().fold(f32::MIN, f32::max);
    let exps: Vec<f32> = bins.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    let expectation: f32 = exps
        .iter()
        .enumerate()
        .map(|(i, e)| e / sum * i as f32)
        .sum();
    expectation * 3.0 - 97.5
}

impl LivePortrait {
    pub fn new(
        feature: Arc<InferenceSession>,
        motion: Arc<InferenceSession>,
        generator: Arc<InferenceSession>,
    ) -> Self {
        Self {
            feature,
            motion,
            generator,
        }
    }

    fn crop_tensor(crop: &Frame) -> ndarray::Array4<f32> {
        vision::frame_to_chw_f32(crop, [0.0; 3], [255.0; 3], true).insert_axis(Axis(0))
    }

    /// Source crop → 32x16x64x64 appearance volume.
    #[tracing::instrument(skip_all)]
    pub fn extract_feature(&self, crop: &Frame) -> Result<ArrayD<f32>, EngineError> {
        let tensor = Self::crop_tensor(crop);
        let input_name = self.feature.primary_input_name();
        let outputs = self
            .feature
            .run(ort::inputs![input_name.as_str() => tensor.view()]
                .map_err(|e| EngineError::PreprocessingFailed(e.to_string()))?)
            .map_err(|e| EngineError::InferenceFailed(e.to_string()))?;
        let output_name = self.feature.primary_output_name();
        Ok(outputs[output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::PostprocessingFailed(e.to_string()))?
            .to_owned())
    }

    #[tracing::instrument(skip_all)]
    pub fn extract_motion(&self, crop: &Frame) -> Result<Motion, EngineError> {
        let tensor = Self::crop_tensor(crop);
        let input_name = self.motion.primary_input_name();
        let outputs = self
            .motion
            .run(ort::inputs![input_name.as_str() => tensor.view()]
                .map_err(|e| EngineError::PreprocessingFailed(e.to_string()))?)
            .map_err(|e| EngineError::InferenceFailed(e.to_string()))?;

        let read = |name: &str| -> Result<Vec<f32>, EngineError> {
            Ok(outputs[name]
                .try_extract_tensor::<f32>()
                .map_err(|e| EngineError::PostprocessingFailed(e.to_string()))?
                .iter()
                .copied()
                .collect())
        };

        let pitch = decode_binned_angle(&read("pitch")?);
        let yaw = decode_binned_angle(&read("yaw")?);
        let roll = decode_binned_angle(&read("roll")?);
        let scale = read("scale")?.first().copied().unwrap_or(1.0);
        let translation_raw = read("t")?;
        let mut translation = [0.0f32; 3];
        for (slot, value) in translation.iter_mut().zip(translation_raw.iter()) {
            *slot = *value;
        }
        let expression = Array2::from_shape_vec((21, 3), read("exp")?)
            .map_err(|e| EngineError::PostprocessingFailed(e.to_string()))?;
        let points = Array2::from_shape_vec((21, 3), read("kp")?)
            .map_err(|e| EngineError::PostprocessingFailed(e.to_string()))?;

        Ok(Motion {
            pitch,
            yaw,
            roll,
            scale,
            translation,
            expression,
            points,
        })
    }

    /// `kp = scale · (points · Rᵀ + expression) + translation`
    pub fn transform_points(motion: &Motion, expression: &Array2<f32>) -> Array2<f32> {
        let rotation = create_rotation(motion.pitch, motion.yaw, motion.roll);
        let mut transformed = motion.points.dot(&rotation.t()) + expression;
        transformed.mapv_inplace(|v| v * motion.scale);
        for mut row in transformed.axis_iter_mut(Axis(0)) {
            row[0] += motion.translation[0];
            row[1] += motion.translation[1];
        }
        transformed
    }

    #[tracing::instrument(skip_all)]
    pub fn generate(
        &self,
        feature_volume: &ArrayD<f32>,
        source_points: &Array2<f32>,
        target_points: &Array2<f32>,
    ) -> Result<Frame, EngineError> {
        let input_names = self.generator.input_names();
        if input_names.len() < 3 {
            return Err(EngineError::PreprocessingFailed(format!(
                "generator expects 3 inputs, model has {}",
                input_names.len()
            )));
        }
        let source = source_points.clone().insert_axis(Axis(0));
        let target = target_points.clone().insert_axis(Axis(0));
        let outputs = self
            .generator
            .run(ort::inputs![
                input_names[0].as_str() => feature_volume.view(),
                input_names[1].as_str() => source.view(),
                input_names[2].as_str() => target.view(),
            ]
            .map_err(|e| EngineError::PreprocessingFailed(e.to_string()))?)
            .map_err(|e| EngineError::InferenceFailed(e.to_string()))?;

        let output_name = self.generator.primary_output_name();
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

    /// Re-impose the source crop's expression onto the target crop.
    /// `restore_factor` interpolates between target (0) and source (1)
    /// expressions; offsets clamp into the model bounds before applying.
    #[tracing::instrument(skip_all)]
    pub fn restore_expression(
        &self,
        source_crop: &Frame,
        target_crop: &Frame,
        restore_factor: f32,
    ) -> Result<Frame, EngineError> {
        let restore_factor = restore_factor.clamp(0.0, 1.0);
        let feature_volume = self.extract_feature(target_crop)?;
        let source_motion = self.extract_motion(source_crop)?;
        let target_motion = self.extract_motion(target_crop)?;

        let blended_expression = limit_expression(
            &(&source_motion.expression * restore_factor
                + &target_motion.expression * (1.0 - restore_factor)),
        );
        let source_points = Self::transform_points(&target_motion, &blended_expression);
        let target_points = Self::transform_points(&target_motion, &target_motion.expression);

        self.generate(&feature_volume, &source_points, &target_points)
    }
}

/// Pipeline stage restoring the original frame's expression onto processed
/// faces. The pristine frame travels in metadata; with nothing stored the
/// stage is a no-op for that frame.
pub struct ExpressionRestorerAdapter {
    restorer: Arc<LivePortrait>,
    analyser: Arc<FaceAnalyser>,
    masker_hub: Arc<MaskerHub>,
    analyser_options: AnalyserOptions,
    mask_options: MaskOptions,
    restore_factor: f32,
}

const LIVE_PORTRAIT_CROP: (usize, usize) = (512, 512);

impl ExpressionRestorerAdapter {
    pub fn new(
        restorer: Arc<LivePortrait>,
        analyser: Arc<FaceAnalyser>,
        masker_hub: Arc<MaskerHub>,
        analyser_options: AnalyserOptions,
        mask_options: MaskOptions,
        restore_factor: f32,
    ) -> Self {
        Self {
            restorer,
            analyser,
            masker_hub,
            analyser_options,
            mask_options,
            restore_factor,
        }
    }
}

#[async_trait]
impl FrameProcessor for ExpressionRestorerAdapter {
    fn name(&self) -> String {
        "expression_restorer.live_portrait".to_string()
    }

    #[tracing::instrument(skip_all, fields(sequence_id = frame.sequence_id))]
    async fn process(&self, mut frame: FrameData) -> Result<FrameData, EngineError> {
        if frame.is_end_of_stream {
            return Ok(frame);
        }
        let Some(image) = frame.image.take() else {
            return Ok(frame);
        };
        let Some(original) = frame.original_image().cloned() else {
            tracing::debug!("no original frame stored, skipping expression restore");
            frame.image = Some(image);
            return Ok(frame);
        };

        let faces = self
            .analyser
            .get_many_faces(&original, &self.analyser_options)?;
        if faces.is_empty() {
            frame.skipped = true;
            frame.image = Some(image);
            return Ok(frame);
        }

        let mut output = image.clone();
        for face in &faces {
            let landmark5 = face.alignment_landmark5();
            if landmark5.len() != 5 {
                continue;
            }
            let (source_crop, _) = helper::warp_face_by_landmark5(
                &original,
                landmark5,
                WarpTemplate::Arcface128V2,
                LIVE_PORTRAIT_CROP,
            )?;
            let (target_crop, affine) = helper::warp_face_by_landmark5(
                &image,
                landmark5,
                WarpTemplate::Arcface128V2,
                LIVE_PORTRAIT_CROP,
            )?;
            let restored =
                self.restorer
                    .restore_expression(&source_crop, &target_crop, self.restore_factor)?;
            let mask = self
                .masker_hub
                .compose(&self.mask_options, &target_crop, &restored)?;
            output = helper::paste_back(&output, &restored, &mask, &affine)?;
        }

        frame.image = Some(output);
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rotation_at_zero_angles_is_identity() {
        let rotation = create_rotation(0.0, 0.0, 0.0);
        let identity = Array2::<f32>::eye(3);
        for (a, b) in rotation.iter().zip(identity.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn expression_offsets_clamp_into_their_bounds() {
        let huge = Array2::from_elem((21, 3), 10.0f32);
        let limited = limit_expression(&huge);
        for (index, value) in limited.iter().enumerate() {
            assert_eq!(*value, EXPRESSION_MAX[index]);
        }

        let tiny = Array2::from_elem((21, 3), -10.0f32);
        let limited = limit_expression(&tiny);
        for (index, value) in limited.iter().enumerate() {
            assert_eq!(*value, EXPRESSION_MIN[index]);
        }
    }

    #[test]
    fn binned_angle_expectation_is_centered() {
        // A sharp peak at bin 32 decodes near 32*3 - 97.5.
        let mut bins = vec![0.0f32; 66];
        bins[32] = 50.0;
        let degree = decode_binned_angle(&bins);
        assert!((degree - (32.0 * 3.0 - 97.5)).abs() < 1e-2);
    }
}
