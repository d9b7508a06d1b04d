use super::FrameProcessor;
use crate::error::EngineError;
use crate::infer::InferenceSession;
use crate::vision;
use async_trait::async_trait;
use ndarray::{Axis, Ix4};
use std::sync::Arc;
use strum::Display;
use visage_types::{Frame, FrameData};

#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameEnhancerKind {
    RealEsrgan,
    RealHatGan,
}

/// Tile parameters bounding GPU memory: tile size, outer pad, inner pad.
const TILE: [usize; 3] = [256, 16, 8];

/// Whole-frame super resolution (x2/x4/x8) via overlapping tiles.
pub struct FrameEnhancer {
    kind: FrameEnhancerKind,
    session: Arc<InferenceSession>,
    model_scale: usize,
}

impl FrameEnhancer {
    pub fn new(kind: FrameEnhancerKind, session: Arc<InferenceSession>, model_scale: usize) -> Self {
        Self {
            kind,
            session,
            model_scale,
        }
    }

    pub fn model_scale(&self) -> usize {
        self.model_scale
    }

    fn enhance_tile(&self, tile: &Frame) -> Result<Frame, EngineError> {
        let tensor =
            vision::frame_to_chw_f32(tile, [0.0; 3], [255.0; 3], true).insert_axis(Axis(0));
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
        let tensor = raw
            .to_owned()
            .into_dimensionality::<Ix4>()
            .map_err(|e| EngineError::PostprocessingFailed(e.to_string()))?;
        let tensor = tensor.index_axis(Axis(0), 0).to_owned();
        Ok(vision::chw_f32_to_frame(&tensor, 255.0, 0.0, true))
    }

    /// Upscale a frame tile by tile and blend against the bicubic upscale of
    /// the original.
    #[tracing::instrument(skip_all)]
    pub fn enhance_frame(&self, frame: &Frame, blend: u32) -> Result<Frame, EngineError> {
        let (height, width, _) = frame.dim();
        let (tiles, pad_width, pad_height) = vision::create_tile_frames(frame, TILE)?;

        let mut enhanced_tiles = Vec::with_capacity(tiles.len());
        for tile in &tiles {
            enhanced_tiles.push(self.enhance_tile(tile)?);
        }

        let scale = self.model_scale;
        let merged = vision::merge_tile_frames(
            &enhanced_tiles,
            width * scale,
            height * scale,
            pad_width * scale,
            pad_height * scale,
            [TILE[0] * scale, TILE[1] * scale, TILE[2] * scale],
        )?;

        // blend_frames bicubic-upscales the original to the merged size.
        Ok(vision::blend_frames(frame, &merged, blend.min(100)))
    }
}

/// Pipeline stage wrapper carrying the configured blend strength.
pub struct FrameEnhancerAdapter {
    enhancer: Arc<FrameEnhancer>,
    blend: u32,
}

impl FrameEnhancerAdapter {
    pub fn new(enhancer: Arc<FrameEnhancer>, blend: u32) -> Self {
        Self { enhancer, blend }
    }
}

#[async_trait]
impl FrameProcessor for FrameEnhancerAdapter {
    fn name(&self) -> String {
        match self.enhancer.kind {
            FrameEnhancerKind::RealEsrgan => "frame_enhancer.real_esrgan".to_string(),
            FrameEnhancerKind::RealHatGan => "frame_enhancer.real_hat_gan".to_string(),
        }
    }

    #[tracing::instrument(skip_all, fields(sequence_id = frame.sequence_id))]
    async fn process(&self, mut frame: FrameData) -> Result<FrameData, EngineError> {
        if frame.is_end_of_stream {
            return Ok(frame);
        }
        let Some(image) = frame.image.take() else {
            return Ok(frame);
        };
        let enhanced = self.enhancer.enhance_frame(&image, self.blend)?;
        frame.image = Some(enhanced);
        Ok(frame)
    }
}
