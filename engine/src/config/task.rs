use crate::media::AudioPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    Error,
    Overwrite,
    Rename,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorModeConfig {
    #[default]
    Many,
    One,
    Reference,
}

fn default_image_format() -> String {
    "png".to_string()
}

fn default_video_encoder() -> String {
    "libx264".to_string()
}

fn default_video_quality() -> u32 {
    // 80% of the 0-51 scale.
    (51.0 * 0.8) as u32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    #[serde(default = "default_image_format")]
    pub image_format: String,
    #[serde(default = "default_video_encoder")]
    pub video_encoder: String,
    #[serde(default = "default_video_quality")]
    pub video_quality: u32,
    #[serde(default)]
    pub audio_policy: AudioPolicy,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            prefix: String::new(),
            suffix: String::new(),
            image_format: default_image_format(),
            video_encoder: default_video_encoder(),
            video_quality: default_video_quality(),
            audio_policy: AudioPolicy::default(),
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IoConfig {
    pub source_paths: Vec<PathBuf>,
    pub target_paths: Vec<PathBuf>,
    pub output: OutputConfig,
}

fn default_thread_count() -> usize {
    2
}

fn default_max_queue_size() -> usize {
    16
}

fn default_frame_stride() -> u64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Stop the producer after this many frames.
    #[serde(default)]
    pub max_frames: Option<u64>,
    /// Process every Nth source frame.
    #[serde(default = "default_frame_stride")]
    pub frame_stride: u64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            thread_count: default_thread_count(),
            max_queue_size: default_max_queue_size(),
            max_frames: None,
            frame_stride: default_frame_stride(),
        }
    }
}

fn default_detector_models() -> Vec<String> {
    vec!["yoloface_8n".to_string()]
}

fn default_score_threshold() -> f32 {
    0.5
}

fn default_similarity_threshold() -> f32 {
    0.6
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_models")]
    pub models: Vec<String>,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            models: default_detector_models(),
            score_threshold: default_score_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandmarkerConfig {
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    #[serde(default)]
    pub landmark_68_from_5_model: Option<String>,
}

impl Default for LandmarkerConfig {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            score_threshold: default_score_threshold(),
            landmark_68_from_5_model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            model: None,
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaskerConfig {
    #[serde(default)]
    pub occlusion_model: Option<String>,
    #[serde(default)]
    pub region_model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaceAnalysisConfig {
    #[serde(default)]
    pub face_detector: DetectorConfig,
    #[serde(default)]
    pub face_landmarker: LandmarkerConfig,
    #[serde(default)]
    pub face_recognizer: RecognizerConfig,
    #[serde(default)]
    pub face_classifier: ClassifierConfig,
    #[serde(default)]
    pub face_masker: MaskerConfig,
}

fn default_blend() -> u32 {
    80
}

fn default_mask_blur() -> f32 {
    0.3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceSwapperParams {
    pub model: String,
    #[serde(default)]
    pub face_selector_mode: SelectorModeConfig,
    #[serde(default)]
    pub reference_face_path: Option<PathBuf>,
    #[serde(default = "default_mask_blur")]
    pub face_mask_blur: f32,
    #[serde(default)]
    pub face_mask_padding: [u32; 4],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceEnhancerParams {
    pub model: String,
    #[serde(default = "default_blend")]
    pub blend: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameEnhancerParams {
    pub model: String,
    pub scale: usize,
    #[serde(default = "default_blend")]
    pub blend: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionRestorerParams {
    pub model: String,
    pub restore_factor: f32,
}

/// Per-step parameters. The sibling `step` field selects the variant, so
/// deserialization dispatches on it explicitly instead of guessing from the
/// payload shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StepParams {
    ExpressionRestorer(ExpressionRestorerParams),
    FrameEnhancer(FrameEnhancerParams),
    FaceEnhancer(FaceEnhancerParams),
    FaceSwapper(FaceSwapperParams),
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStep {
    pub step: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub params: StepParams,
}

fn default_enabled() -> bool {
    true
}

impl<'de> Deserialize<'de> for PipelineStep {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawStep {
            step: String,
            #[serde(default)]
            name: String,
            #[serde(default = "default_enabled")]
            enabled: bool,
            params: serde_json::Value,
        }

        let raw = RawStep::deserialize(deserializer)?;
        let params = match raw.step.as_str() {
            "face_swapper" => StepParams::FaceSwapper(
                serde_json::from_value(raw.params).map_err(serde::de::Error::custom)?,
            ),
            "face_enhancer" => StepParams::FaceEnhancer(
                serde_json::from_value(raw.params).map_err(serde::de::Error::custom)?,
            ),
            "frame_enhancer" => StepParams::FrameEnhancer(
                serde_json::from_value(raw.params).map_err(serde::de::Error::custom)?,
            ),
            "expression_restorer" => StepParams::ExpressionRestorer(
                serde_json::from_value(raw.params).map_err(serde::de::Error::custom)?,
            ),
            // Unknown step names keep their raw params long enough for the
            // validator to report the step, not a parse failure.
            _ => StepParams::FaceSwapper(
                serde_json::from_value(serde_json::json!({ "model": "" }))
                    .map_err(serde::de::Error::custom)?,
            ),
        };
        Ok(PipelineStep {
            step: raw.step,
            name: raw.name,
            enabled: raw.enabled,
            params,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    pub task_info: TaskInfo,
    pub io: IoConfig,
    #[serde(default)]
    pub resource: ResourceConfig,
    #[serde(default)]
    pub face_analysis: FaceAnalysisConfig,
    pub pipeline: Vec<PipelineStep>,
}

impl TaskConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// A minimal valid config used by tests.
    pub fn example() -> Self {
        Self {
            task_info: TaskInfo {
                id: "example_task".to_string(),
                description: String::new(),
            },
            io: IoConfig {
                source_paths: vec![PathBuf::from("source.png")],
                target_paths: vec![PathBuf::from("target.png")],
                output: OutputConfig {
                    path: PathBuf::from("out"),
                    ..Default::default()
                },
            },
            resource: ResourceConfig::default(),
            face_analysis: FaceAnalysisConfig::default(),
            pipeline: vec![PipelineStep {
                step: "face_swapper".to_string(),
                name: "swapper_1".to_string(),
                enabled: true,
                params: StepParams::FaceSwapper(FaceSwapperParams {
                    model: "inswapper_128".to_string(),
                    face_selector_mode: SelectorModeConfig::Many,
                    reference_face_path: None,
                    face_mask_blur: default_mask_blur(),
                    face_mask_padding: [0; 4],
                }),
            }],
        }
    }
}

/// Application-level defaults merged under partial task configs, plus the
/// paths the engine needs at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model_base_path: PathBuf,
    pub model_catalog_path: PathBuf,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    #[serde(default)]
    pub metrics_path: Option<PathBuf>,
    #[serde(default)]
    pub face_analysis: FaceAnalysisConfig,
    #[serde(default)]
    pub resource: ResourceConfig,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("./checkpoints")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model_base_path: PathBuf::from("./assets/models"),
            model_catalog_path: PathBuf::from("./assets/models_info.json"),
            checkpoint_dir: default_checkpoint_dir(),
            metrics_path: None,
            face_analysis: FaceAnalysisConfig::default(),
            resource: ResourceConfig::default(),
        }
    }
}

impl AppConfig {
    /// Fill analysis models the task left unset from the app defaults.
    pub fn merge_into(&self, task: &mut TaskConfig) {
        let analysis = &mut task.face_analysis;
        if analysis.face_detector.models.is_empty() {
            analysis.face_detector.models = self.face_analysis.face_detector.models.clone();
        }
        if analysis.face_landmarker.models.is_empty() {
            analysis.face_landmarker.models = self.face_analysis.face_landmarker.models.clone();
        }
        if analysis.face_landmarker.landmark_68_from_5_model.is_none() {
            analysis.face_landmarker.landmark_68_from_5_model = self
                .face_analysis
                .face_landmarker
                .landmark_68_from_5_model
                .clone();
        }
        if analysis.face_recognizer.model.is_none() {
            analysis.face_recognizer.model = self.face_analysis.face_recognizer.model.clone();
        }
        if analysis.face_classifier.model.is_none() {
            analysis.face_classifier.model = self.face_analysis.face_classifier.model.clone();
        }
        if analysis.face_masker.occlusion_model.is_none() {
            analysis.face_masker.occlusion_model =
                self.face_analysis.face_masker.occlusion_model.clone();
        }
        if analysis.face_masker.region_model.is_none() {
            analysis.face_masker.region_model = self.face_analysis.face_masker.region_model.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn step_params_deserialize_by_shape() {
        let step: PipelineStep = serde_json::from_str(
            r#"{"step": "face_swapper", "name": "s", "params": {"model": "inswapper_128"}}"#,
        )
        .unwrap();
        assert!(matches!(step.params, StepParams::FaceSwapper(_)));
        assert!(step.enabled);

        let step: PipelineStep = serde_json::from_str(
            r#"{"step": "frame_enhancer", "params": {"model": "real_esrgan_x4", "scale": 4}}"#,
        )
        .unwrap();
        assert!(matches!(step.params, StepParams::FrameEnhancer(_)));

        let step: PipelineStep = serde_json::from_str(
            r#"{"step": "expression_restorer", "params": {"model": "live_portrait", "restore_factor": 0.8}}"#,
        )
        .unwrap();
        assert!(matches!(step.params, StepParams::ExpressionRestorer(_)));
    }

    #[test]
    fn app_defaults_fill_missing_models() {
        let app = AppConfig {
            face_analysis: FaceAnalysisConfig {
                face_recognizer: RecognizerConfig {
                    model: Some("arcface_w600k_r50".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };
        let mut task = TaskConfig::example();
        task.face_analysis.face_detector.models.clear();
        app.merge_into(&mut task);
        assert_eq!(
            task.face_analysis.face_recognizer.model.as_deref(),
            Some("arcface_w600k_r50")
        );
        assert!(!task.face_analysis.face_detector.models.is_empty());
    }

    #[test]
    fn video_quality_default_is_eighty_percent_of_scale() {
        let output = OutputConfig::default();
        assert_eq!(output.video_quality, 40);
    }
}
