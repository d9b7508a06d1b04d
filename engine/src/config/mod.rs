mod task;
mod validator;

pub use task::{
    AppConfig, ClassifierConfig, ConflictPolicy, DetectorConfig, ExpressionRestorerParams,
    FaceAnalysisConfig, FaceEnhancerParams, FaceSwapperParams, FrameEnhancerParams, IoConfig,
    LandmarkerConfig, MaskerConfig, OutputConfig, PipelineStep, RecognizerConfig, ResourceConfig,
    SelectorModeConfig, StepParams, TaskConfig, TaskInfo,
};
pub use validator::{validate, validate_or_error, ConfigIssue};

use sha1::{Digest, Sha1};

/// Stable digest of a task configuration; checkpoints only resume when the
/// stored hash matches the current one.
pub fn config_hash(config: &TaskConfig) -> String {
    let serialized = serde_json::to_string(config).unwrap_or_default();
    let mut hasher = Sha1::new();
    hasher.update(serialized.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hash_is_stable_and_sensitive() {
        let config = TaskConfig::example();
        assert_eq!(config_hash(&config), config_hash(&config));

        let mut changed = config.clone();
        changed.resource.thread_count = 7;
        assert_ne!(config_hash(&config), config_hash(&changed));
    }
}
