use super::task::{SelectorModeConfig, StepParams, TaskConfig};
use crate::error::EngineError;
use visage_types::ErrorCode;

const SUPPORTED_IMAGE_FORMATS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];
const SUPPORTED_STEPS: [&str; 4] = [
    "face_swapper",
    "face_enhancer",
    "expression_restorer",
    "frame_enhancer",
];

/// One violated constraint: where in the document, what was expected, and
/// the stable code surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub yaml_path: String,
    pub expected: String,
    pub code: ErrorCode,
}

impl ConfigIssue {
    fn new(yaml_path: &str, expected: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            yaml_path: yaml_path.to_string(),
            expected: expected.into(),
            code,
        }
    }
}

fn is_valid_task_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Full scan of a merged task configuration; returns every violation.
pub fn validate(config: &TaskConfig) -> Vec<ConfigIssue> {
    let mut issues = Vec::new();

    if !is_valid_task_id(&config.task_info.id) {
        issues.push(ConfigIssue::new(
            "task_info.id",
            "alphanumeric, underscore and dash only",
            ErrorCode::InvalidPath,
        ));
    }

    if config.io.source_paths.is_empty() {
        issues.push(ConfigIssue::new(
            "io.source_paths",
            "at least one source path",
            ErrorCode::RequiredFieldMissing,
        ));
    }
    for (index, path) in config.io.source_paths.iter().enumerate() {
        if !path.exists() {
            issues.push(ConfigIssue::new(
                &format!("io.source_paths[{index}]"),
                "an existing file",
                ErrorCode::InvalidPath,
            ));
        }
    }

    if config.io.target_paths.is_empty() {
        issues.push(ConfigIssue::new(
            "io.target_paths",
            "at least one target path",
            ErrorCode::RequiredFieldMissing,
        ));
    }
    for (index, path) in config.io.target_paths.iter().enumerate() {
        if !path.exists() {
            issues.push(ConfigIssue::new(
                &format!("io.target_paths[{index}]"),
                "an existing file",
                ErrorCode::InvalidPath,
            ));
        }
    }

    if config.io.output.path.as_os_str().is_empty() {
        issues.push(ConfigIssue::new(
            "io.output.path",
            "a non-empty output directory",
            ErrorCode::RequiredFieldMissing,
        ));
    }

    if !SUPPORTED_IMAGE_FORMATS.contains(&config.io.output.image_format.as_str()) {
        issues.push(ConfigIssue::new(
            "io.output.image_format",
            format!("one of {SUPPORTED_IMAGE_FORMATS:?}"),
            ErrorCode::ParameterOutOfRange,
        ));
    }

    if config.io.output.video_quality > 51 {
        issues.push(ConfigIssue::new(
            "io.output.video_quality",
            "0 to 51",
            ErrorCode::ParameterOutOfRange,
        ));
    }

    let detector_score = config.face_analysis.face_detector.score_threshold;
    if !(0.0..=1.0).contains(&detector_score) {
        issues.push(ConfigIssue::new(
            "face_analysis.face_detector.score_threshold",
            "0.0 to 1.0",
            ErrorCode::ParameterOutOfRange,
        ));
    }

    let similarity = config.face_analysis.face_recognizer.similarity_threshold;
    if !(0.0..=2.0).contains(&similarity) {
        issues.push(ConfigIssue::new(
            "face_analysis.face_recognizer.similarity_threshold",
            "0.0 to 2.0",
            ErrorCode::ParameterOutOfRange,
        ));
    }

    if config.resource.thread_count == 0 {
        issues.push(ConfigIssue::new(
            "resource.thread_count",
            "at least 1",
            ErrorCode::ParameterOutOfRange,
        ));
    }
    if config.resource.frame_stride == 0 {
        issues.push(ConfigIssue::new(
            "resource.frame_stride",
            "at least 1",
            ErrorCode::ParameterOutOfRange,
        ));
    }

    if config.pipeline.is_empty() {
        issues.push(ConfigIssue::new(
            "pipeline",
            "at least one step",
            ErrorCode::RequiredFieldMissing,
        ));
    }
    for (index, step) in config.pipeline.iter().enumerate() {
        if !SUPPORTED_STEPS.contains(&step.step.as_str()) {
            issues.push(ConfigIssue::new(
                &format!("pipeline[{index}].step"),
                format!("one of {SUPPORTED_STEPS:?}"),
                ErrorCode::ParameterOutOfRange,
            ));
            continue;
        }
        match &step.params {
            StepParams::FaceSwapper(params) => {
                if params.model.is_empty() {
                    issues.push(ConfigIssue::new(
                        &format!("pipeline[{index}].params.model"),
                        "a model name",
                        ErrorCode::RequiredFieldMissing,
                    ));
                }
                if params.face_selector_mode == SelectorModeConfig::Reference
                    && params.reference_face_path.is_none()
                {
                    issues.push(ConfigIssue::new(
                        &format!("pipeline[{index}].params.reference_face_path"),
                        "a reference image when face_selector_mode is reference",
                        ErrorCode::RequiredFieldMissing,
                    ));
                }
            }
            StepParams::FaceEnhancer(params) => {
                if params.blend > 100 {
                    issues.push(ConfigIssue::new(
                        &format!("pipeline[{index}].params.blend"),
                        "0 to 100",
                        ErrorCode::ParameterOutOfRange,
                    ));
                }
            }
            StepParams::FrameEnhancer(params) => {
                if ![2, 4, 8].contains(&params.scale) {
                    issues.push(ConfigIssue::new(
                        &format!("pipeline[{index}].params.scale"),
                        "2, 4 or 8",
                        ErrorCode::ParameterOutOfRange,
                    ));
                }
                if params.blend > 100 {
                    issues.push(ConfigIssue::new(
                        &format!("pipeline[{index}].params.blend"),
                        "0 to 100",
                        ErrorCode::ParameterOutOfRange,
                    ));
                }
            }
            StepParams::ExpressionRestorer(params) => {
                if !(0.0..=1.0).contains(&params.restore_factor) {
                    issues.push(ConfigIssue::new(
                        &format!("pipeline[{index}].params.restore_factor"),
                        "0.0 to 1.0",
                        ErrorCode::ParameterOutOfRange,
                    ));
                }
            }
        }
    }

    issues
}

/// First violation as an [`EngineError`], or `Ok` on a clean config.
pub fn validate_or_error(config: &TaskConfig) -> Result<(), EngineError> {
    match validate(config).into_iter().next() {
        Some(issue) => Err(EngineError::ConfigInvalid {
            yaml_path: issue.yaml_path,
            expected: issue.expected,
            code: issue.code,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::task::{FaceSwapperParams, PipelineStep};
    use pretty_assertions::assert_eq;
    use std::fs::File;
    use std::path::PathBuf;

    fn valid_config(dir: &std::path::Path) -> TaskConfig {
        let source = dir.join("source.png");
        let target = dir.join("target.png");
        File::create(&source).unwrap();
        File::create(&target).unwrap();

        let mut config = TaskConfig::example();
        config.io.source_paths = vec![source];
        config.io.target_paths = vec![target];
        config.io.output.path = dir.to_path_buf();
        config
    }

    #[test]
    fn a_valid_config_has_no_issues() {
        let dir = tempfile::tempdir().unwrap();
        let config = valid_config(dir.path());
        let issues = validate(&config);
        assert_eq!(issues, Vec::new());
        assert!(validate_or_error(&config).is_ok());
    }

    #[test]
    fn bad_task_ids_report_e206() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_config(dir.path());
        config.task_info.id = "bad id!".to_string();
        let issues = validate(&config);
        assert_eq!(issues[0].yaml_path, "task_info.id");
        assert_eq!(issues[0].code, ErrorCode::InvalidPath);
        assert_eq!(issues[0].code.code(), 206);
    }

    #[test]
    fn missing_and_nonexistent_paths_are_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_config(dir.path());
        config.io.source_paths.clear();
        assert!(validate(&config)
            .iter()
            .any(|issue| issue.yaml_path == "io.source_paths"));

        let mut config = valid_config(dir.path());
        config
            .io
            .source_paths
            .push(PathBuf::from("/non/existent/face.png"));
        assert!(validate(&config)
            .iter()
            .any(|issue| issue.yaml_path == "io.source_paths[1]"
                && issue.code == ErrorCode::InvalidPath));
    }

    #[test]
    fn threshold_and_quality_ranges_are_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_config(dir.path());
        config.face_analysis.face_detector.score_threshold = 1.5;
        assert_eq!(
            validate(&config)[0].yaml_path,
            "face_analysis.face_detector.score_threshold"
        );

        let mut config = valid_config(dir.path());
        config.io.output.video_quality = 200;
        let result = validate_or_error(&config).map(|_| ()).unwrap_err();
        match result {
            EngineError::ConfigInvalid { yaml_path, code, .. } => {
                assert_eq!(yaml_path, "io.output.video_quality");
                assert_eq!(code, ErrorCode::ParameterOutOfRange);
            }
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
    }

    #[test]
    fn pipeline_steps_are_checked() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_config(dir.path());
        config.pipeline.clear();
        assert!(validate(&config)
            .iter()
            .any(|issue| issue.yaml_path == "pipeline"));

        let mut config = valid_config(dir.path());
        config.pipeline[0].step = "invalid_step".to_string();
        assert_eq!(validate(&config)[0].yaml_path, "pipeline[0].step");
    }

    #[test]
    fn reference_mode_needs_a_reference_face() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_config(dir.path());
        config.pipeline[0] = PipelineStep {
            step: "face_swapper".to_string(),
            name: "swap".to_string(),
            enabled: true,
            params: StepParams::FaceSwapper(FaceSwapperParams {
                model: "inswapper_128".to_string(),
                face_selector_mode: SelectorModeConfig::Reference,
                reference_face_path: None,
                face_mask_blur: 0.3,
                face_mask_padding: [0; 4],
            }),
        };
        assert_eq!(
            validate(&config)[0].yaml_path,
            "pipeline[0].params.reference_face_path"
        );
    }

    #[test]
    fn unsupported_image_formats_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_config(dir.path());
        config.io.output.image_format = "gif".to_string();
        assert_eq!(validate(&config)[0].yaml_path, "io.output.image_format");
    }
}
