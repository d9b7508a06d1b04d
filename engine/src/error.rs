use std::path::PathBuf;
use thiserror::Error;
use visage_types::ErrorCode;

/// Engine-wide error type. Every variant maps to one stable [`ErrorCode`]
/// so callers can surface a numeric code, description and remediation
/// without matching on internals.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Model file does not exist: {0}")]
    ModelFileMissing(PathBuf),
    #[error("Failed to load model {path}: {message}")]
    ModelLoadFailed { path: PathBuf, message: String },
    #[error("Model {0} not found in catalog")]
    ModelNotInCatalog(String),
    #[error("Inference run failed: {0}")]
    InferenceFailed(String),
    #[error("Preprocessing failed: {0}")]
    PreprocessingFailed(String),
    #[error("Postprocessing failed: {0}")]
    PostprocessingFailed(String),
    #[error("No face detected in frame")]
    NoFaceDetected,
    #[error("Face alignment failed: {0}")]
    FaceNotAligned(String),
    #[error("Processor {name} failed: {message}")]
    ProcessorFailed { name: String, message: String },
    #[error("Failed to decode image {0}")]
    ImageDecodeFailed(PathBuf),
    #[error("Failed to open media source {path}: {message}")]
    MediaOpenFailed { path: PathBuf, message: String },
    #[error("Failed to write output {path}: {message}")]
    OutputWriteFailed { path: PathBuf, message: String },
    #[error("Task was cancelled")]
    TaskCancelled,
    #[error("Configuration invalid at {yaml_path}: {expected}")]
    ConfigInvalid {
        yaml_path: String,
        expected: String,
        code: ErrorCode,
    },
    #[error("Allocation failure: {0}")]
    Allocation(String),
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::ModelFileMissing(_) => ErrorCode::ModelFileMissing,
            EngineError::ModelLoadFailed { .. } => ErrorCode::ModelLoadFailed,
            EngineError::ModelNotInCatalog(_) => ErrorCode::ModelFileMissing,
            EngineError::InferenceFailed(_) => ErrorCode::ProcessorFailed,
            EngineError::PreprocessingFailed(_) => ErrorCode::ProcessorFailed,
            EngineError::PostprocessingFailed(_) => ErrorCode::ProcessorFailed,
            EngineError::NoFaceDetected => ErrorCode::NoFaceDetected,
            EngineError::FaceNotAligned(_) => ErrorCode::FaceNotAligned,
            EngineError::ProcessorFailed { .. } => ErrorCode::ProcessorFailed,
            EngineError::ImageDecodeFailed(_) => ErrorCode::ImageDecodeFailed,
            EngineError::MediaOpenFailed { .. } => ErrorCode::VideoOpenFailed,
            EngineError::OutputWriteFailed { .. } => ErrorCode::OutputWriteFailed,
            EngineError::TaskCancelled => ErrorCode::TaskCancelled,
            EngineError::ConfigInvalid { code, .. } => *code,
            EngineError::Allocation(_) => ErrorCode::OutOfMemory,
            EngineError::Io(_) => ErrorCode::SystemError,
            EngineError::Serde(_) => ErrorCode::ConfigFormatInvalid,
        }
    }

    /// Recoverable errors are caught at the stage boundary: the frame passes
    /// through unchanged and a counter increments.
    pub fn is_per_frame_recoverable(&self) -> bool {
        self.code().is_per_frame_recoverable()
    }
}

impl From<ort::Error> for EngineError {
    fn from(err: ort::Error) -> Self {
        EngineError::InferenceFailed(err.to_string())
    }
}

impl From<std::collections::TryReserveError> for EngineError {
    fn from(err: std::collections::TryReserveError) -> Self {
        EngineError::Allocation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_the_taxonomy() {
        assert_eq!(
            EngineError::ModelFileMissing(PathBuf::from("x.onnx")).code(),
            ErrorCode::ModelFileMissing
        );
        assert_eq!(EngineError::NoFaceDetected.code(), ErrorCode::NoFaceDetected);
        assert_eq!(EngineError::TaskCancelled.code(), ErrorCode::TaskCancelled);
    }

    #[test]
    fn recoverability_is_derived_from_the_code() {
        assert!(EngineError::NoFaceDetected.is_per_frame_recoverable());
        assert!(
            !EngineError::InferenceFailed("boom".to_string()).is_per_frame_recoverable()
        );
    }
}
