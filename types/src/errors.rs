use serde::{Deserialize, Serialize};

/// Stable error taxonomy surfaced to users.
///
/// The prefix encodes the category: E1xx system, E2xx configuration,
/// E3xx model, E4xx runtime. `E403 NoFaceDetected` and `E404 FaceNotAligned`
/// are per-frame recoverable; everything else fails the task or media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // System
    SystemError,
    OutOfMemory,
    DeviceNotFound,
    ThreadDeadlock,
    GpuContextLost,
    // Config
    ConfigError,
    ConfigFormatInvalid,
    ParameterOutOfRange,
    ConfigFileNotFound,
    ConfigVersionMismatch,
    RequiredFieldMissing,
    InvalidPath,
    // Model
    ModelError,
    ModelLoadFailed,
    ModelFileMissing,
    ModelChecksumMismatch,
    ModelVersionIncompatible,
    // Runtime
    RuntimeError,
    ImageDecodeFailed,
    VideoOpenFailed,
    NoFaceDetected,
    FaceNotAligned,
    ProcessorFailed,
    OutputWriteFailed,
    TaskCancelled,
}

impl ErrorCode {
    pub fn code(&self) -> u32 {
        match self {
            ErrorCode::SystemError => 100,
            ErrorCode::OutOfMemory => 101,
            ErrorCode::DeviceNotFound => 102,
            ErrorCode::ThreadDeadlock => 103,
            ErrorCode::GpuContextLost => 104,
            ErrorCode::ConfigError => 200,
            ErrorCode::ConfigFormatInvalid => 201,
            ErrorCode::ParameterOutOfRange => 202,
            ErrorCode::ConfigFileNotFound => 203,
            ErrorCode::ConfigVersionMismatch => 204,
            ErrorCode::RequiredFieldMissing => 205,
            ErrorCode::InvalidPath => 206,
            ErrorCode::ModelError => 300,
            ErrorCode::ModelLoadFailed => 301,
            ErrorCode::ModelFileMissing => 302,
            ErrorCode::ModelChecksumMismatch => 303,
            ErrorCode::ModelVersionIncompatible => 304,
            ErrorCode::RuntimeError => 400,
            ErrorCode::ImageDecodeFailed => 401,
            ErrorCode::VideoOpenFailed => 402,
            ErrorCode::NoFaceDetected => 403,
            ErrorCode::FaceNotAligned => 404,
            ErrorCode::ProcessorFailed => 405,
            ErrorCode::OutputWriteFailed => 406,
            ErrorCode::TaskCancelled => 407,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::SystemError => "Generic system error",
            ErrorCode::OutOfMemory => "System ran out of memory (RAM or VRAM)",
            ErrorCode::DeviceNotFound => "CUDA device not found or lost",
            ErrorCode::ThreadDeadlock => "Worker thread deadlock detected",
            ErrorCode::GpuContextLost => "GPU context unexpectedly lost",
            ErrorCode::ConfigError => "Generic configuration error",
            ErrorCode::ConfigFormatInvalid => "Configuration format is invalid",
            ErrorCode::ParameterOutOfRange => "Parameter value is out of valid range",
            ErrorCode::ConfigFileNotFound => "Configuration file not found",
            ErrorCode::ConfigVersionMismatch => "Config version is incompatible",
            ErrorCode::RequiredFieldMissing => "Required configuration field is missing",
            ErrorCode::InvalidPath => "Path validation failed",
            ErrorCode::ModelError => "Generic model error",
            ErrorCode::ModelLoadFailed => "Failed to load AI model",
            ErrorCode::ModelFileMissing => "Model file does not exist",
            ErrorCode::ModelChecksumMismatch => "Model file corrupted",
            ErrorCode::ModelVersionIncompatible => "Model version not supported",
            ErrorCode::RuntimeError => "Generic runtime error",
            ErrorCode::ImageDecodeFailed => "Failed to decode image",
            ErrorCode::VideoOpenFailed => "Failed to open video file",
            ErrorCode::NoFaceDetected => "No face detected in frame",
            ErrorCode::FaceNotAligned => "Face alignment failed",
            ErrorCode::ProcessorFailed => "Processor execution failed",
            ErrorCode::OutputWriteFailed => "Failed to write output",
            ErrorCode::TaskCancelled => "Task was cancelled",
        }
    }

    pub fn remediation(&self) -> &'static str {
        match self {
            ErrorCode::OutOfMemory => "Reduce batch size or concurrent threads",
            ErrorCode::DeviceNotFound => "Check GPU driver and hardware",
            ErrorCode::ThreadDeadlock => "Restart the application",
            ErrorCode::ConfigFormatInvalid => "Fix configuration syntax errors",
            ErrorCode::ParameterOutOfRange => "Adjust parameter to valid range",
            ErrorCode::ConfigFileNotFound => "Verify file path exists",
            ErrorCode::RequiredFieldMissing => "Add the missing field to the configuration",
            ErrorCode::InvalidPath => "Verify the referenced path exists",
            ErrorCode::ModelLoadFailed => "Check model file integrity",
            ErrorCode::ModelFileMissing => "Run the model download script",
            ErrorCode::ImageDecodeFailed => "Skip corrupted frame",
            ErrorCode::VideoOpenFailed => "Check video file format",
            ErrorCode::NoFaceDetected => "Frame will be passed through",
            ErrorCode::FaceNotAligned => "Frame will be skipped",
            ErrorCode::OutputWriteFailed => "Check output directory permissions",
            _ => "Contact support",
        }
    }

    /// Recoverable codes let the frame pass through unchanged; the task
    /// continues.
    pub fn is_per_frame_recoverable(&self) -> bool {
        matches!(self, ErrorCode::NoFaceDetected | ErrorCode::FaceNotAligned)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorCode::InvalidPath.to_string(), "E206");
        assert_eq!(ErrorCode::NoFaceDetected.to_string(), "E403");
        assert_eq!(ErrorCode::ModelFileMissing.code(), 302);
    }

    #[test]
    fn only_no_face_and_not_aligned_are_recoverable() {
        assert!(ErrorCode::NoFaceDetected.is_per_frame_recoverable());
        assert!(ErrorCode::FaceNotAligned.is_per_frame_recoverable());
        assert!(!ErrorCode::ProcessorFailed.is_per_frame_recoverable());
        assert!(!ErrorCode::TaskCancelled.is_per_frame_recoverable());
    }
}
