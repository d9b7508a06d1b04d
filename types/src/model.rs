use serde::{Deserialize, Serialize};

/// Coarse model categories as they appear in the catalog file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    FaceDetector,
    FaceLandmarker,
    FaceRecognizer,
    FaceClassifier,
    FaceMasker,
    FaceSwapper,
    FaceEnhancer,
    ExpressionRestorer,
    FrameEnhancer,
    #[serde(other)]
    Other,
}

/// One entry of the model catalog.
///
/// `file_name` is joined with the repository base directory to resolve the
/// on-disk path; the legacy key `path` is accepted as an alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ModelKind,
    #[serde(alias = "path")]
    pub file_name: String,
    #[serde(default)]
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn legacy_path_key_is_accepted() {
        let info: ModelInfo = serde_json::from_str(
            r#"{"name": "inswapper_128", "type": "face_swapper", "path": "inswapper_128.onnx"}"#,
        )
        .expect("legacy catalog entry should parse");
        assert_eq!(info.file_name, "inswapper_128.onnx");
        assert_eq!(info.kind, ModelKind::FaceSwapper);
    }

    #[test]
    fn unknown_kind_maps_to_other() {
        let info: ModelInfo = serde_json::from_str(
            r#"{"name": "x", "type": "unheard_of", "file_name": "x.onnx", "url": ""}"#,
        )
        .expect("catalog entry should parse");
        assert_eq!(info.kind, ModelKind::Other);
    }
}
