use crate::error::EngineError;
use prost::Message;
use std::path::Path;

/// Minimal ONNX ModelProto subset: just enough of the schema to reach the
/// graph initializers. Unknown fields are skipped by prost.
#[derive(Clone, PartialEq, Message)]
struct ModelProto {
    #[prost(message, optional, tag = "7")]
    graph: Option<GraphProto>,
}

#[derive(Clone, PartialEq, Message)]
struct GraphProto {
    #[prost(message, repeated, tag = "5")]
    initializer: Vec<TensorProto>,
}

#[derive(Clone, PartialEq, Message)]
struct TensorProto {
    #[prost(int64, repeated, tag = "1")]
    dims: Vec<i64>,
    #[prost(int32, optional, tag = "2")]
    data_type: Option<i32>,
    #[prost(float, repeated, tag = "4")]
    float_data: Vec<f32>,
    #[prost(string, optional, tag = "8")]
    name: Option<String>,
    #[prost(bytes = "vec", optional, tag = "9")]
    raw_data: Option<Vec<u8>>,
}

/// The identity-projection matrix InSwapper embeds as the last graph
/// initializer. fp32 exports carry it in `float_data`; fp16 exports keep
/// this particular tensor as raw little-endian f32 bytes.
#[derive(Debug, Clone)]
pub struct EmbeddedMatrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl EmbeddedMatrix {
    pub fn at(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }
}

#[tracing::instrument]
pub fn extract_last_initializer(model_path: &Path) -> Result<EmbeddedMatrix, EngineError> {
    let bytes = std::fs::read(model_path)?;
    let model = ModelProto::decode(bytes.as_slice()).map_err(|e| EngineError::ModelLoadFailed {
        path: model_path.to_path_buf(),
        message: format!("onnx parse error: {e}"),
    })?;

    let graph = model.graph.ok_or_else(|| EngineError::ModelLoadFailed {
        path: model_path.to_path_buf(),
        message: "onnx model has no graph".to_string(),
    })?;
    let tensor = graph
        .initializer
        .last()
        .ok_or_else(|| EngineError::ModelLoadFailed {
            path: model_path.to_path_buf(),
            message: "onnx graph has no initializers".to_string(),
        })?;

    let data: Vec<f32> = if !tensor.float_data.is_empty() {
        tensor.float_data.clone()
    } else {
        let raw = tensor.raw_data.as_deref().unwrap_or_default();
        raw.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    };

    let (rows, cols) = match tensor.dims.as_slice() {
        [rows, cols] if *rows > 0 && *cols > 0 => (*rows as usize, *cols as usize),
        _ => {
            // Square fallback for exports that omit dims on this tensor.
            let side = (data.len() as f64).sqrt() as usize;
            (side, side)
        }
    };
    if rows * cols != data.len() || data.is_empty() {
        return Err(EngineError::ModelLoadFailed {
            path: model_path.to_path_buf(),
            message: format!(
                "embedded matrix has {} values, expected {rows}x{cols}",
                data.len()
            ),
        });
    }

    tracing::debug!(rows, cols, "extracted embedded projection matrix");
    Ok(EmbeddedMatrix {
        rows,
        cols,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn encode_model(initializers: Vec<TensorProto>) -> Vec<u8> {
        let model = ModelProto {
            graph: Some(GraphProto {
                initializer: initializers,
            }),
        };
        model.encode_to_vec()
    }

    #[test]
    fn reads_the_last_float_initializer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        let bytes = encode_model(vec![
            TensorProto {
                dims: vec![1],
                data_type: Some(1),
                float_data: vec![9.0],
                name: Some("ignored".to_string()),
                raw_data: None,
            },
            TensorProto {
                dims: vec![2, 2],
                data_type: Some(1),
                float_data: vec![1.0, 2.0, 3.0, 4.0],
                name: Some("emap".to_string()),
                raw_data: None,
            },
        ]);
        std::fs::write(&path, bytes).unwrap();

        let matrix = extract_last_initializer(&path).unwrap();
        assert_eq!((matrix.rows, matrix.cols), (2, 2));
        assert_eq!(matrix.at(1, 0), 3.0);
    }

    #[test]
    fn raw_data_is_parsed_as_little_endian_f32() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        let mut raw = Vec::new();
        for v in [0.5f32, -1.5, 2.0, 8.0] {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let bytes = encode_model(vec![TensorProto {
            dims: vec![2, 2],
            data_type: Some(1),
            float_data: vec![],
            name: Some("emap".to_string()),
            raw_data: Some(raw),
        }]);
        std::fs::write(&path, bytes).unwrap();

        let matrix = extract_last_initializer(&path).unwrap();
        assert_eq!(matrix.at(0, 1), -1.5);
        assert_eq!(matrix.at(1, 1), 8.0);
    }

    #[test]
    fn missing_graph_is_a_model_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.onnx");
        std::fs::write(&path, ModelProto { graph: None }.encode_to_vec()).unwrap();
        assert!(matches!(
            extract_last_initializer(&path),
            Err(EngineError::ModelLoadFailed { .. })
        ));
    }
}
