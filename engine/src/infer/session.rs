use crate::error::EngineError;
use ort::{
    CUDAExecutionProvider, ExecutionProvider, GraphOptimizationLevel, Session, SessionBuilder,
    TensorRTExecutionProvider,
};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::thread::available_parallelism;
use strum::{Display, EnumIter};

/// Execution backends in registration priority order. CPU is the implicit
/// fallback and always available.
#[derive(EnumIter, Display, Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Provider {
    TensorRt,
    Cuda,
    Cpu,
}

/// Options controlling how a session is built. Two distinct option sets on
/// the same model file produce two distinct cached sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionOptions {
    pub providers: Vec<Provider>,
    pub device_id: i32,
    pub trt_max_workspace_mb: u32,
    pub trt_embed_engine: bool,
    pub trt_engine_cache: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            providers: vec![Provider::Cpu],
            device_id: 0,
            trt_max_workspace_mb: 0,
            trt_embed_engine: false,
            trt_engine_cache: false,
        }
    }
}

impl SessionOptions {
    pub fn cpu() -> Self {
        Self::default()
    }

    /// Providers sorted by registration priority, deduplicated.
    pub fn sorted_providers(&self) -> Vec<Provider> {
        let mut providers = self.providers.clone();
        providers.sort_unstable();
        providers.dedup();
        providers
    }

    /// Stable text form used inside composite cache keys.
    pub fn digest(&self) -> String {
        let providers: Vec<String> = self
            .sorted_providers()
            .iter()
            .map(ToString::to_string)
            .collect();
        format!(
            "{}|{}|{}|{}|{}",
            providers.join(","),
            self.device_id,
            self.trt_max_workspace_mb,
            self.trt_embed_engine,
            self.trt_engine_cache,
        )
    }
}

fn register_provider(
    provider: Provider,
    options: &SessionOptions,
    builder: &SessionBuilder,
) -> Result<(), ort::Error> {
    match provider {
        Provider::TensorRt => {
            let mut trt = TensorRTExecutionProvider::default().with_device_id(options.device_id);
            if options.trt_max_workspace_mb > 0 {
                trt = trt
                    .with_max_workspace_size(options.trt_max_workspace_mb as usize * 1024 * 1024);
            }
            if options.trt_engine_cache || options.trt_embed_engine {
                // Embedded engines get their own top-level cache directory,
                // raw engines nest below it.
                let cache_path = if options.trt_embed_engine {
                    "./trt_engine_cache"
                } else {
                    "./trt_engine_cache/trt_engines"
                };
                trt = trt.with_engine_cache(true).with_engine_cache_path(cache_path);
            }
            trt.register(builder)?
        }
        Provider::Cuda => CUDAExecutionProvider::default()
            .with_device_id(options.device_id)
            .register(builder)?,
        Provider::Cpu => (),
    };
    Ok(())
}

/// Wrapper around one loaded `ort::Session` plus the static node metadata
/// read at load time. Thread safety of `run` is delegated to the runtime;
/// callers share instances through `Arc`.
pub struct InferenceSession {
    session: Session,
    model_path: PathBuf,
    input_names: Vec<String>,
    output_names: Vec<String>,
    input_dims: Vec<Vec<i64>>,
}

impl InferenceSession {
    #[tracing::instrument(skip(options))]
    pub fn load(model_path: &Path, options: &SessionOptions) -> Result<Self, EngineError> {
        if !model_path.exists() {
            return Err(EngineError::ModelFileMissing(model_path.to_path_buf()));
        }

        let threads = available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        let builder = Session::builder()
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|builder| builder.with_intra_threads(threads))
            .map_err(|e| EngineError::ModelLoadFailed {
                path: model_path.to_path_buf(),
                message: e.to_string(),
            })?;

        // Providers unavailable at runtime are skipped with a warning; CPU
        // remains as the fallback.
        for provider in options.sorted_providers() {
            if let Err(e) = register_provider(provider, options, &builder) {
                tracing::warn!(%provider, "execution provider unavailable, skipping: {e}");
            }
        }

        let session =
            builder
                .commit_from_file(model_path)
                .map_err(|e| EngineError::ModelLoadFailed {
                    path: model_path.to_path_buf(),
                    message: e.to_string(),
                })?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        let input_dims: Vec<Vec<i64>> = session
            .inputs
            .iter()
            .map(|input| match &input.input_type {
                ort::ValueType::Tensor { dimensions, .. } => dimensions.clone(),
                _ => Vec::new(),
            })
            .collect();

        tracing::debug!(path = %model_path.display(), "model loaded");
        Ok(Self {
            session,
            model_path: model_path.to_path_buf(),
            input_names,
            output_names,
            input_dims,
        })
    }

    pub fn is_model_loaded(&self) -> bool {
        true
    }

    pub fn loaded_model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    pub fn input_dims(&self) -> &[Vec<i64>] {
        &self.input_dims
    }

    /// Name of the first input node, defaulting to "input".
    pub fn primary_input_name(&self) -> String {
        self.input_names
            .first()
            .cloned()
            .unwrap_or_else(|| "input".to_string())
    }

    /// Name of the first output node, defaulting to "output".
    pub fn primary_output_name(&self) -> String {
        self.output_names
            .first()
            .cloned()
            .unwrap_or_else(|| "output".to_string())
    }

    /// Spatial size (height, width) of the first NCHW input, with a fallback
    /// for dynamic or missing dimensions.
    pub fn input_hw_or(&self, fallback: (usize, usize)) -> (usize, usize) {
        let dims = match self.input_dims.first() {
            Some(dims) if dims.len() >= 4 => dims,
            _ => return fallback,
        };
        let height = if dims[2] > 0 {
            dims[2] as usize
        } else {
            fallback.0
        };
        let width = if dims[3] > 0 {
            dims[3] as usize
        } else {
            fallback.1
        };
        (height, width)
    }
}

impl Deref for InferenceSession {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}
