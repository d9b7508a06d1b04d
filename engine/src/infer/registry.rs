use crate::error::EngineError;
use crate::infer::session::{InferenceSession, Provider, SessionOptions};
use moka::sync::Cache;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Uniquely identifies a cached inference session: the absolute model path
/// plus every execution option that changes how the runtime is configured.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub model_path: PathBuf,
    pub providers: Vec<Provider>,
    pub device_id: i32,
    pub trt_max_workspace_mb: u32,
    pub trt_embed_engine: bool,
    pub trt_engine_cache: bool,
}

impl SessionKey {
    pub fn new(model_path: &Path, options: &SessionOptions) -> Self {
        let model_path = model_path
            .canonicalize()
            .unwrap_or_else(|_| model_path.to_path_buf());
        Self {
            model_path,
            providers: options.sorted_providers(),
            device_id: options.device_id,
            trt_max_workspace_mb: options.trt_max_workspace_mb,
            trt_embed_engine: options.trt_embed_engine,
            trt_engine_cache: options.trt_engine_cache,
        }
    }
}

/// Process-wide identity cache over loaded sessions.
///
/// Unbounded by design: the bounded [`crate::infer::SessionPool`] sits in
/// front of it when eviction is wanted. `try_get_with` guarantees at most
/// one concurrent load per key; concurrent callers for the same key block on
/// the single loader.
pub struct SessionRegistry {
    cache: Cache<SessionKey, Arc<InferenceSession>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            cache: Cache::builder().build(),
        }
    }

    #[tracing::instrument(skip(self, options))]
    pub fn get_session(
        &self,
        model_path: &Path,
        options: &SessionOptions,
    ) -> Result<Arc<InferenceSession>, EngineError> {
        let key = SessionKey::new(model_path, options);
        self.cache
            .try_get_with(key, || {
                InferenceSession::load(model_path, options).map(Arc::new)
            })
            .map_err(|e: Arc<EngineError>| EngineError::ModelLoadFailed {
                path: model_path.to_path_buf(),
                message: e.to_string(),
            })
    }

    pub fn contains(&self, model_path: &Path, options: &SessionOptions) -> bool {
        self.cache.contains_key(&SessionKey::new(model_path, options))
    }

    pub fn invalidate(&self, model_path: &Path, options: &SessionOptions) {
        self.cache.invalidate(&SessionKey::new(model_path, options));
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}
