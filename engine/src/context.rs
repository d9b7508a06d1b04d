use crate::config::AppConfig;
use crate::error::EngineError;
use crate::face::{FaceModelRegistry, FaceStore, FaceStoreOptions};
use crate::infer::{InferenceSession, PoolConfig, SessionOptions, SessionPool, SessionRegistry};
use crate::media::{ImageSequenceBackend, MediaBackend};
use crate::models::ModelRepository;
use crate::processors::ProcessorPool;
use crate::task::CheckpointManager;
use std::sync::Arc;

/// Process-wide collaborators, built once at startup and threaded through
/// callers explicitly. Nothing in here is a lazy global.
pub struct EngineContext {
    pub app_config: AppConfig,
    pub session_options: SessionOptions,
    pub model_repository: Arc<ModelRepository>,
    pub session_registry: Arc<SessionRegistry>,
    pub session_pool: Arc<SessionPool<Arc<InferenceSession>>>,
    pub face_registry: Arc<FaceModelRegistry>,
    pub face_store: Arc<FaceStore>,
    pub processor_pool: Arc<ProcessorPool>,
    pub media_backend: Arc<dyn MediaBackend>,
    pub checkpoint_manager: Arc<CheckpointManager>,
}

impl EngineContext {
    /// Drop every cached session and face so a graceful shutdown releases
    /// GPU memory before process exit.
    pub fn clear_caches(&self) {
        self.session_pool.clear();
        self.session_registry.clear();
        self.face_registry.clear();
        self.face_store.clear_faces();
    }
}

pub struct EngineBuilder {
    app_config: AppConfig,
    session_options: SessionOptions,
    pool_config: PoolConfig,
    store_options: FaceStoreOptions,
    media_backend: Option<Arc<dyn MediaBackend>>,
}

impl EngineBuilder {
    pub fn new(app_config: AppConfig) -> Self {
        Self {
            app_config,
            session_options: SessionOptions::cpu(),
            pool_config: PoolConfig::default(),
            store_options: FaceStoreOptions::default(),
            media_backend: None,
        }
    }

    pub fn with_session_options(mut self, options: SessionOptions) -> Self {
        self.session_options = options;
        self
    }

    pub fn with_pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    pub fn with_store_options(mut self, options: FaceStoreOptions) -> Self {
        self.store_options = options;
        self
    }

    pub fn with_media_backend(mut self, backend: Arc<dyn MediaBackend>) -> Self {
        self.media_backend = Some(backend);
        self
    }

    pub fn build(self) -> Result<EngineContext, EngineError> {
        let model_repository = Arc::new(ModelRepository::new(
            self.app_config.model_base_path.clone(),
        ));
        if self.app_config.model_catalog_path.exists() {
            model_repository.load_catalog(&self.app_config.model_catalog_path)?;
        } else {
            tracing::warn!(
                path = %self.app_config.model_catalog_path.display(),
                "model catalog not found, starting with an empty catalog"
            );
        }

        let session_registry = Arc::new(SessionRegistry::new());
        let session_pool = Arc::new(SessionPool::new(self.pool_config));
        let face_registry = Arc::new(FaceModelRegistry::new(Arc::clone(&session_registry)));
        let face_store = Arc::new(FaceStore::new(self.store_options));
        let processor_pool = Arc::new(ProcessorPool::new(Arc::clone(&session_pool)));
        let checkpoint_manager = Arc::new(CheckpointManager::new(
            self.app_config.checkpoint_dir.clone(),
        )?);
        let media_backend = self
            .media_backend
            .unwrap_or_else(|| Arc::new(ImageSequenceBackend));

        Ok(EngineContext {
            app_config: self.app_config,
            session_options: self.session_options,
            model_repository,
            session_registry,
            session_pool,
            face_registry,
            face_store,
            processor_pool,
            media_backend,
            checkpoint_manager,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_creates_a_working_context() {
        let dir = tempfile::tempdir().unwrap();
        let app_config = AppConfig {
            model_base_path: dir.path().join("models"),
            model_catalog_path: dir.path().join("missing_catalog.json"),
            checkpoint_dir: dir.path().join("checkpoints"),
            ..Default::default()
        };
        let context = EngineBuilder::new(app_config).build().unwrap();
        assert!(context.session_pool.is_empty());
        assert!(context.face_store.is_empty());
        context.clear_caches();
    }
}
