pub mod adapter;
pub mod expression_restorer;
pub mod face_enhancer;
pub mod face_swapper;
pub mod frame_enhancer;
pub mod onnx_graph;

pub use adapter::{CropProcessor, FaceProcessorAdapter};
pub use expression_restorer::{ExpressionRestorerAdapter, LivePortrait};
pub use face_enhancer::{FaceEnhancer, FaceEnhancerKind};
pub use face_swapper::InSwapper;
pub use frame_enhancer::{FrameEnhancer, FrameEnhancerAdapter, FrameEnhancerKind};

use crate::error::EngineError;
use crate::infer::{InferenceSession, SessionKey, SessionOptions, SessionPool};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use strum::{Display, EnumIter};
use visage_types::FrameData;

/// Uniform pipeline-stage interface: every concrete processor is presented
/// to the pipeline as `process(FrameData) -> FrameData`.
#[async_trait]
pub trait FrameProcessor: Send + Sync {
    fn name(&self) -> String;

    async fn process(&self, frame: FrameData) -> Result<FrameData, EngineError>;
}

#[derive(EnumIter, Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    FaceSwapper,
    FaceEnhancer,
    ExpressionRestorer,
    FrameEnhancer,
}

impl ProcessorKind {
    pub fn step_name(&self) -> &'static str {
        match self {
            ProcessorKind::FaceSwapper => "face_swapper",
            ProcessorKind::FaceEnhancer => "face_enhancer",
            ProcessorKind::ExpressionRestorer => "expression_restorer",
            ProcessorKind::FrameEnhancer => "frame_enhancer",
        }
    }

    pub fn from_step_name(step: &str) -> Option<Self> {
        match step {
            "face_swapper" => Some(ProcessorKind::FaceSwapper),
            "face_enhancer" => Some(ProcessorKind::FaceEnhancer),
            "expression_restorer" => Some(ProcessorKind::ExpressionRestorer),
            "frame_enhancer" => Some(ProcessorKind::FrameEnhancer),
            _ => None,
        }
    }
}

/// Caches the model-backed inner processors per (model, options) so repeated
/// tasks reuse loaded weights. Adapters stay per-task: they carry task
/// options, the inner processors carry the expensive state.
pub struct ProcessorPool {
    session_pool: Arc<SessionPool<Arc<InferenceSession>>>,
    swappers: Mutex<HashMap<String, Arc<InSwapper>>>,
    face_enhancers: Mutex<HashMap<String, Arc<FaceEnhancer>>>,
    expression_restorers: Mutex<HashMap<String, Arc<LivePortrait>>>,
    frame_enhancers: Mutex<HashMap<String, Arc<FrameEnhancer>>>,
}

impl ProcessorPool {
    pub fn new(session_pool: Arc<SessionPool<Arc<InferenceSession>>>) -> Self {
        Self {
            session_pool,
            swappers: Mutex::new(HashMap::new()),
            face_enhancers: Mutex::new(HashMap::new()),
            expression_restorers: Mutex::new(HashMap::new()),
            frame_enhancers: Mutex::new(HashMap::new()),
        }
    }

    /// Processor sessions go through the bounded pool so heavyweight
    /// generator weights obey the LRU + idle-timeout policy.
    fn session(
        &self,
        model_path: &Path,
        options: &SessionOptions,
    ) -> Result<Arc<InferenceSession>, EngineError> {
        let key = SessionKey::new(model_path, options);
        self.session_pool
            .get_or_create(&key, || InferenceSession::load(model_path, options).map(Arc::new))
    }

    fn cache_key(paths: &[&Path], options: &SessionOptions) -> String {
        let joined: Vec<String> = paths
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        format!("{}#{}", joined.join("+"), options.digest())
    }

    pub fn in_swapper(
        &self,
        model_path: &Path,
        options: &SessionOptions,
    ) -> Result<Arc<InSwapper>, EngineError> {
        let key = Self::cache_key(&[model_path], options);
        let mut cache = self
            .swappers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(swapper) = cache.get(&key) {
            return Ok(Arc::clone(swapper));
        }
        let session = self.session(model_path, options)?;
        let swapper = Arc::new(InSwapper::load(session, model_path)?);
        cache.insert(key, Arc::clone(&swapper));
        Ok(swapper)
    }

    pub fn face_enhancer(
        &self,
        kind: FaceEnhancerKind,
        model_path: &Path,
        options: &SessionOptions,
    ) -> Result<Arc<FaceEnhancer>, EngineError> {
        let key = format!("{kind}#{}", Self::cache_key(&[model_path], options));
        let mut cache = self
            .face_enhancers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(enhancer) = cache.get(&key) {
            return Ok(Arc::clone(enhancer));
        }
        let session = self.session(model_path, options)?;
        let enhancer = Arc::new(FaceEnhancer::new(kind, session));
        cache.insert(key, Arc::clone(&enhancer));
        Ok(enhancer)
    }

    pub fn live_portrait(
        &self,
        feature_path: &Path,
        motion_path: &Path,
        generator_path: &Path,
        options: &SessionOptions,
    ) -> Result<Arc<LivePortrait>, EngineError> {
        let key = Self::cache_key(&[feature_path, motion_path, generator_path], options);
        let mut cache = self
            .expression_restorers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(restorer) = cache.get(&key) {
            return Ok(Arc::clone(restorer));
        }
        let restorer = Arc::new(LivePortrait::new(
            self.session(feature_path, options)?,
            self.session(motion_path, options)?,
            self.session(generator_path, options)?,
        ));
        cache.insert(key, Arc::clone(&restorer));
        Ok(restorer)
    }

    pub fn frame_enhancer(
        &self,
        kind: FrameEnhancerKind,
        model_path: &Path,
        options: &SessionOptions,
        model_scale: usize,
    ) -> Result<Arc<FrameEnhancer>, EngineError> {
        let key = format!(
            "{kind}x{model_scale}#{}",
            Self::cache_key(&[model_path], options)
        );
        let mut cache = self
            .frame_enhancers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(enhancer) = cache.get(&key) {
            return Ok(Arc::clone(enhancer));
        }
        let session = self.session(model_path, options)?;
        let enhancer = Arc::new(FrameEnhancer::new(kind, session, model_scale));
        cache.insert(key, Arc::clone(&enhancer));
        Ok(enhancer)
    }

    pub fn clear(&self, kind: ProcessorKind) {
        match kind {
            ProcessorKind::FaceSwapper => self
                .swappers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clear(),
            ProcessorKind::FaceEnhancer => self
                .face_enhancers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clear(),
            ProcessorKind::ExpressionRestorer => self
                .expression_restorers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clear(),
            ProcessorKind::FrameEnhancer => self
                .frame_enhancers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clear(),
        }
    }
}
