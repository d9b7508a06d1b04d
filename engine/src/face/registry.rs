use crate::error::EngineError;
use crate::face::classifier::FairFace;
use crate::face::detector::{self, DetectorKind, FaceDetector};
use crate::face::landmarker::{DenseLandmarker, Landmark68From5, LandmarkerKind};
use crate::face::recognizer::ArcFace;
use crate::infer::{SessionOptions, SessionRegistry};
use crate::mask::{OcclusionMasker, RegionMasker};
use moka::sync::Cache;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Key for one composite face-model instance. Composite models own their
/// pre/post-processing, which is why this cache sits above the raw session
/// registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FaceModelKey {
    kind: FaceModelKind,
    model_path: PathBuf,
    options_digest: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FaceModelKind {
    Detector(DetectorKind),
    DenseLandmarker(LandmarkerKind),
    Landmark68From5,
    Recognizer,
    Classifier,
    OcclusionMasker,
    RegionMasker,
}

#[derive(Clone)]
enum FaceModelHandle {
    Detector(Arc<dyn FaceDetector>),
    DenseLandmarker(Arc<DenseLandmarker>),
    Landmark68From5(Arc<Landmark68From5>),
    Recognizer(Arc<ArcFace>),
    Classifier(Arc<FairFace>),
    OcclusionMasker(Arc<OcclusionMasker>),
    RegionMasker(Arc<RegionMasker>),
}

/// Load-once keyed cache over detector / landmarker / recognizer /
/// classifier / masker instances; handles are shared for the process
/// lifetime.
pub struct FaceModelRegistry {
    sessions: Arc<SessionRegistry>,
    cache: Cache<FaceModelKey, FaceModelHandle>,
}

impl FaceModelRegistry {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self {
            sessions,
            cache: Cache::builder().build(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    fn get_or_build<F>(
        &self,
        key: FaceModelKey,
        build: F,
    ) -> Result<FaceModelHandle, EngineError>
    where
        F: FnOnce() -> Result<FaceModelHandle, EngineError>,
    {
        self.cache
            .try_get_with(key.clone(), build)
            .map_err(|e: Arc<EngineError>| EngineError::ModelLoadFailed {
                path: key.model_path,
                message: e.to_string(),
            })
    }

    pub fn detector(
        &self,
        kind: DetectorKind,
        model_path: &Path,
        options: &SessionOptions,
        score_threshold: f32,
    ) -> Result<Arc<dyn FaceDetector>, EngineError> {
        let key = FaceModelKey {
            kind: FaceModelKind::Detector(kind),
            model_path: model_path.to_path_buf(),
            options_digest: format!("{}|score={score_threshold}", options.digest()),
        };
        let handle = self.get_or_build(key, || {
            detector::create_detector(kind, &self.sessions, model_path, options, score_threshold)
                .map(FaceModelHandle::Detector)
        })?;
        match handle {
            FaceModelHandle::Detector(detector) => Ok(detector),
            _ => unreachable!("detector key always stores a detector"),
        }
    }

    pub fn dense_landmarker(
        &self,
        kind: LandmarkerKind,
        model_path: &Path,
        options: &SessionOptions,
    ) -> Result<Arc<DenseLandmarker>, EngineError> {
        let key = FaceModelKey {
            kind: FaceModelKind::DenseLandmarker(kind),
            model_path: model_path.to_path_buf(),
            options_digest: options.digest(),
        };
        let handle = self.get_or_build(key, || {
            let session = self.sessions.get_session(model_path, options)?;
            Ok(FaceModelHandle::DenseLandmarker(Arc::new(
                DenseLandmarker::new(kind, session),
            )))
        })?;
        match handle {
            FaceModelHandle::DenseLandmarker(landmarker) => Ok(landmarker),
            _ => unreachable!("landmarker key always stores a landmarker"),
        }
    }

    pub fn landmark_68_from_5(
        &self,
        model_path: &Path,
        options: &SessionOptions,
    ) -> Result<Arc<Landmark68From5>, EngineError> {
        let key = FaceModelKey {
            kind: FaceModelKind::Landmark68From5,
            model_path: model_path.to_path_buf(),
            options_digest: options.digest(),
        };
        let handle = self.get_or_build(key, || {
            let session = self.sessions.get_session(model_path, options)?;
            Ok(FaceModelHandle::Landmark68From5(Arc::new(
                Landmark68From5::new(session),
            )))
        })?;
        match handle {
            FaceModelHandle::Landmark68From5(model) => Ok(model),
            _ => unreachable!("68-from-5 key always stores its model"),
        }
    }

    pub fn recognizer(
        &self,
        model_path: &Path,
        options: &SessionOptions,
    ) -> Result<Arc<ArcFace>, EngineError> {
        let key = FaceModelKey {
            kind: FaceModelKind::Recognizer,
            model_path: model_path.to_path_buf(),
            options_digest: options.digest(),
        };
        let handle = self.get_or_build(key, || {
            let session = self.sessions.get_session(model_path, options)?;
            Ok(FaceModelHandle::Recognizer(Arc::new(ArcFace::new(session))))
        })?;
        match handle {
            FaceModelHandle::Recognizer(recognizer) => Ok(recognizer),
            _ => unreachable!("recognizer key always stores a recognizer"),
        }
    }

    pub fn classifier(
        &self,
        model_path: &Path,
        options: &SessionOptions,
    ) -> Result<Arc<FairFace>, EngineError> {
        let key = FaceModelKey {
            kind: FaceModelKind::Classifier,
            model_path: model_path.to_path_buf(),
            options_digest: options.digest(),
        };
        let handle = self.get_or_build(key, || {
            let session = self.sessions.get_session(model_path, options)?;
            Ok(FaceModelHandle::Classifier(Arc::new(FairFace::new(session))))
        })?;
        match handle {
            FaceModelHandle::Classifier(classifier) => Ok(classifier),
            _ => unreachable!("classifier key always stores a classifier"),
        }
    }

    pub fn occlusion_masker(
        &self,
        model_path: &Path,
        options: &SessionOptions,
    ) -> Result<Arc<OcclusionMasker>, EngineError> {
        let key = FaceModelKey {
            kind: FaceModelKind::OcclusionMasker,
            model_path: model_path.to_path_buf(),
            options_digest: options.digest(),
        };
        let handle = self.get_or_build(key, || {
            let session = self.sessions.get_session(model_path, options)?;
            Ok(FaceModelHandle::OcclusionMasker(Arc::new(
                OcclusionMasker::new(session),
            )))
        })?;
        match handle {
            FaceModelHandle::OcclusionMasker(masker) => Ok(masker),
            _ => unreachable!("occlusion key always stores a masker"),
        }
    }

    pub fn region_masker(
        &self,
        model_path: &Path,
        options: &SessionOptions,
    ) -> Result<Arc<RegionMasker>, EngineError> {
        let key = FaceModelKey {
            kind: FaceModelKind::RegionMasker,
            model_path: model_path.to_path_buf(),
            options_digest: options.digest(),
        };
        let handle = self.get_or_build(key, || {
            let session = self.sessions.get_session(model_path, options)?;
            Ok(FaceModelHandle::RegionMasker(Arc::new(RegionMasker::new(
                session,
            ))))
        })?;
        match handle {
            FaceModelHandle::RegionMasker(masker) => Ok(masker),
            _ => unreachable!("region key always stores a masker"),
        }
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}
