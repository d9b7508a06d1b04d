use crate::error::EngineError;
use crate::face::detector::{DetectorHub, DetectorKind};
use crate::face::helper;
use crate::face::landmarker::{LandmarkerHub, LandmarkerKind};
use crate::face::registry::FaceModelRegistry;
use crate::face::selector::{self, SelectorOptions};
use crate::face::store::FaceStore;
use crate::infer::SessionOptions;
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use std::sync::Arc;
use visage_types::{Face, Frame};

/// Which per-face stages run after detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyserMode {
    pub landmark: bool,
    pub recognize: bool,
    pub classify: bool,
}

impl Default for AnalyserMode {
    fn default() -> Self {
        Self {
            landmark: true,
            recognize: true,
            classify: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyserConfig {
    pub detectors: Vec<(DetectorKind, PathBuf)>,
    pub landmarkers: Vec<(LandmarkerKind, PathBuf)>,
    pub landmark_68_from_5: Option<PathBuf>,
    pub recognizer: Option<PathBuf>,
    pub classifier: Option<PathBuf>,
    pub session_options: SessionOptions,
    pub detector_score_threshold: f32,
    pub landmarker_score_threshold: f32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            detectors: Vec::new(),
            landmarkers: Vec::new(),
            landmark_68_from_5: None,
            recognizer: None,
            classifier: None,
            session_options: SessionOptions::cpu(),
            detector_score_threshold: 0.5,
            landmarker_score_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnalyserOptions {
    pub mode: AnalyserMode,
    pub selector: SelectorOptions,
}

/// Detection → landmarking → recognition → classification over one frame,
/// with results cached in the face store by frame hash.
///
/// The analyser owns no session: every sub-model is obtained lazily from
/// the face model registry and shared from there.
pub struct FaceAnalyser {
    registry: Arc<FaceModelRegistry>,
    config: AnalyserConfig,
    store: Arc<FaceStore>,
    detector_hub: OnceCell<DetectorHub>,
    landmarker_hub: OnceCell<LandmarkerHub>,
}

impl FaceAnalyser {
    pub fn new(registry: Arc<FaceModelRegistry>, store: Arc<FaceStore>, config: AnalyserConfig) -> Self {
        Self {
            registry,
            config,
            store,
            detector_hub: OnceCell::new(),
            landmarker_hub: OnceCell::new(),
        }
    }

    pub fn store(&self) -> &Arc<FaceStore> {
        &self.store
    }

    fn detector_hub(&self) -> Result<&DetectorHub, EngineError> {
        self.detector_hub.get_or_try_init(|| {
            let mut detectors = Vec::with_capacity(self.config.detectors.len());
            for (kind, path) in &self.config.detectors {
                let detector = self.registry.detector(
                    *kind,
                    path,
                    &self.config.session_options,
                    self.config.detector_score_threshold,
                )?;
                detectors.push((*kind, detector));
            }
            Ok(DetectorHub::new(detectors))
        })
    }

    fn landmarker_hub(&self) -> Result<&LandmarkerHub, EngineError> {
        self.landmarker_hub.get_or_try_init(|| {
            let mut dense = Vec::with_capacity(self.config.landmarkers.len());
            for (kind, path) in &self.config.landmarkers {
                dense.push(self.registry.dense_landmarker(
                    *kind,
                    path,
                    &self.config.session_options,
                )?);
            }
            let from_five = match &self.config.landmark_68_from_5 {
                Some(path) => Some(
                    self.registry
                        .landmark_68_from_5(path, &self.config.session_options)?,
                ),
                None => None,
            };
            Ok(LandmarkerHub::new(dense, from_five))
        })
    }

    /// Detect and fully describe every face in the frame, rotating through
    /// 0°/90°/180°/270° until the detectors find a candidate.
    #[tracing::instrument(skip_all)]
    pub fn get_many_faces(
        &self,
        frame: &Frame,
        options: &AnalyserOptions,
    ) -> Result<Vec<Face>, EngineError> {
        if let Some(cached) = self.store.get_faces(frame) {
            return Ok(selector::select_faces(cached, &options.selector));
        }

        let hub = self.detector_hub()?;
        if hub.is_empty() {
            return Ok(Vec::new());
        }

        let mut detections = Vec::new();
        let mut detected_angle = 0;
        for angle in (0..360).step_by(90) {
            detections = hub.detect_rotated(frame, angle)?;
            if !detections.is_empty() {
                detected_angle = angle;
                break;
            }
        }
        if detections.is_empty() {
            return Ok(Vec::new());
        }

        let faces = self.create_faces(frame, detections, detected_angle, options)?;
        self.store.insert_faces(frame, &faces);
        Ok(selector::select_faces(faces, &options.selector))
    }

    /// The face at `position` after selection; positions past the end clamp
    /// to the last face.
    pub fn get_one_face(
        &self,
        frame: &Frame,
        position: usize,
        options: &AnalyserOptions,
    ) -> Result<Option<Face>, EngineError> {
        let mut faces = self.get_many_faces(frame, options)?;
        if faces.is_empty() {
            return Ok(None);
        }
        let index = position.min(faces.len() - 1);
        Ok(Some(faces.swap_remove(index)))
    }

    /// Mean identity over a set of frames: every face found contributes.
    pub fn get_average_face_from_frames(
        &self,
        frames: &[Frame],
        options: &AnalyserOptions,
    ) -> Result<Option<Face>, EngineError> {
        let mut faces = Vec::new();
        for frame in frames {
            faces.extend(self.get_many_faces(frame, options)?);
        }
        Ok(Self::get_average_face(faces))
    }

    /// Arithmetic-mean embedding over faces; the normed embedding is the
    /// unit-normalized mean.
    pub fn get_average_face(faces: Vec<Face>) -> Option<Face> {
        let mut iter = faces.into_iter();
        let mut average = iter.next()?;
        let rest: Vec<Face> = iter.collect();
        if rest.is_empty() {
            return Some(average);
        }

        let mut embeddings = vec![average.embedding.clone()];
        embeddings.extend(rest.iter().map(|face| face.embedding.clone()));
        average.embedding = helper::calc_average_embedding(&embeddings);
        average.normed_embedding = helper::normalize_embedding(&average.embedding);
        Some(average)
    }

    /// Faces in the target whose cosine distance to any reference is below
    /// `distance`.
    pub fn find_similar_faces(
        &self,
        references: &[Face],
        frame: &Frame,
        distance: f32,
        options: &AnalyserOptions,
    ) -> Result<Vec<Face>, EngineError> {
        let faces = self.get_many_faces(frame, options)?;
        Ok(faces
            .into_iter()
            .filter(|face| {
                references
                    .iter()
                    .any(|reference| Self::compare_face(face, reference, distance))
            })
            .collect())
    }

    pub fn compare_face(face: &Face, reference: &Face, distance: f32) -> bool {
        Self::calculate_face_distance(face, reference) < distance
    }

    pub fn calculate_face_distance(a: &Face, b: &Face) -> f32 {
        if a.normed_embedding.is_empty() || b.normed_embedding.is_empty() {
            return 0.0;
        }
        helper::cosine_distance(&a.normed_embedding, &b.normed_embedding)
    }

    fn create_faces(
        &self,
        frame: &Frame,
        detections: Vec<crate::face::detector::Detection>,
        detected_angle: u32,
        options: &AnalyserOptions,
    ) -> Result<Vec<Face>, EngineError> {
        let landmarker_hub = self.landmarker_hub()?;
        let mut faces = Vec::with_capacity(detections.len());

        for detection in detections {
            let mut face = Face {
                bbox: detection.bbox,
                landmark5: detection.landmark5,
                detector_score: detection.score,
                ..Default::default()
            };
            face.landmark68_by_5 = landmarker_hub.expand_68_from_5(&face.landmark5)?;

            if options.mode.landmark && landmarker_hub.has_dense_model() {
                self.attach_dense_landmarks(frame, &mut face, detected_angle, landmarker_hub)?;
            } else {
                face.landmark5_by_68 = face.landmark5.clone();
            }

            if options.mode.recognize {
                if let Some(path) = &self.config.recognizer {
                    let recognizer = self
                        .registry
                        .recognizer(path, &self.config.session_options)?;
                    let landmark5 = face.alignment_landmark5().clone();
                    let (embedding, normed) = recognizer.recognize(frame, &landmark5)?;
                    face.embedding = embedding;
                    face.normed_embedding = normed;
                }
            }

            if options.mode.classify {
                if let Some(path) = &self.config.classifier {
                    let classifier = self
                        .registry
                        .classifier(path, &self.config.session_options)?;
                    let landmark5 = face.alignment_landmark5().clone();
                    let classification = classifier.classify(frame, &landmark5)?;
                    face.age_range = classification.age_range;
                    face.gender = Some(classification.gender);
                    face.race = Some(classification.race);
                }
            }

            faces.push(face);
        }
        Ok(faces)
    }

    /// Dense landmarks first at the detection angle, then retrying the
    /// remaining rotations; below-threshold results fall back to the
    /// 68-from-5 expansion with a zero landmarker score.
    fn attach_dense_landmarks(
        &self,
        frame: &Frame,
        face: &mut Face,
        detected_angle: u32,
        hub: &LandmarkerHub,
    ) -> Result<(), EngineError> {
        let threshold = self.config.landmarker_score_threshold;
        let result = hub.detect_landmark68(frame, &face.bbox, detected_angle)?;
        if result.score >= threshold {
            face.landmark68 = result.landmark68;
            face.landmarker_score = result.score;
            face.landmark5_by_68 = helper::convert_landmark_68_to_5(&face.landmark68);
            return Ok(());
        }

        for angle in (90..360).step_by(90) {
            if angle == detected_angle {
                continue;
            }
            let retry = hub.detect_landmark68(frame, &face.bbox, angle)?;
            if retry.score >= threshold {
                face.landmark68 = retry.landmark68;
                face.landmarker_score = retry.score;
                face.landmark5_by_68 = helper::convert_landmark_68_to_5(&face.landmark68);
                return Ok(());
            }
        }

        face.landmark68 = face.landmark68_by_5.clone();
        face.landmark5_by_68 = face.landmark5.clone();
        face.landmarker_score = 0.0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn face_with_embedding(embedding: Vec<f32>) -> Face {
        let normed = helper::normalize_embedding(&embedding);
        Face {
            embedding,
            normed_embedding: normed,
            ..Default::default()
        }
    }

    #[test]
    fn average_face_means_the_embeddings() {
        let faces = vec![
            face_with_embedding(vec![1.0, 2.0, 3.0]),
            face_with_embedding(vec![3.0, 2.0, 1.0]),
        ];
        let average = FaceAnalyser::get_average_face(faces).unwrap();
        assert_eq!(average.embedding, vec![2.0, 2.0, 2.0]);
        let norm: f32 = average
            .normed_embedding
            .iter()
            .map(|v| v * v)
            .sum::<f32>()
            .sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn average_of_empty_set_is_none() {
        assert!(FaceAnalyser::get_average_face(Vec::new()).is_none());
    }

    #[test]
    fn face_distance_is_cosine_distance() {
        let a = face_with_embedding(vec![1.0, 0.0]);
        let b = face_with_embedding(vec![0.0, 1.0]);
        assert!((FaceAnalyser::calculate_face_distance(&a, &a)).abs() < 1e-5);
        assert!((FaceAnalyser::calculate_face_distance(&a, &b) - 1.0).abs() < 1e-5);
        assert!(FaceAnalyser::compare_face(&a, &a, 0.6));
        assert!(!FaceAnalyser::compare_face(&a, &b, 0.6));
    }
}
