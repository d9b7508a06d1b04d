mod retina;
mod scrfd;
mod yolo;

pub use retina::Retina;
pub use scrfd::Scrfd;
pub use yolo::YoloFace;

use crate::error::EngineError;
use crate::face::helper;
use crate::infer::{SessionOptions, SessionRegistry};
use crate::vision;
use ndarray::Array4;
use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;
use strum::{Display, EnumIter};
use visage_types::{BBox, Frame, Landmarks};

/// One raw face candidate in original frame coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BBox,
    pub score: f32,
    pub landmark5: Landmarks,
}

pub trait FaceDetector: Send + Sync {
    /// Decode raw candidates above the score threshold, already rescaled to
    /// the input frame. Suppression happens in the hub so multi-detector
    /// fusion can use its own IoU threshold.
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, EngineError>;
}

#[derive(EnumIter, Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    Retina,
    Scrfd,
    Yolo,
}

pub fn create_detector(
    kind: DetectorKind,
    registry: &SessionRegistry,
    model_path: &Path,
    options: &SessionOptions,
    score_threshold: f32,
) -> Result<Arc<dyn FaceDetector>, EngineError> {
    let session = registry.get_session(model_path, options)?;
    Ok(match kind {
        DetectorKind::Retina => Arc::new(Retina::new(session, score_threshold)),
        DetectorKind::Scrfd => Arc::new(Scrfd::new(session, score_threshold)),
        DetectorKind::Yolo => Arc::new(YoloFace::new(session, score_threshold)),
    })
}

/// Letter-box a frame into the detector's input size and produce the NCHW
/// tensor. Pixels normalize as `(x - 127.5) / 128` over the zero-padded
/// canvas, keeping the original's BGR plane order. Returns the tensor plus
/// the height/width ratios that map detector coordinates back to the frame.
pub(crate) fn prepare_detector_input(
    frame: &Frame,
    input_height: usize,
    input_width: usize,
) -> (Array4<f32>, f32, f32) {
    let resized = vision::resize_within(frame, input_width, input_height);
    let (resized_height, resized_width, _) = resized.dim();
    let (frame_height, frame_width, _) = frame.dim();
    let ratio_height = frame_height as f32 / resized_height as f32;
    let ratio_width = frame_width as f32 / resized_width as f32;

    let mut canvas: Frame = ndarray::Array3::zeros((input_height, input_width, 3));
    canvas
        .slice_mut(ndarray::s![..resized_height, ..resized_width, ..])
        .assign(&resized);

    let tensor = vision::frame_to_chw_f32(&canvas, [127.5; 3], [128.0; 3], false)
        .insert_axis(ndarray::Axis(0));
    (tensor, ratio_height, ratio_width)
}


/// Runs the selected detectors over a frame, fusing their candidates.
///
/// Rotation support: `detect_rotated` rotates the frame counter-clockwise,
/// detects, and maps candidates back through the inverse rotation. The
/// analyser retries 0°/90°/180°/270° until any candidate appears.
pub struct DetectorHub {
    detectors: Vec<(DetectorKind, Arc<dyn FaceDetector>)>,
}

impl DetectorHub {
    pub fn new(detectors: Vec<(DetectorKind, Arc<dyn FaceDetector>)>) -> Self {
        Self { detectors }
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Fused IoU threshold: 0.4 for a single detector, 0.1 when merging
    /// candidates across detectors.
    fn nms_threshold(&self) -> f32 {
        if self.detectors.len() > 1 {
            0.1
        } else {
            0.4
        }
    }

    #[tracing::instrument(skip_all, fields(angle))]
    pub fn detect_rotated(&self, frame: &Frame, angle: u32) -> Result<Vec<Detection>, EngineError> {
        let rotated;
        let detect_frame = if angle % 360 == 0 {
            frame
        } else {
            rotated = vision::rotate_ccw(frame, angle);
            &rotated
        };

        // Detector fusion runs each backend on its own rayon task.
        let candidate_sets: Vec<Result<Vec<Detection>, EngineError>> = self
            .detectors
            .par_iter()
            .map(|(_, detector)| detector.detect(detect_frame))
            .collect();

        let mut candidates = Vec::new();
        for set in candidate_sets {
            candidates.extend(set?);
        }

        let boxes: Vec<BBox> = candidates.iter().map(|d| d.bbox).collect();
        let scores: Vec<f32> = candidates.iter().map(|d| d.score).collect();
        let keep = helper::apply_nms(&boxes, &scores, self.nms_threshold());

        let (frame_height, frame_width, _) = frame.dim();
        let original_size = (frame_width as f32, frame_height as f32);
        Ok(keep
            .into_iter()
            .map(|index| {
                let detection = &candidates[index];
                Detection {
                    bbox: helper::rotate_bbox_back(&detection.bbox, angle, original_size),
                    score: detection.score,
                    landmark5: helper::rotate_landmarks_back(
                        &detection.landmark5,
                        angle,
                        original_size,
                    ),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use pretty_assertions::assert_eq;

    #[test]
    fn letterbox_ratios_recover_original_coordinates() {
        let frame: Frame = Array3::zeros((720, 1280, 3));
        let (tensor, ratio_height, ratio_width) = prepare_detector_input(&frame, 640, 640);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        // 1280x720 shrinks by 0.5 to 640x360.
        assert!((ratio_height - 2.0).abs() < 1e-5);
        assert!((ratio_width - 2.0).abs() < 1e-5);
    }

    #[test]
    fn padded_region_normalizes_like_black_pixels() {
        let frame: Frame = Array3::from_elem((100, 200, 3), 255u8);
        let (tensor, _, _) = prepare_detector_input(&frame, 640, 640);
        // Bottom padding rows hold (0 - 127.5) / 128.
        let padded_value = tensor[[0, 0, 639, 0]];
        assert!((padded_value - (-127.5 / 128.0)).abs() < 1e-5);
    }

    struct FixedDetector(Vec<Detection>);

    impl FaceDetector for FixedDetector {
        fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, EngineError> {
            Ok(self.0.clone())
        }
    }

    fn detection(x: f32, y: f32, score: f32) -> Detection {
        Detection {
            bbox: BBox::from_xywh(x, y, 10.0, 10.0),
            score,
            landmark5: vec![visage_types::Point2::new(x + 5.0, y + 5.0); 5],
        }
    }

    #[test]
    fn fusion_uses_the_tight_iou_threshold() {
        let single = DetectorHub::new(vec![(
            DetectorKind::Yolo,
            Arc::new(FixedDetector(vec![])) as Arc<dyn FaceDetector>,
        )]);
        assert_eq!(single.nms_threshold(), 0.4);

        let fused = DetectorHub::new(vec![
            (
                DetectorKind::Yolo,
                Arc::new(FixedDetector(vec![detection(0.0, 0.0, 0.9)])) as Arc<dyn FaceDetector>,
            ),
            (
                DetectorKind::Scrfd,
                Arc::new(FixedDetector(vec![detection(1.0, 1.0, 0.8)])) as Arc<dyn FaceDetector>,
            ),
        ]);
        assert_eq!(fused.nms_threshold(), 0.1);
        let frame: Frame = Array3::zeros((64, 64, 3));
        let detections = fused.detect_rotated(&frame, 0).unwrap();
        // The overlapping lower-scored candidate is suppressed.
        assert_eq!(detections.len(), 1);
        assert!((detections[0].score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn rotated_detection_maps_back_to_frame_coordinates() {
        // A detector that claims one face at a fixed position on whatever
        // frame it is given; the hub must map it back through the rotation.
        let hub = DetectorHub::new(vec![(
            DetectorKind::Yolo,
            Arc::new(FixedDetector(vec![detection(10.0, 20.0, 0.9)])) as Arc<dyn FaceDetector>,
        )]);
        let frame: Frame = Array3::zeros((50, 100, 3));
        let detections = hub.detect_rotated(&frame, 90).unwrap();
        assert_eq!(detections.len(), 1);
        // Point (20, 25) on the rotated frame maps back to (W - y, x).
        let landmark = detections[0].landmark5[0];
        assert!((landmark.x - (100.0 - 25.0)).abs() < 1e-4);
        assert!((landmark.y - 15.0).abs() < 1e-4);
    }
}
