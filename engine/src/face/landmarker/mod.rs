mod dense;
mod from_five;

pub use dense::DenseLandmarker;
pub use from_five::Landmark68From5;

use crate::error::EngineError;
use crate::face::helper;
use crate::vision;
use std::sync::Arc;
use strum::{Display, EnumIter};
use visage_types::{BBox, Frame, Landmarks};

/// Score bonus granted to the first selected model when several dense
/// landmarkers compete for the same face.
const FIRST_MODEL_BONUS: f32 = 0.2;

#[derive(EnumIter, Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LandmarkerKind {
    TwoDFan,
    PeppaWutz,
}

#[derive(Debug, Clone, Default)]
pub struct Landmark68Result {
    pub landmark68: Landmarks,
    pub score: f32,
}

/// Runs the selected dense landmark models and the 68-from-5 expander.
///
/// With more than one dense model selected both run in parallel and the
/// higher-scoring result wins, the first model receiving a fixed tie-break
/// bonus.
pub struct LandmarkerHub {
    dense: Vec<Arc<DenseLandmarker>>,
    from_five: Option<Arc<Landmark68From5>>,
}

impl LandmarkerHub {
    pub fn new(dense: Vec<Arc<DenseLandmarker>>, from_five: Option<Arc<Landmark68From5>>) -> Self {
        Self { dense, from_five }
    }

    pub fn has_dense_model(&self) -> bool {
        !self.dense.is_empty()
    }

    #[tracing::instrument(skip_all, fields(angle))]
    pub fn detect_landmark68(
        &self,
        frame: &Frame,
        bbox: &BBox,
        angle: u32,
    ) -> Result<Landmark68Result, EngineError> {
        if self.dense.is_empty() {
            return Ok(Landmark68Result::default());
        }

        let rotated;
        let (detect_frame, detect_bbox) = if angle % 360 == 0 {
            (frame, *bbox)
        } else {
            let (height, width, _) = frame.dim();
            rotated = vision::rotate_ccw(frame, angle);
            let rotated_bbox =
                helper::rotate_bbox_forward(bbox, angle, (width as f32, height as f32));
            (&rotated, rotated_bbox)
        };

        let mut best = Landmark68Result::default();
        let mut best_rank_score = f32::MIN;

        // Landmark models race in parallel; the winner is decided below.
        use rayon::prelude::*;
        let results: Vec<Result<Landmark68Result, EngineError>> = self
            .dense
            .par_iter()
            .map(|model| model.detect(detect_frame, &detect_bbox))
            .collect();

        for (index, result) in results.into_iter().enumerate() {
            let result = result?;
            let rank_score = if index == 0 {
                result.score + FIRST_MODEL_BONUS
            } else {
                result.score
            };
            if rank_score > best_rank_score {
                best_rank_score = rank_score;
                best = result;
            }
        }

        if angle % 360 != 0 {
            let (height, width, _) = frame.dim();
            best.landmark68 = helper::rotate_landmarks_back(
                &best.landmark68,
                angle,
                (width as f32, height as f32),
            );
        }
        Ok(best)
    }

    /// Geometric regression from the detector's 5 points to a dense set.
    pub fn expand_68_from_5(&self, landmark5: &Landmarks) -> Result<Landmarks, EngineError> {
        match &self.from_five {
            Some(model) => model.expand(landmark5),
            None => Ok(Vec::new()),
        }
    }
}
