use crate::geometry::{BBox, Point2};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

pub type Landmarks = Vec<Point2>;
pub type Embedding = Vec<f32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Race {
    White,
    Black,
    Latino,
    Asian,
    Indian,
    Arabic,
}

impl Race {
    pub const ALL: [Race; 6] = [
        Race::White,
        Race::Black,
        Race::Latino,
        Race::Asian,
        Race::Indian,
        Race::Arabic,
    ];
}

impl Gender {
    pub const ALL: [Gender; 2] = [Gender::Male, Gender::Female];
}

/// Inclusive age bucket, e.g. 20..=29.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeRange {
    pub min: u32,
    pub max: u32,
}

impl AgeRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }
}

/// One detected face in one frame.
///
/// All landmark sets are in original frame coordinates. `landmark5_by_68` is
/// the 5-point set re-derived from the dense 68-point detection and is the
/// preferred alignment input; it falls back to the detector's own 5 points
/// when no dense landmarker ran.
#[derive(Debug, Clone, Default)]
pub struct Face {
    pub bbox: BBox,
    pub landmark5: Landmarks,
    pub landmark5_by_68: Landmarks,
    pub landmark68: Landmarks,
    pub landmark68_by_5: Landmarks,
    pub detector_score: f32,
    pub landmarker_score: f32,
    pub embedding: Embedding,
    pub normed_embedding: Embedding,
    pub age_range: AgeRange,
    pub gender: Option<Gender>,
    pub race: Option<Race>,
    pub mask: Option<Array2<f32>>,
}

impl Face {
    pub fn is_empty(&self) -> bool {
        self.landmark5.is_empty() && self.embedding.is_empty()
    }

    /// The 5-point set to align with: dense-derived when available.
    pub fn alignment_landmark5(&self) -> &Landmarks {
        if self.landmark5_by_68.is_empty() {
            &self.landmark5
        } else {
            &self.landmark5_by_68
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_range_orders_bounds() {
        let range = AgeRange::new(30, 20);
        assert!(range.min <= range.max);
    }

    #[test]
    fn alignment_landmarks_fall_back_to_detector_points() {
        let mut face = Face {
            landmark5: vec![Point2::new(1.0, 1.0); 5],
            ..Default::default()
        };
        assert_eq!(face.alignment_landmark5().len(), 5);
        assert_eq!(face.alignment_landmark5()[0].x, 1.0);

        face.landmark5_by_68 = vec![Point2::new(2.0, 2.0); 5];
        assert_eq!(face.alignment_landmark5()[0].x, 2.0);
    }
}
