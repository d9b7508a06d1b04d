use crate::face::helper;
use std::collections::HashSet;
use visage_types::{Embedding, Face, Gender, Race};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectorMode {
    #[default]
    Many,
    One,
    Reference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectorOrder {
    #[default]
    LeftRight,
    RightLeft,
    TopBottom,
    BottomTop,
    SmallLarge,
    LargeSmall,
    BestWorst,
    WorstBest,
}

#[derive(Debug, Clone)]
pub struct SelectorOptions {
    pub mode: SelectorMode,
    pub order: SelectorOrder,
    pub races: HashSet<Race>,
    pub genders: HashSet<Gender>,
    pub age_start: u32,
    pub age_end: u32,
    pub reference_embedding: Option<Embedding>,
    pub similarity_threshold: f32,
}

impl Default for SelectorOptions {
    fn default() -> Self {
        Self {
            mode: SelectorMode::Many,
            order: SelectorOrder::LeftRight,
            races: Race::ALL.into_iter().collect(),
            genders: Gender::ALL.into_iter().collect(),
            age_start: 0,
            age_end: 100,
            reference_embedding: None,
            similarity_threshold: crate::face::recognizer::DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

/// Filter (age → gender → race → reference similarity) then sort.
pub fn select_faces(faces: Vec<Face>, options: &SelectorOptions) -> Vec<Face> {
    let mut selected = filter_by_age(faces, options.age_start, options.age_end);
    selected = filter_by_gender(selected, &options.genders);
    selected = filter_by_race(selected, &options.races);
    if options.mode == SelectorMode::Reference {
        if let Some(reference) = &options.reference_embedding {
            selected.retain(|face| {
                helper::cosine_distance(&face.normed_embedding, reference)
                    < options.similarity_threshold
            });
        }
    }
    sort_by_order(selected, options.order)
}

fn filter_by_age(mut faces: Vec<Face>, age_start: u32, age_end: u32) -> Vec<Face> {
    faces.retain(|face| face.age_range.min >= age_start && face.age_range.max <= age_end);
    faces
}

fn filter_by_gender(mut faces: Vec<Face>, genders: &HashSet<Gender>) -> Vec<Face> {
    if genders.len() == Gender::ALL.len() {
        return faces;
    }
    faces.retain(|face| face.gender.map(|g| genders.contains(&g)).unwrap_or(false));
    faces
}

fn filter_by_race(mut faces: Vec<Face>, races: &HashSet<Race>) -> Vec<Face> {
    if races.len() == Race::ALL.len() {
        return faces;
    }
    faces.retain(|face| face.race.map(|r| races.contains(&r)).unwrap_or(false));
    faces
}

fn sort_by_order(mut faces: Vec<Face>, order: SelectorOrder) -> Vec<Face> {
    let compare = |a: f32, b: f32| a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal);
    match order {
        SelectorOrder::LeftRight => faces.sort_by(|a, b| compare(a.bbox.x_min, b.bbox.x_min)),
        SelectorOrder::RightLeft => faces.sort_by(|a, b| compare(b.bbox.x_min, a.bbox.x_min)),
        SelectorOrder::TopBottom => faces.sort_by(|a, b| compare(a.bbox.y_min, b.bbox.y_min)),
        SelectorOrder::BottomTop => faces.sort_by(|a, b| compare(b.bbox.y_min, a.bbox.y_min)),
        SelectorOrder::SmallLarge => faces.sort_by(|a, b| compare(a.bbox.area(), b.bbox.area())),
        SelectorOrder::LargeSmall => faces.sort_by(|a, b| compare(b.bbox.area(), a.bbox.area())),
        SelectorOrder::BestWorst => {
            faces.sort_by(|a, b| compare(b.detector_score, a.detector_score))
        }
        SelectorOrder::WorstBest => {
            faces.sort_by(|a, b| compare(a.detector_score, b.detector_score))
        }
    }
    faces
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use visage_types::{AgeRange, BBox};

    fn face(x: f32, area_side: f32, score: f32) -> Face {
        Face {
            bbox: BBox::from_xywh(x, x / 2.0, area_side, area_side),
            detector_score: score,
            age_range: AgeRange::new(20, 29),
            gender: Some(Gender::Female),
            race: Some(Race::Asian),
            ..Default::default()
        }
    }

    #[test]
    fn orders_cover_position_area_and_score() {
        let faces = vec![face(30.0, 10.0, 0.5), face(10.0, 30.0, 0.9), face(20.0, 20.0, 0.7)];

        let left_right = select_faces(faces.clone(), &SelectorOptions::default());
        let xs: Vec<f32> = left_right.iter().map(|f| f.bbox.x_min).collect();
        assert_eq!(xs, vec![10.0, 20.0, 30.0]);

        let options = SelectorOptions {
            order: SelectorOrder::LargeSmall,
            ..Default::default()
        };
        let large_small = select_faces(faces.clone(), &options);
        assert!(large_small[0].bbox.area() >= large_small[1].bbox.area());

        let options = SelectorOptions {
            order: SelectorOrder::BestWorst,
            ..Default::default()
        };
        let best_worst = select_faces(faces, &options);
        assert!(best_worst[0].detector_score >= best_worst[1].detector_score);
    }

    #[test]
    fn age_gender_race_filters_apply_in_order() {
        let mut young = face(0.0, 10.0, 0.9);
        young.age_range = AgeRange::new(3, 9);
        let mut male = face(10.0, 10.0, 0.8);
        male.gender = Some(Gender::Male);
        let mut white = face(20.0, 10.0, 0.7);
        white.race = Some(Race::White);
        let keeper = face(30.0, 10.0, 0.6);

        let options = SelectorOptions {
            age_start: 18,
            age_end: 60,
            genders: [Gender::Female].into_iter().collect(),
            races: [Race::Asian].into_iter().collect(),
            ..Default::default()
        };
        let selected = select_faces(vec![young, male, white, keeper], &options);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].bbox.x_min, 30.0);
    }

    #[test]
    fn reference_mode_keeps_only_similar_faces() {
        let reference = crate::face::helper::normalize_embedding(&[1.0, 0.0, 0.0]);
        let mut same = face(0.0, 10.0, 0.9);
        same.normed_embedding = reference.clone();
        let mut other = face(10.0, 10.0, 0.8);
        other.normed_embedding = crate::face::helper::normalize_embedding(&[0.0, 1.0, 0.0]);

        let options = SelectorOptions {
            mode: SelectorMode::Reference,
            reference_embedding: Some(reference),
            similarity_threshold: 0.6,
            ..Default::default()
        };
        let selected = select_faces(vec![same, other], &options);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].bbox.x_min, 0.0);
    }
}
