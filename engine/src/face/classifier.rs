use crate::error::EngineError;
use crate::face::helper::{self, WarpTemplate};
use crate::infer::InferenceSession;
use crate::vision;
use ndarray::Axis;
use std::sync::Arc;
use visage_types::{AgeRange, Frame, Gender, Landmarks, Race};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub age_range: AgeRange,
    pub gender: Gender,
    pub race: Race,
}

/// FairFace demographics model over a 224 crop with ImageNet statistics.
/// Outputs three int64 class indices: race, gender, age bucket.
pub struct FairFace {
    session: Arc<InferenceSession>,
    input_height: usize,
    input_width: usize,
}

const IMAGENET_MEAN: [f32; 3] = [0.485 * 255.0, 0.456 * 255.0, 0.406 * 255.0];
const IMAGENET_STD: [f32; 3] = [0.229 * 255.0, 0.224 * 255.0, 0.225 * 255.0];

impl FairFace {
    pub fn new(session: Arc<InferenceSession>) -> Self {
        let (input_height, input_width) = session.input_hw_or((224, 224));
        Self {
            session,
            input_height,
            input_width,
        }
    }

    #[tracing::instrument(skip_all)]
    pub fn classify(
        &self,
        frame: &Frame,
        landmark5: &Landmarks,
    ) -> Result<Classification, EngineError> {
        let (crop, _) = helper::warp_face_by_landmark5(
            frame,
            landmark5,
            WarpTemplate::Arcface112V2,
            (self.input_width, self.input_height),
        )?;

        let tensor = vision::frame_to_chw_f32(&crop, IMAGENET_MEAN, IMAGENET_STD, true)
            .insert_axis(Axis(0));

        let input_name = self.session.primary_input_name();
        let outputs = self
            .session
            .run(ort::inputs![input_name.as_str() => tensor.view()]
                .map_err(|e| EngineError::PreprocessingFailed(e.to_string()))?)
            .map_err(|e| EngineError::InferenceFailed(e.to_string()))?;

        let output_names = self.session.output_names();
        if output_names.len() < 3 {
            return Err(EngineError::PostprocessingFailed(format!(
                "fairface expects race/gender/age outputs, model has {}",
                output_names.len()
            )));
        }
        let read_index = |name: &str| -> Result<i64, EngineError> {
            let tensor = outputs[name]
                .try_extract_tensor::<i64>()
                .map_err(|e| EngineError::PostprocessingFailed(e.to_string()))?;
            tensor.iter().next().copied().ok_or_else(|| {
                EngineError::PostprocessingFailed(format!("empty classifier output {name}"))
            })
        };

        let race_id = read_index(output_names[0].as_str())?;
        let gender_id = read_index(output_names[1].as_str())?;
        let age_id = read_index(output_names[2].as_str())?;

        Ok(Classification {
            age_range: categorize_age(age_id),
            gender: categorize_gender(gender_id),
            race: categorize_race(race_id),
        })
    }
}

pub fn categorize_age(age_id: i64) -> AgeRange {
    match age_id {
        0 => AgeRange::new(0, 2),
        1 => AgeRange::new(3, 9),
        2 => AgeRange::new(10, 19),
        3 => AgeRange::new(20, 29),
        4 => AgeRange::new(30, 39),
        5 => AgeRange::new(40, 49),
        6 => AgeRange::new(50, 59),
        7 => AgeRange::new(60, 69),
        _ => AgeRange::new(70, 100),
    }
}

pub fn categorize_gender(gender_id: i64) -> Gender {
    if gender_id == 0 {
        Gender::Male
    } else {
        Gender::Female
    }
}

pub fn categorize_race(race_id: i64) -> Race {
    match race_id {
        1 => Race::Black,
        2 => Race::Latino,
        3 | 4 => Race::Asian,
        5 => Race::Indian,
        6 => Race::Arabic,
        _ => Race::White,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn age_ids_map_to_their_buckets() {
        assert_eq!(categorize_age(0), AgeRange::new(0, 2));
        assert_eq!(categorize_age(1), AgeRange::new(3, 9));
        assert_eq!(categorize_age(4), AgeRange::new(30, 39));
        assert_eq!(categorize_age(8), AgeRange::new(70, 100));
        // Out-of-table ids land in the oldest bucket.
        assert_eq!(categorize_age(42), AgeRange::new(70, 100));
    }

    #[test]
    fn race_ids_follow_the_fairface_table() {
        assert_eq!(categorize_race(0), Race::White);
        assert_eq!(categorize_race(1), Race::Black);
        assert_eq!(categorize_race(2), Race::Latino);
        assert_eq!(categorize_race(3), Race::Asian);
        assert_eq!(categorize_race(4), Race::Asian);
        assert_eq!(categorize_race(5), Race::Indian);
        assert_eq!(categorize_race(6), Race::Arabic);
    }

    #[test]
    fn gender_zero_is_male() {
        assert_eq!(categorize_gender(0), Gender::Male);
        assert_eq!(categorize_gender(1), Gender::Female);
    }
}
