mod occlusion;
mod region;

pub use occlusion::OcclusionMasker;
pub use region::{FaceRegion, RegionMasker};

use crate::error::EngineError;
use crate::vision;
use ndarray::Array2;
use std::collections::HashSet;
use std::sync::Arc;
use strum::{Display, EnumIter};
use visage_types::Frame;

#[derive(EnumIter, Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaskKind {
    Box,
    Occlusion,
    Region,
}

/// Parameters for one mask composition over a face crop.
#[derive(Debug, Clone)]
pub struct MaskOptions {
    pub kinds: HashSet<MaskKind>,
    /// Box-mask feather as a fraction of the crop width.
    pub box_blur: f32,
    /// Per-edge box padding percentages: top, right, bottom, left.
    pub box_padding: [u32; 4],
    pub regions: HashSet<FaceRegion>,
    /// Sigma of the optional smoothing pass over the region mask.
    pub region_blur: f32,
}

impl Default for MaskOptions {
    fn default() -> Self {
        Self {
            kinds: [MaskKind::Box].into_iter().collect(),
            box_blur: 0.3,
            box_padding: [0; 4],
            regions: FaceRegion::default_set(),
            region_blur: 0.0,
        }
    }
}

/// Rectangle mask with per-edge percentage padding and a feathered border.
///
/// Padding is clamped so the feather never collapses: each edge keeps at
/// least `blur_amount / 2` zeroed pixels before the Gaussian pass.
pub fn create_static_box_mask(
    crop_size: (usize, usize),
    blur_fraction: f32,
    padding_pct: [u32; 4],
) -> Array2<f32> {
    let (width, height) = crop_size;
    let blur_amount = (width as f32 * 0.5 * blur_fraction) as usize;
    let blur_area = (blur_amount / 2).max(1);

    let padding_top = blur_area.max(height * padding_pct[0] as usize / 100);
    let padding_right = blur_area.max(width * padding_pct[1] as usize / 100);
    let padding_bottom = blur_area.max(height * padding_pct[2] as usize / 100);
    let padding_left = blur_area.max(width * padding_pct[3] as usize / 100);

    let mut mask = Array2::from_elem((height, width), 1.0f32);
    for y in 0..height {
        for x in 0..width {
            if y < padding_top.min(height)
                || y >= height.saturating_sub(padding_bottom)
                || x < padding_left.min(width)
                || x >= width.saturating_sub(padding_right)
            {
                mask[[y, x]] = 0.0;
            }
        }
    }

    if blur_amount > 0 {
        mask = vision::gaussian_blur_f32(&mask, blur_amount as f32 * 0.25);
    }
    mask
}

/// Element-wise minimum over equally sized masks, clamped to [0, 1].
pub fn intersect_masks(masks: &[Array2<f32>]) -> Result<Array2<f32>, EngineError> {
    let first = masks
        .first()
        .ok_or_else(|| EngineError::PreprocessingFailed("no masks to intersect".into()))?;
    let mut best = first.clone();
    for mask in &masks[1..] {
        if mask.dim() != best.dim() {
            return Err(EngineError::PreprocessingFailed(
                "masks must share one size".into(),
            ));
        }
        ndarray::Zip::from(&mut best).and(mask).for_each(|b, m| {
            *b = b.min(*m);
        });
    }
    best.mapv_inplace(|v| v.clamp(0.0, 1.0));
    Ok(best)
}

/// Produces the paste-back alpha for one crop by intersecting the requested
/// box / occlusion / region masks.
pub struct MaskerHub {
    occlusion: Option<Arc<OcclusionMasker>>,
    region: Option<Arc<RegionMasker>>,
}

impl MaskerHub {
    pub fn new(occlusion: Option<Arc<OcclusionMasker>>, region: Option<Arc<RegionMasker>>) -> Self {
        Self { occlusion, region }
    }

    /// `target_crop` feeds the occlusion model, `result_crop` the region
    /// parser (regions are evaluated on the processed face). All requested
    /// masks are intersected; no request yields an all-ones mask.
    #[tracing::instrument(skip_all)]
    pub fn compose(
        &self,
        options: &MaskOptions,
        target_crop: &Frame,
        result_crop: &Frame,
    ) -> Result<Array2<f32>, EngineError> {
        let (height, width, _) = target_crop.dim();
        let mut masks: Vec<Array2<f32>> = Vec::new();

        if options.kinds.contains(&MaskKind::Box) {
            masks.push(create_static_box_mask(
                (width, height),
                options.box_blur,
                options.box_padding,
            ));
        }

        let occlusion = options
            .kinds
            .contains(&MaskKind::Occlusion)
            .then(|| self.occlusion.clone())
            .flatten();
        let region = options
            .kinds
            .contains(&MaskKind::Region)
            .then(|| self.region.clone())
            .flatten();

        // Model-backed masks run in parallel when both are requested.
        match (occlusion, region) {
            (Some(occlusion), Some(region)) => {
                let (occlusion_mask, region_mask) = rayon::join(
                    || occlusion.create_occlusion_mask(target_crop),
                    || {
                        region.create_region_mask(
                            result_crop,
                            &options.regions,
                            options.region_blur,
                        )
                    },
                );
                masks.push(occlusion_mask?);
                masks.push(region_mask?);
            }
            (Some(occlusion), None) => masks.push(occlusion.create_occlusion_mask(target_crop)?),
            (None, Some(region)) => masks.push(region.create_region_mask(
                result_crop,
                &options.regions,
                options.region_blur,
            )?),
            (None, None) => {}
        }

        if masks.is_empty() {
            return Ok(Array2::from_elem((height, width), 1.0));
        }
        intersect_masks(&masks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn box_mask_is_one_inside_zero_at_borders() {
        let mask = create_static_box_mask((128, 128), 0.0, [10, 10, 10, 10]);
        assert_eq!(mask.dim(), (128, 128));
        assert_eq!(mask[[0, 64]], 0.0);
        assert_eq!(mask[[64, 0]], 0.0);
        assert_eq!(mask[[127, 64]], 0.0);
        assert_eq!(mask[[64, 64]], 1.0);
    }

    #[test]
    fn feathered_box_mask_stays_in_unit_range() {
        let mask = create_static_box_mask((128, 128), 0.4, [0; 4]);
        for value in mask.iter() {
            assert!((0.0..=1.0).contains(value));
        }
        // The feather softens the boundary: somewhere between 0 and 1.
        let border = mask[[13, 64]];
        assert!(border > 0.0 && border < 1.0);
    }

    #[test]
    fn intersection_takes_the_element_minimum() {
        let a = Array2::from_elem((4, 4), 0.8f32);
        let mut b = Array2::from_elem((4, 4), 1.0f32);
        b[[1, 1]] = 0.25;
        let merged = intersect_masks(&[a, b]).unwrap();
        assert_eq!(merged[[0, 0]], 0.8);
        assert_eq!(merged[[1, 1]], 0.25);
    }

    #[test]
    fn mismatched_mask_sizes_are_rejected() {
        let a = Array2::from_elem((4, 4), 1.0f32);
        let b = Array2::from_elem((8, 8), 1.0f32);
        assert!(intersect_masks(&[a, b]).is_err());
    }

    #[test]
    fn no_masks_requested_yields_all_ones() {
        let hub = MaskerHub::new(None, None);
        let crop: Frame = ndarray::Array3::zeros((64, 64, 3));
        let options = MaskOptions {
            kinds: HashSet::new(),
            ..Default::default()
        };
        let mask = hub.compose(&options, &crop, &crop).unwrap();
        assert!(mask.iter().all(|v| *v == 1.0));
    }
}
