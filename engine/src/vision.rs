use crate::error::EngineError;
use fallible_collections::FallibleVec;
use image::imageops::FilterType;
use image::{ImageBuffer, Rgb, RgbImage};
use ndarray::{s, Array2, Array3};
use std::path::Path;
use visage_types::Frame;

/// Decode an image file into an 8-bit BGR frame.
pub fn read_image(path: &Path) -> Result<Frame, EngineError> {
    let image = image::open(path).map_err(|_| EngineError::ImageDecodeFailed(path.to_path_buf()))?;
    Ok(rgb_to_frame(&image.to_rgb8()))
}

/// Encode a BGR frame to disk; the format follows the file extension.
pub fn write_image(frame: &Frame, path: &Path) -> Result<(), EngineError> {
    let image = frame_to_rgb(frame);
    image.save(path).map_err(|e| EngineError::OutputWriteFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

pub fn rgb_to_frame(image: &RgbImage) -> Frame {
    let (width, height) = image.dimensions();
    let mut frame = Array3::zeros((height as usize, width as usize, 3));
    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        frame[[y, x, 0]] = pixel[2];
        frame[[y, x, 1]] = pixel[1];
        frame[[y, x, 2]] = pixel[0];
    }
    frame
}

pub fn frame_to_rgb(frame: &Frame) -> RgbImage {
    let (height, width, _) = frame.dim();
    ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb([frame[[y, x, 2]], frame[[y, x, 1]], frame[[y, x, 0]]])
    })
}

/// Exact resize to `(width, height)`.
pub fn resize_frame(frame: &Frame, width: usize, height: usize, filter: FilterType) -> Frame {
    let (frame_height, frame_width, _) = frame.dim();
    if frame_height == height && frame_width == width {
        return frame.clone();
    }
    let resized = image::imageops::resize(
        &frame_to_rgb(frame),
        width as u32,
        height as u32,
        filter,
    );
    rgb_to_frame(&resized)
}

/// Shrink-only aspect-preserving resize: frames already inside the bound are
/// returned unchanged.
pub fn resize_within(frame: &Frame, max_width: usize, max_height: usize) -> Frame {
    let (height, width, _) = frame.dim();
    if height <= max_height && width <= max_width {
        return frame.clone();
    }
    let scale = (max_height as f32 / height as f32).min(max_width as f32 / width as f32);
    let new_width = ((width as f32) * scale) as usize;
    let new_height = ((height as f32) * scale) as usize;
    resize_frame(frame, new_width.max(1), new_height.max(1), FilterType::Triangle)
}

/// Rotate counter-clockwise by a multiple of 90 degrees.
pub fn rotate_ccw(frame: &Frame, angle: u32) -> Frame {
    match angle % 360 {
        90 => frame
            .slice(s![.., ..;-1, ..])
            .permuted_axes([1, 0, 2])
            .as_standard_layout()
            .to_owned(),
        180 => frame
            .slice(s![..;-1, ..;-1, ..])
            .as_standard_layout()
            .to_owned(),
        270 => frame
            .slice(s![..;-1, .., ..])
            .permuted_axes([1, 0, 2])
            .as_standard_layout()
            .to_owned(),
        _ => frame.clone(),
    }
}

/// `"1280x720"` → `(1280, 720)`.
pub fn unpack_resolution(resolution: &str) -> Result<(usize, usize), EngineError> {
    let mut parts = resolution.split('x');
    let parse = |part: Option<&str>| {
        part.and_then(|p| p.trim().parse::<usize>().ok())
            .ok_or_else(|| EngineError::PreprocessingFailed(format!(
                "invalid resolution format: {resolution}"
            )))
    };
    let width = parse(parts.next())?;
    let height = parse(parts.next())?;
    Ok((width, height))
}

/// The smaller-area of the two resolutions.
pub fn restrict_resolution(a: (usize, usize), b: (usize, usize)) -> (usize, usize) {
    if a.0 * a.1 < b.0 * b.1 {
        a
    } else {
        b
    }
}

/// BGR HWC u8 frame to planar CHW f32 tensor: `(x - mean[c]) / std[c]` per
/// channel, with `rgb` selecting the output channel order.
pub fn frame_to_chw_f32(frame: &Frame, mean: [f32; 3], std: [f32; 3], rgb: bool) -> Array3<f32> {
    let (height, width, _) = frame.dim();
    let mut tensor = Array3::zeros((3, height, width));
    for y in 0..height {
        for x in 0..width {
            // frame is BGR; channel c of the output reads BGR index
            // directly, or mirrored when RGB is requested.
            for c in 0..3 {
                let source_channel = if rgb { 2 - c } else { c };
                let value = frame[[y, x, source_channel]] as f32;
                tensor[[c, y, x]] = (value - mean[c]) / std[c];
            }
        }
    }
    tensor
}

/// Planar CHW f32 tensor back to a BGR HWC u8 frame:
/// `clamp(v * scale + offset, 0, 255)`.
pub fn chw_f32_to_frame(tensor: &Array3<f32>, scale: f32, offset: f32, rgb: bool) -> Frame {
    let (_, height, width) = tensor.dim();
    let mut frame = Array3::zeros((height, width, 3));
    for y in 0..height {
        for x in 0..width {
            for c in 0..3 {
                let source_channel = if rgb { 2 - c } else { c };
                let value = tensor[[source_channel, y, x]] * scale + offset;
                frame[[y, x, c]] = value.clamp(0.0, 255.0) as u8;
            }
        }
    }
    frame
}

/// Linear blend `out = (1 - alpha) * original + alpha * processed` with
/// `alpha = blend_percent / 100` capped at 1. The original is resized to the
/// processed frame's size when they differ.
pub fn blend_frames(original: &Frame, processed: &Frame, blend_percent: u32) -> Frame {
    let alpha = (blend_percent.min(100) as f32) / 100.0;
    let (height, width, _) = processed.dim();
    let original = if original.dim() == processed.dim() {
        original.clone()
    } else {
        resize_frame(original, width, height, FilterType::CatmullRom)
    };

    let mut out = Array3::zeros((height, width, 3));
    for y in 0..height {
        for x in 0..width {
            for c in 0..3 {
                let value = (1.0 - alpha) * original[[y, x, c]] as f32
                    + alpha * processed[[y, x, c]] as f32;
                out[[y, x, c]] = value.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}

fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil().max(1.0) as usize;
    let mut kernel = Vec::with_capacity(2 * radius + 1);
    let denom = 2.0 * sigma * sigma;
    for i in 0..=2 * radius {
        let d = i as f32 - radius as f32;
        kernel.push((-d * d / denom).exp());
    }
    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Separable Gaussian blur over a single-channel float map with replicated
/// borders. `sigma <= 0` is the identity.
pub fn gaussian_blur_f32(map: &Array2<f32>, sigma: f32) -> Array2<f32> {
    if sigma <= 0.0 {
        return map.clone();
    }
    let kernel = gaussian_kernel(sigma);
    let radius = kernel.len() / 2;
    let (height, width) = map.dim();

    let mut horizontal = Array2::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = (x + k).saturating_sub(radius).min(width - 1);
                acc += map[[y, sx]] * weight;
            }
            horizontal[[y, x]] = acc;
        }
    }

    let mut out = Array2::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = (y + k).saturating_sub(radius).min(height - 1);
                acc += horizontal[[sy, x]] * weight;
            }
            out[[y, x]] = acc;
        }
    }
    out
}

/// Bilinear resize of a single-channel float map.
pub fn resize_map_bilinear(map: &Array2<f32>, height: usize, width: usize) -> Array2<f32> {
    let (src_height, src_width) = map.dim();
    if (src_height, src_width) == (height, width) {
        return map.clone();
    }
    let mut out = Array2::zeros((height, width));
    let scale_y = src_height as f32 / height as f32;
    let scale_x = src_width as f32 / width as f32;
    for y in 0..height {
        for x in 0..width {
            let sy = ((y as f32 + 0.5) * scale_y - 0.5).max(0.0);
            let sx = ((x as f32 + 0.5) * scale_x - 0.5).max(0.0);
            let y0 = (sy as usize).min(src_height - 1);
            let x0 = (sx as usize).min(src_width - 1);
            let y1 = (y0 + 1).min(src_height - 1);
            let x1 = (x0 + 1).min(src_width - 1);
            let dy = sy - y0 as f32;
            let dx = sx - x0 as f32;
            out[[y, x]] = map[[y0, x0]] * (1.0 - dx) * (1.0 - dy)
                + map[[y0, x1]] * dx * (1.0 - dy)
                + map[[y1, x0]] * (1.0 - dx) * dy
                + map[[y1, x1]] * dx * dy;
        }
    }
    out
}

/// Nearest-neighbour resize of a single-channel float map (used for class
/// masks where interpolation would invent labels).
pub fn resize_map_nearest(map: &Array2<f32>, height: usize, width: usize) -> Array2<f32> {
    let (src_height, src_width) = map.dim();
    if (src_height, src_width) == (height, width) {
        return map.clone();
    }
    let mut out = Array2::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let sy = (y * src_height / height).min(src_height - 1);
            let sx = (x * src_width / width).min(src_width - 1);
            out[[y, x]] = map[[sy, sx]];
        }
    }
    out
}

/// Mean luminance (Rec. 601) of a BGR frame in [0, 255].
pub fn mean_luma(frame: &Frame) -> f32 {
    let (height, width, _) = frame.dim();
    if height == 0 || width == 0 {
        return 0.0;
    }
    let mut sum = 0.0f64;
    for y in 0..height {
        for x in 0..width {
            let b = frame[[y, x, 0]] as f64;
            let g = frame[[y, x, 1]] as f64;
            let r = frame[[y, x, 2]] as f64;
            sum += 0.114 * b + 0.587 * g + 0.299 * r;
        }
    }
    (sum / (height * width) as f64) as f32
}

const CLAHE_TILES: usize = 8;
const CLAHE_CLIP_LIMIT: f32 = 2.0;
const LOW_LUMA_THRESHOLD: f32 = 30.0;

/// Contrast-limited adaptive histogram equalisation over the luma plane,
/// applied only when the crop is dark. Channels are rescaled by the per-pixel
/// luma gain so chroma is preserved.
pub fn conditional_optimize_contrast(crop: &Frame) -> Frame {
    if mean_luma(crop) >= LOW_LUMA_THRESHOLD {
        return crop.clone();
    }

    let (height, width, _) = crop.dim();
    let mut luma = Array2::<f32>::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            luma[[y, x]] = 0.114 * crop[[y, x, 0]] as f32
                + 0.587 * crop[[y, x, 1]] as f32
                + 0.299 * crop[[y, x, 2]] as f32;
        }
    }

    let equalized = clahe(&luma, CLAHE_TILES, CLAHE_CLIP_LIMIT);

    let mut out = Array3::zeros((height, width, 3));
    for y in 0..height {
        for x in 0..width {
            let gain = if luma[[y, x]] > 1e-3 {
                equalized[[y, x]] / luma[[y, x]]
            } else {
                1.0
            };
            for c in 0..3 {
                let value = crop[[y, x, c]] as f32 * gain;
                out[[y, x, c]] = value.clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}

/// CLAHE over a [0, 255] float plane: per-tile clipped histograms turned
/// into CDF lookup tables, bilinearly interpolated between tile centers.
fn clahe(luma: &Array2<f32>, tiles: usize, clip_limit: f32) -> Array2<f32> {
    let (height, width) = luma.dim();
    let tile_height = (height / tiles).max(1);
    let tile_width = (width / tiles).max(1);
    let tiles_y = height.div_ceil(tile_height);
    let tiles_x = width.div_ceil(tile_width);

    // One 256-bin LUT per tile.
    let mut luts = vec![[0f32; 256]; tiles_y * tiles_x];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let y0 = ty * tile_height;
            let x0 = tx * tile_width;
            let y1 = (y0 + tile_height).min(height);
            let x1 = (x0 + tile_width).min(width);
            let count = ((y1 - y0) * (x1 - x0)) as f32;

            let mut hist = [0f32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    let bin = luma[[y, x]].clamp(0.0, 255.0) as usize;
                    hist[bin] += 1.0;
                }
            }

            // Clip and redistribute the excess uniformly.
            let limit = clip_limit * count / 256.0;
            let mut excess = 0.0;
            for bin in hist.iter_mut() {
                if *bin > limit {
                    excess += *bin - limit;
                    *bin = limit;
                }
            }
            let redistribute = excess / 256.0;
            let mut cdf = 0.0;
            let lut = &mut luts[ty * tiles_x + tx];
            for (value, bin) in hist.iter().enumerate() {
                cdf += bin + redistribute;
                lut[value] = (cdf / count * 255.0).clamp(0.0, 255.0);
            }
        }
    }

    let mut out = Array2::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let bin = luma[[y, x]].clamp(0.0, 255.0) as usize;

            // Position relative to tile centers for bilinear LUT mixing.
            let fy = (y as f32 / tile_height as f32 - 0.5).max(0.0);
            let fx = (x as f32 / tile_width as f32 - 0.5).max(0.0);
            let ty0 = (fy as usize).min(tiles_y - 1);
            let tx0 = (fx as usize).min(tiles_x - 1);
            let ty1 = (ty0 + 1).min(tiles_y - 1);
            let tx1 = (tx0 + 1).min(tiles_x - 1);
            let wy = fy - ty0 as f32;
            let wx = fx - tx0 as f32;

            let top = luts[ty0 * tiles_x + tx0][bin] * (1.0 - wx)
                + luts[ty0 * tiles_x + tx1][bin] * wx;
            let bottom = luts[ty1 * tiles_x + tx0][bin] * (1.0 - wx)
                + luts[ty1 * tiles_x + tx1][bin] * wx;
            out[[y, x]] = top * (1.0 - wy) + bottom * wy;
        }
    }
    out
}

/// Split a frame into overlapping tiles for bounded-memory inference.
///
/// `size = [tile_size, pad_outer, pad_inner]`. Returns the tiles plus the
/// padded canvas dimensions needed to merge them back.
pub fn create_tile_frames(
    frame: &Frame,
    size: [usize; 3],
) -> Result<(Vec<Frame>, usize, usize), EngineError> {
    let [tile_size, pad_outer, pad_inner] = size;
    let (height, width, _) = frame.dim();

    let step = tile_size
        .checked_sub(2 * pad_inner)
        .filter(|step| *step > 0)
        .ok_or_else(|| {
            EngineError::PreprocessingFailed("tile size must exceed twice the inner pad".into())
        })?;

    // Outer letter-box pad, then bottom-right pad to a step multiple.
    let outer_height = height + 2 * pad_outer;
    let outer_width = width + 2 * pad_outer;
    let pad_bottom = pad_inner + step - (outer_height % step);
    let pad_right = pad_inner + step - (outer_width % step);
    let pad_height = outer_height + pad_inner + pad_bottom;
    let pad_width = outer_width + pad_inner + pad_right;

    let mut padded = Array3::zeros((pad_height, pad_width, 3));
    padded
        .slice_mut(s![
            pad_outer + pad_inner..pad_outer + pad_inner + height,
            pad_outer + pad_inner..pad_outer + pad_inner + width,
            ..
        ])
        .assign(frame);

    let mut tiles: Vec<Frame> = FallibleVec::try_with_capacity(
        ((pad_height / step) + 1) * ((pad_width / step) + 1),
    )
    .map_err(|e| EngineError::Allocation(format!("{e:?}")))?;

    let mut row = pad_inner;
    while row + pad_inner + step <= pad_height {
        let top = row - pad_inner;
        let bottom = row + pad_inner + step;
        let mut col = pad_inner;
        while col + pad_inner + step <= pad_width {
            let left = col - pad_inner;
            let right = col + pad_inner + step;
            tiles.push(padded.slice(s![top..bottom, left..right, ..]).to_owned());
            col += step;
        }
        row += step;
    }

    Ok((tiles, pad_width, pad_height))
}

/// Merge processed tiles back into a single frame, discarding each tile's
/// inner padding and cropping away the outer padding. All arguments are in
/// output (post-scale) pixel units.
pub fn merge_tile_frames(
    tiles: &[Frame],
    out_width: usize,
    out_height: usize,
    pad_width: usize,
    pad_height: usize,
    size: [usize; 3],
) -> Result<Frame, EngineError> {
    let [_, pad_outer, pad_inner] = size;
    let first = tiles
        .first()
        .ok_or_else(|| EngineError::PostprocessingFailed("no tiles to merge".into()))?;

    let (tile_height_full, tile_width_full, _) = first.dim();
    let tile_width = tile_width_full - 2 * pad_inner;
    let tile_height = tile_height_full - 2 * pad_inner;
    let tiles_per_row = (pad_width / tile_width).min(tiles.len().max(1));

    let mut merged = Array3::zeros((pad_height, pad_width, 3));
    for (index, tile) in tiles.iter().enumerate() {
        let core = tile.slice(s![
            pad_inner..pad_inner + tile_height,
            pad_inner..pad_inner + tile_width,
            ..
        ]);
        let top = (index / tiles_per_row) * tile_height;
        let left = (index % tiles_per_row) * tile_width;
        if top + tile_height > pad_height || left + tile_width > pad_width {
            return Err(EngineError::PostprocessingFailed(
                "tile grid exceeds the merge canvas".into(),
            ));
        }
        merged
            .slice_mut(s![top..top + tile_height, left..left + tile_width, ..])
            .assign(&core);
    }

    Ok(merged
        .slice(s![
            pad_outer..pad_outer + out_height,
            pad_outer..pad_outer + out_width,
            ..
        ])
        .to_owned())
}

pub fn is_image_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
        Some("jpg" | "jpeg" | "png" | "bmp" | "webp")
    )
}

pub fn is_video_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
        Some("mp4" | "mkv" | "avi" | "mov" | "webm")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn gradient_frame(height: usize, width: usize) -> Frame {
        Array3::from_shape_fn((height, width, 3), |(y, x, c)| {
            ((y * 7 + x * 3 + c * 11) % 256) as u8
        })
    }

    #[test]
    fn chw_round_trip_preserves_pixels() {
        let frame = gradient_frame(8, 6);
        let tensor = frame_to_chw_f32(&frame, [0.0; 3], [255.0; 3], true);
        let restored = chw_f32_to_frame(&tensor, 255.0, 0.0, true);
        assert_eq!(frame, restored);
    }

    #[test]
    fn rotation_four_times_is_identity() {
        let frame = gradient_frame(5, 9);
        let mut rotated = frame.clone();
        for _ in 0..4 {
            rotated = rotate_ccw(&rotated, 90);
        }
        assert_eq!(frame, rotated);

        let rotated_90 = rotate_ccw(&frame, 90);
        assert_eq!(rotated_90.dim(), (9, 5, 3));
        // Pixel (x=j, y=i) moves to (x'=i, y'=W-1-j).
        assert_eq!(rotated_90[[9 - 1 - 2, 3, 0]], frame[[3, 2, 0]]);
    }

    #[test]
    fn resize_within_only_shrinks() {
        let frame = gradient_frame(100, 50);
        let unchanged = resize_within(&frame, 200, 200);
        assert_eq!(unchanged.dim(), (100, 50, 3));

        let shrunk = resize_within(&frame, 25, 50);
        assert_eq!(shrunk.dim(), (50, 25, 3));
    }

    #[test]
    fn blend_at_zero_returns_original_at_hundred_processed() {
        let original = gradient_frame(4, 4);
        let processed = Array3::from_elem((4, 4, 3), 200u8);
        assert_eq!(blend_frames(&original, &processed, 0), original);
        assert_eq!(blend_frames(&original, &processed, 100), processed);
        // Values above 100 are capped.
        assert_eq!(blend_frames(&original, &processed, 250), processed);
    }

    #[test]
    fn gaussian_blur_preserves_flat_maps() {
        let map = Array2::from_elem((16, 16), 0.5f32);
        let blurred = gaussian_blur_f32(&map, 2.0);
        for value in blurred.iter() {
            assert!((value - 0.5).abs() < 1e-5);
        }
    }

    #[test]
    fn tile_split_and_merge_reconstructs_the_frame() {
        let frame = gradient_frame(37, 53);
        let size = [32, 4, 2];
        let (tiles, pad_width, pad_height) = create_tile_frames(&frame, size).unwrap();
        assert!(!tiles.is_empty());
        for tile in &tiles {
            assert_eq!(tile.dim(), (32, 32, 3));
        }
        let merged =
            merge_tile_frames(&tiles, 53, 37, pad_width, pad_height, size).unwrap();
        assert_eq!(merged, frame);
    }

    #[test]
    fn resolution_parsing() {
        assert_eq!(unpack_resolution("1280x720").unwrap(), (1280, 720));
        assert!(unpack_resolution("judge-me").is_err());
        assert_eq!(restrict_resolution((10, 10), (5, 5)), (5, 5));
    }

    #[test]
    fn dark_crops_get_brightened() {
        let dark = Array3::from_elem((32, 32, 3), 10u8);
        let adjusted = conditional_optimize_contrast(&dark);
        assert!(mean_luma(&adjusted) >= mean_luma(&dark));

        let bright = Array3::from_elem((32, 32, 3), 200u8);
        assert_eq!(conditional_optimize_contrast(&bright), bright);
    }
}
