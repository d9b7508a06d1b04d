use crate::error::EngineError;
use ndarray::{array, Array2, Array3};
use visage_types::{BBox, Embedding, Frame, Landmarks, Point2};

/// Canonical 5-point face layouts (left eye, right eye, nose tip, left
/// mouth corner, right mouth corner) in normalized [0, 1] coordinates.
/// Multiplied by the crop size to obtain warp destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarpTemplate {
    Arcface112V2,
    Arcface128V2,
    Ffhq512,
}

impl WarpTemplate {
    pub fn points(&self) -> [[f32; 2]; 5] {
        match self {
            WarpTemplate::Arcface112V2 => [
                [0.341_916_07, 0.461_574_11],
                [0.656_533_93, 0.459_833_93],
                [0.500_225_00, 0.640_505_36],
                [0.370_975_89, 0.824_691_96],
                [0.631_516_96, 0.823_250_89],
            ],
            WarpTemplate::Arcface128V2 => [
                [0.361_676_56, 0.403_877_34],
                [0.636_967_19, 0.402_354_69],
                [0.500_196_87, 0.560_442_19],
                [0.387_103_91, 0.721_605_47],
                [0.615_077_34, 0.720_344_53],
            ],
            WarpTemplate::Ffhq512 => [
                [0.376_916_76, 0.468_646_64],
                [0.622_856_97, 0.469_128_13],
                [0.501_238_59, 0.613_319_04],
                [0.393_088_22, 0.725_411_00],
                [0.611_502_05, 0.724_904_65],
            ],
        }
    }
}

/// Least-squares similarity transform (rotation + uniform scale +
/// translation) mapping `src` onto `dst`, as a 2x3 matrix.
///
/// Closed form: with centered point clouds p̃/q̃,
/// `a = Σ p̃·q̃ / Σ|p̃|²`, `b = Σ p̃×q̃ / Σ|p̃|²`, `M = [[a, -b], [b, a]]`,
/// `t = q̄ − M·p̄`.
pub fn estimate_similarity(src: &[Point2], dst: &[Point2]) -> Result<Array2<f32>, EngineError> {
    if src.len() != dst.len() || src.len() < 2 {
        return Err(EngineError::FaceNotAligned(format!(
            "need matching point sets of at least 2 points, got {} and {}",
            src.len(),
            dst.len()
        )));
    }

    let n = src.len() as f32;
    let src_mean_x = src.iter().map(|p| p.x).sum::<f32>() / n;
    let src_mean_y = src.iter().map(|p| p.y).sum::<f32>() / n;
    let dst_mean_x = dst.iter().map(|p| p.x).sum::<f32>() / n;
    let dst_mean_y = dst.iter().map(|p| p.y).sum::<f32>() / n;

    let mut dot = 0.0f32;
    let mut cross = 0.0f32;
    let mut src_norm = 0.0f32;
    for (p, q) in src.iter().zip(dst.iter()) {
        let px = p.x - src_mean_x;
        let py = p.y - src_mean_y;
        let qx = q.x - dst_mean_x;
        let qy = q.y - dst_mean_y;
        dot += px * qx + py * qy;
        cross += px * qy - py * qx;
        src_norm += px * px + py * py;
    }
    if src_norm < 1e-6 {
        return Err(EngineError::FaceNotAligned(
            "degenerate landmark cloud".to_string(),
        ));
    }

    let a = dot / src_norm;
    let b = cross / src_norm;
    let tx = dst_mean_x - (a * src_mean_x - b * src_mean_y);
    let ty = dst_mean_y - (b * src_mean_x + a * src_mean_y);

    Ok(array![[a, -b, tx], [b, a, ty]])
}

/// Matrix mapping the detected 5 landmarks onto `template` scaled to
/// `crop_size` (width, height).
pub fn estimate_matrix_by_landmark5(
    landmark5: &[Point2],
    template: WarpTemplate,
    crop_size: (usize, usize),
) -> Result<Array2<f32>, EngineError> {
    let dst: Vec<Point2> = template
        .points()
        .iter()
        .map(|[x, y]| Point2::new(x * crop_size.0 as f32, y * crop_size.1 as f32))
        .collect();
    estimate_similarity(landmark5, &dst)
}

/// Warp the face described by 5 landmarks to a canonical crop. Returns the
/// crop and the frame→crop affine used, which `paste_back` later inverts.
pub fn warp_face_by_landmark5(
    frame: &Frame,
    landmark5: &[Point2],
    template: WarpTemplate,
    crop_size: (usize, usize),
) -> Result<(Frame, Array2<f32>), EngineError> {
    let matrix = estimate_matrix_by_landmark5(landmark5, template, crop_size)?;
    let crop = warp_affine_frame(frame, &matrix, crop_size.0, crop_size.1)?;
    Ok((crop, matrix))
}

/// Pure scale + translation warp used by the dense landmarkers.
pub fn warp_face_by_translation(
    frame: &Frame,
    translation: (f32, f32),
    scale: f32,
    crop_size: (usize, usize),
) -> Result<(Frame, Array2<f32>), EngineError> {
    let matrix = array![[scale, 0.0, translation.0], [0.0, scale, translation.1]];
    let crop = warp_affine_frame(frame, &matrix, crop_size.0, crop_size.1)?;
    Ok((crop, matrix))
}

pub fn invert_affine(matrix: &Array2<f32>) -> Result<Array2<f32>, EngineError> {
    let a = matrix[[0, 0]];
    let b = matrix[[0, 1]];
    let tx = matrix[[0, 2]];
    let c = matrix[[1, 0]];
    let d = matrix[[1, 1]];
    let ty = matrix[[1, 2]];

    let det = a * d - b * c;
    if det.abs() < 1e-6 {
        return Err(EngineError::FaceNotAligned(
            "singular affine matrix".to_string(),
        ));
    }
    Ok(array![
        [d / det, -b / det, (b * ty - d * tx) / det],
        [-c / det, a / det, (c * tx - a * ty) / det]
    ])
}

pub fn transform_point(point: Point2, matrix: &Array2<f32>) -> Point2 {
    Point2::new(
        matrix[[0, 0]] * point.x + matrix[[0, 1]] * point.y + matrix[[0, 2]],
        matrix[[1, 0]] * point.x + matrix[[1, 1]] * point.y + matrix[[1, 2]],
    )
}

pub fn transform_points(points: &[Point2], matrix: &Array2<f32>) -> Landmarks {
    points.iter().map(|p| transform_point(*p, matrix)).collect()
}

/// Backward-mapping affine warp with bilinear interpolation over a BGR u8
/// frame. Out-of-bounds samples are zero.
pub fn warp_affine_frame(
    frame: &Frame,
    matrix: &Array2<f32>,
    output_width: usize,
    output_height: usize,
) -> Result<Frame, EngineError> {
    let inverse = invert_affine(matrix)?;
    let (src_height, src_width, _) = frame.dim();
    let src_w_limit = (src_width - 1) as f32;
    let src_h_limit = (src_height - 1) as f32;

    let mut output = Array3::zeros((output_height, output_width, 3));
    for dst_y in 0..output_height {
        let dst_yf = dst_y as f32;
        // Row-level constants hoisted out of the inner x-loop.
        let row_src_x_base = inverse[[0, 1]] * dst_yf + inverse[[0, 2]];
        let row_src_y_base = inverse[[1, 1]] * dst_yf + inverse[[1, 2]];

        for dst_x in 0..output_width {
            let dst_xf = dst_x as f32;
            let src_x = inverse[[0, 0]] * dst_xf + row_src_x_base;
            let src_y = inverse[[1, 0]] * dst_xf + row_src_y_base;

            if src_x >= 0.0 && src_x < src_w_limit && src_y >= 0.0 && src_y < src_h_limit {
                let x0 = src_x as usize;
                let y0 = src_y as usize;
                let dx = src_x - x0 as f32;
                let dy = src_y - y0 as f32;
                for c in 0..3 {
                    let value = (1.0 - dx)
                        * ((1.0 - dy) * frame[[y0, x0, c]] as f32
                            + dy * frame[[y0 + 1, x0, c]] as f32)
                        + dx * ((1.0 - dy) * frame[[y0, x0 + 1, c]] as f32
                            + dy * frame[[y0 + 1, x0 + 1, c]] as f32);
                    output[[dst_y, dst_x, c]] = value.round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
    Ok(output)
}

/// Composite a processed crop back into the full frame through the inverse
/// of the warp that produced it, using `mask` as per-pixel alpha.
pub fn paste_back(
    frame: &Frame,
    crop: &Frame,
    mask: &Array2<f32>,
    affine: &Array2<f32>,
) -> Result<Frame, EngineError> {
    let inverse = invert_affine(affine)?;
    let (frame_height, frame_width, _) = frame.dim();
    let (crop_height, crop_width, _) = crop.dim();

    // Only the frame region covered by the crop needs compositing.
    let corners = [
        Point2::new(0.0, 0.0),
        Point2::new(crop_width as f32, 0.0),
        Point2::new(0.0, crop_height as f32),
        Point2::new(crop_width as f32, crop_height as f32),
    ];
    let mut x_min = f32::MAX;
    let mut y_min = f32::MAX;
    let mut x_max = f32::MIN;
    let mut y_max = f32::MIN;
    for corner in corners {
        let mapped = transform_point(corner, &inverse);
        x_min = x_min.min(mapped.x);
        y_min = y_min.min(mapped.y);
        x_max = x_max.max(mapped.x);
        y_max = y_max.max(mapped.y);
    }
    let x_start = x_min.floor().max(0.0) as usize;
    let y_start = y_min.floor().max(0.0) as usize;
    let x_end = (x_max.ceil() as usize + 1).min(frame_width);
    let y_end = (y_max.ceil() as usize + 1).min(frame_height);

    let crop_w_limit = (crop_width - 1) as f32;
    let crop_h_limit = (crop_height - 1) as f32;

    let mut output = frame.clone();
    for y in y_start..y_end {
        for x in x_start..x_end {
            let mapped = transform_point(Point2::new(x as f32, y as f32), affine);
            if mapped.x < 0.0
                || mapped.x >= crop_w_limit
                || mapped.y < 0.0
                || mapped.y >= crop_h_limit
            {
                continue;
            }
            let x0 = mapped.x as usize;
            let y0 = mapped.y as usize;
            let dx = mapped.x - x0 as f32;
            let dy = mapped.y - y0 as f32;

            let sample_mask = (1.0 - dx)
                * ((1.0 - dy) * mask[[y0, x0]] + dy * mask[[y0 + 1, x0]])
                + dx * ((1.0 - dy) * mask[[y0, x0 + 1]] + dy * mask[[y0 + 1, x0 + 1]]);
            let alpha = sample_mask.clamp(0.0, 1.0);
            if alpha <= 0.0 {
                continue;
            }
            for c in 0..3 {
                let sample = (1.0 - dx)
                    * ((1.0 - dy) * crop[[y0, x0, c]] as f32 + dy * crop[[y0 + 1, x0, c]] as f32)
                    + dx * ((1.0 - dy) * crop[[y0, x0 + 1, c]] as f32
                        + dy * crop[[y0 + 1, x0 + 1, c]] as f32);
                let value = alpha * sample + (1.0 - alpha) * output[[y, x, c]] as f32;
                output[[y, x, c]] = value.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    Ok(output)
}

/// Greedy non-maximum suppression. Returns kept indices in descending score
/// order.
pub fn apply_nms(boxes: &[BBox], scores: &[f32], iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len().min(scores.len())).collect();
    order.sort_unstable_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut suppressed = vec![false; boxes.len()];
    let mut keep = Vec::new();
    for (rank, &index) in order.iter().enumerate() {
        if suppressed[index] {
            continue;
        }
        keep.push(index);
        for &other in &order[rank + 1..] {
            if !suppressed[other] && boxes[index].iou(&boxes[other]) > iou_threshold {
                suppressed[other] = true;
            }
        }
    }
    keep
}

/// Anchor grid for the SCRFD/RetinaFace decode: `[y, x]` pixel centers,
/// row-major, each repeated `anchor_total` times.
pub fn create_static_anchors(
    feature_stride: usize,
    anchor_total: usize,
    stride_height: usize,
    stride_width: usize,
) -> Vec<[f32; 2]> {
    let mut anchors = Vec::with_capacity(stride_height * stride_width * anchor_total);
    for i in 0..stride_height {
        for j in 0..stride_width {
            for _ in 0..anchor_total {
                anchors.push([(i * feature_stride) as f32, (j * feature_stride) as f32]);
            }
        }
    }
    anchors
}

/// Decode `[left, top, right, bottom]` distances around a `[y, x]` anchor.
pub fn distance_to_bbox(anchor: [f32; 2], distance: [f32; 4]) -> BBox {
    BBox::new(
        anchor[1] - distance[0],
        anchor[0] - distance[1],
        anchor[1] + distance[2],
        anchor[0] + distance[3],
    )
}

/// Decode 5 landmark offsets around a `[y, x]` anchor.
pub fn distance_to_landmark5(anchor: [f32; 2], offsets: &[[f32; 2]; 5]) -> Landmarks {
    offsets
        .iter()
        .map(|[dx, dy]| Point2::new(anchor[1] + dx, anchor[0] + dy))
        .collect()
}

/// Reduce a dense 68-point set to the canonical 5 points: eye centers are
/// the mean of their rings, nose tip is 30, mouth corners are 48 and 54.
pub fn convert_landmark_68_to_5(landmark68: &[Point2]) -> Landmarks {
    if landmark68.len() < 55 {
        return Vec::new();
    }
    let mean_of = |range: std::ops::Range<usize>| {
        let count = range.len() as f32;
        let (sx, sy) = landmark68[range]
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point2::new(sx / count, sy / count)
    };
    vec![
        mean_of(36..42),
        mean_of(42..48),
        landmark68[30],
        landmark68[48],
        landmark68[54],
    ]
}

/// Map a point detected on a CCW-rotated frame back to original-frame
/// coordinates. `original_size` is (width, height) of the unrotated frame.
pub fn rotate_point_back(point: Point2, angle: u32, original_size: (f32, f32)) -> Point2 {
    let (width, height) = original_size;
    match angle % 360 {
        90 => Point2::new(width - point.y, point.x),
        180 => Point2::new(width - point.x, height - point.y),
        270 => Point2::new(point.y, height - point.x),
        _ => point,
    }
}

pub fn rotate_landmarks_back(points: &[Point2], angle: u32, original_size: (f32, f32)) -> Landmarks {
    points
        .iter()
        .map(|p| rotate_point_back(*p, angle, original_size))
        .collect()
}

/// Inverse of [`rotate_point_back`]: map an original-frame point into the
/// coordinates of the CCW-rotated frame.
pub fn rotate_point_forward(point: Point2, angle: u32, original_size: (f32, f32)) -> Point2 {
    let (width, height) = original_size;
    match angle % 360 {
        90 => Point2::new(point.y, width - point.x),
        180 => Point2::new(width - point.x, height - point.y),
        270 => Point2::new(height - point.y, point.x),
        _ => point,
    }
}

/// Map an original-frame box into rotated-frame coordinates.
pub fn rotate_bbox_forward(bbox: &BBox, angle: u32, original_size: (f32, f32)) -> BBox {
    if angle % 360 == 0 {
        return *bbox;
    }
    let corners = [
        Point2::new(bbox.x_min, bbox.y_min),
        Point2::new(bbox.x_max, bbox.y_min),
        Point2::new(bbox.x_max, bbox.y_max),
        Point2::new(bbox.x_min, bbox.y_max),
    ];
    let mapped: Vec<Point2> = corners
        .iter()
        .map(|p| rotate_point_forward(*p, angle, original_size))
        .collect();
    let x_min = mapped.iter().map(|p| p.x).fold(f32::MAX, f32::min);
    let y_min = mapped.iter().map(|p| p.y).fold(f32::MAX, f32::min);
    let x_max = mapped.iter().map(|p| p.x).fold(f32::MIN, f32::max);
    let y_max = mapped.iter().map(|p| p.y).fold(f32::MIN, f32::max);
    BBox::new(x_min, y_min, x_max, y_max)
}

/// Map a box detected on a rotated frame back through the inverse rotation:
/// all four corners are mapped and re-boxed.
pub fn rotate_bbox_back(bbox: &BBox, angle: u32, original_size: (f32, f32)) -> BBox {
    if angle % 360 == 0 {
        return *bbox;
    }
    let corners = [
        Point2::new(bbox.x_min, bbox.y_min),
        Point2::new(bbox.x_max, bbox.y_min),
        Point2::new(bbox.x_max, bbox.y_max),
        Point2::new(bbox.x_min, bbox.y_max),
    ];
    let mapped: Vec<Point2> = corners
        .iter()
        .map(|p| rotate_point_back(*p, angle, original_size))
        .collect();
    let x_min = mapped.iter().map(|p| p.x).fold(f32::MAX, f32::min);
    let y_min = mapped.iter().map(|p| p.y).fold(f32::MAX, f32::min);
    let x_max = mapped.iter().map(|p| p.x).fold(f32::MIN, f32::max);
    let y_max = mapped.iter().map(|p| p.y).fold(f32::MIN, f32::max);
    BBox::new(x_min, y_min, x_max, y_max)
}

/// Arithmetic mean over a set of equally sized embeddings.
pub fn calc_average_embedding(embeddings: &[Embedding]) -> Embedding {
    let Some(first) = embeddings.first() else {
        return Vec::new();
    };
    let mut average = vec![0.0f32; first.len()];
    let mut count = 0usize;
    for embedding in embeddings {
        if embedding.len() != average.len() {
            continue;
        }
        for (sum, value) in average.iter_mut().zip(embedding.iter()) {
            *sum += value;
        }
        count += 1;
    }
    if count > 0 {
        for value in &mut average {
            *value /= count as f32;
        }
    }
    average
}

/// L2-normalized copy; zero vectors are returned unchanged.
pub fn normalize_embedding(embedding: &[f32]) -> Embedding {
    let norm: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm <= 1e-6 {
        return embedding.to_vec();
    }
    embedding.iter().map(|v| v / norm).collect()
}

/// `1 − dot(a, b)` over unit vectors; empty inputs give distance 0.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    1.0 - dot
}

/// Piecewise-linear remap of `value` from `[from.0, from.1]` onto
/// `[to.0, to.1]`, clamped at the edges.
pub fn interp(value: f32, from: (f32, f32), to: (f32, f32)) -> f32 {
    if value <= from.0 {
        return to.0;
    }
    if value >= from.1 {
        return to.1;
    }
    let t = (value - from.0) / (from.1 - from.0);
    to.0 + t * (to.1 - to.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use pretty_assertions::assert_eq;

    #[test]
    fn nms_keeps_the_best_of_each_cluster() {
        let boxes = vec![
            BBox::from_xywh(0.0, 0.0, 10.0, 10.0),
            BBox::from_xywh(1.0, 1.0, 10.0, 10.0),
            BBox::from_xywh(20.0, 20.0, 10.0, 10.0),
            BBox::from_xywh(21.0, 21.0, 10.0, 10.0),
        ];
        let scores = vec![0.9, 0.8, 0.7, 0.6];
        assert_eq!(apply_nms(&boxes, &scores, 0.5), vec![0, 2]);
    }

    #[test]
    fn static_anchors_repeat_per_grid_cell() {
        let anchors = create_static_anchors(8, 2, 2, 2);
        assert_eq!(anchors.len(), 8);
        assert_eq!(anchors[0], [0.0, 0.0]);
        assert_eq!(anchors[1], [0.0, 0.0]);
        assert_eq!(anchors[2], [0.0, 8.0]);
    }

    #[test]
    fn landmark_68_to_5_uses_ring_means() {
        let landmark68: Vec<Point2> = (0..68)
            .map(|i| Point2::new(i as f32, i as f32))
            .collect();
        let landmark5 = convert_landmark_68_to_5(&landmark68);
        assert_eq!(landmark5.len(), 5);
        assert_eq!(landmark5[0].x, 38.5);
        assert_eq!(landmark5[1].x, 44.5);
        assert_eq!(landmark5[2].x, 30.0);
        assert_eq!(landmark5[3].x, 48.0);
        assert_eq!(landmark5[4].x, 54.0);
    }

    #[test]
    fn rotate_point_back_matches_the_quarter_turns() {
        let size = (100.0, 50.0);
        let point = Point2::new(10.0, 20.0);
        assert_eq!(rotate_point_back(point, 0, size), point);
        assert_eq!(rotate_point_back(point, 90, size), Point2::new(80.0, 10.0));
        assert_eq!(rotate_point_back(point, 180, size), Point2::new(90.0, 30.0));
        assert_eq!(rotate_point_back(point, 270, size), Point2::new(20.0, 40.0));
    }

    #[test]
    fn rotate_bbox_back_reboxes_corners() {
        let size = (100.0, 50.0);
        let bbox = BBox::from_xywh(10.0, 10.0, 20.0, 20.0);
        assert_eq!(rotate_bbox_back(&bbox, 0, size), bbox);
        assert_eq!(
            rotate_bbox_back(&bbox, 90, size),
            BBox::from_xywh(70.0, 10.0, 20.0, 20.0)
        );
        assert_eq!(
            rotate_bbox_back(&bbox, 180, size),
            BBox::from_xywh(70.0, 20.0, 20.0, 20.0)
        );
    }

    #[test]
    fn average_embedding_is_elementwise_mean() {
        let embeddings = vec![vec![1.0, 2.0, 3.0], vec![3.0, 2.0, 1.0]];
        assert_eq!(calc_average_embedding(&embeddings), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn normalized_embeddings_have_unit_norm() {
        let normed = normalize_embedding(&vec![3.0; 512]);
        let norm: f32 = normed.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn cosine_distance_of_identical_unit_vectors_is_zero() {
        let v = normalize_embedding(&[1.0, 2.0, 3.0]);
        assert!(cosine_distance(&v, &v).abs() < 1e-5);
        let opposite: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((cosine_distance(&v, &opposite) - 2.0).abs() < 1e-5);
    }

    #[test]
    fn similarity_transform_recovers_translation_and_scale() {
        let src = vec![
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(0.0, 10.0),
            Point2::new(5.0, 5.0),
        ];
        let dst: Vec<Point2> = src
            .iter()
            .map(|p| Point2::new(p.x * 2.0 + 3.0, p.y * 2.0 + 7.0))
            .collect();
        let matrix = estimate_similarity(&src, &dst).unwrap();
        for (p, q) in src.iter().zip(dst.iter()) {
            let mapped = transform_point(*p, &matrix);
            assert!((mapped.x - q.x).abs() < 1e-3);
            assert!((mapped.y - q.y).abs() < 1e-3);
        }
    }

    #[test]
    fn warp_then_paste_with_full_mask_restores_pixels_within_one() {
        // A smooth gradient so bilinear interpolation stays near-exact.
        let frame: Frame = Array3::from_shape_fn((64, 64, 3), |(y, x, c)| {
            (y + x + c * 5).min(255) as u8
        });
        let landmark5: Vec<Point2> = WarpTemplate::Arcface112V2
            .points()
            .iter()
            .map(|[x, y]| Point2::new(x * 64.0, y * 64.0))
            .collect();

        let (crop, affine) =
            warp_face_by_landmark5(&frame, &landmark5, WarpTemplate::Arcface112V2, (64, 64))
                .unwrap();
        let mask = Array2::from_elem((64, 64), 1.0f32);
        let restored = paste_back(&frame, &crop, &mask, &affine).unwrap();

        for y in 1..63 {
            for x in 1..63 {
                for c in 0..3 {
                    let a = frame[[y, x, c]] as i16;
                    let b = restored[[y, x, c]] as i16;
                    assert!(
                        (a - b).abs() <= 1,
                        "pixel ({y},{x},{c}) drifted: {a} vs {b}"
                    );
                }
            }
        }
    }

    #[test]
    fn interp_clamps_and_remaps() {
        assert_eq!(interp(-1.0, (0.0, 0.9), (0.0, 1.0)), 0.0);
        assert_eq!(interp(0.95, (0.0, 0.9), (0.0, 1.0)), 1.0);
        assert!((interp(0.45, (0.0, 0.9), (0.0, 1.0)) - 0.5).abs() < 1e-6);
    }
}
