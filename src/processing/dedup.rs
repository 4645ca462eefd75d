use super::qr_detection::{BoundingBox, DetectionRegion};

/// Regions overlapping more than this are the same physical code.
pub const IOU_THRESHOLD: f32 = 0.5;

/// Intersection-over-Union. Degenerate or disjoint boxes give 0.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    if a.is_degenerate() || b.is_degenerate() {
        return 0.0;
    }

    let ix0 = a.x1.max(b.x1);
    let iy0 = a.y1.max(b.y1);
    let ix1 = a.x2.min(b.x2);
    let iy1 = a.y2.min(b.y2);

    if ix1 <= ix0 || iy1 <= iy0 {
        return 0.0;
    }

    let inter = (ix1 - ix0) * (iy1 - iy0);
    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy, first-seen-wins suppression at [`IOU_THRESHOLD`].
pub fn dedupe(regions: Vec<DetectionRegion>) -> Vec<DetectionRegion> {
    dedupe_with_threshold(regions, IOU_THRESHOLD)
}

/// Walks `regions` in order and keeps one only if its IoU with every region
/// kept so far is `<= threshold`. No confidence re-ranking, so the result
/// depends on input order.
pub fn dedupe_with_threshold(regions: Vec<DetectionRegion>, threshold: f32) -> Vec<DetectionRegion> {
    let mut kept: Vec<DetectionRegion> = Vec::with_capacity(regions.len());
    for region in regions {
        if kept.iter().all(|k| iou(&k.bbox, &region.bbox) <= threshold) {
            kept.push(region);
        }
    }
    kept
}
