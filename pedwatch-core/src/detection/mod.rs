//! detection — candidate boxes and greedy non-maximum suppression
//!
//! Overlap is measured as intersection-over-union on continuous
//! coordinates. This is the one convention used everywhere (scanner tests,
//! CLI output, the suppression threshold in configs).

use serde::{Deserialize, Serialize};

/// Default IoU above which the weaker of two boxes is dropped.
pub const DEFAULT_OVERLAP_THRESHOLD: f32 = 0.3;

/// Axis-aligned bounding box in pixel coordinates of the original frame,
/// with the classifier score that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }
    /// IoU (intersection over union) with another box.
    pub fn iou(&self, other: &BBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }
}

/// Greedy NMS: order by confidence, keep the best remaining box, drop
/// everything overlapping it by more than `overlap_threshold`, repeat.
///
/// The sort is stable, so equal scores keep their enumeration order.
pub fn suppress(candidates: &[BBox], overlap_threshold: f32) -> Vec<BBox> {
    let mut boxes = candidates.to_vec();
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BBox> = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }
        kept.push(boxes[i]);
        for j in (i + 1)..boxes.len() {
            if !suppressed[j] && boxes[i].iou(&boxes[j]) > overlap_threshold {
                suppressed[j] = true;
            }
        }
    }

    kept
}
