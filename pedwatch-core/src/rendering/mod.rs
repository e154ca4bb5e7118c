//! rendering — hand detections to whatever displays or forwards them
//!
//! The dashboard / messaging relay lives outside this crate. What it gets
//! from here is an RGB image, either the untouched frame or one with the
//! detections drawn in, chosen by a [`VisualMode`].

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

use crate::detection::BBox;
use crate::video::RgbFrame;

/// Box colour for detections.
pub const DETECTION_COLOR: [u8; 3] = [0, 255, 0];
/// Outline thickness in pixels.
const LINE_WIDTH: i32 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualMode {
    /// Detections drawn over the frame.
    #[default]
    Annotated,
    /// The frame exactly as captured.
    Original,
}

impl VisualMode {
    pub fn toggled(self) -> Self {
        match self {
            VisualMode::Annotated => VisualMode::Original,
            VisualMode::Original => VisualMode::Annotated,
        }
    }
}

/// Produce the image to show or forward for one processed frame.
pub fn render(frame: &RgbFrame, detections: &[BBox], mode: VisualMode) -> Option<RgbImage> {
    let mut out = frame.clone();
    if mode == VisualMode::Annotated {
        draw_boxes(&mut out, detections, DETECTION_COLOR);
    }
    out.into_image()
}

/// Draw bounding boxes onto a frame's RGB data in-place.
pub fn draw_boxes(frame: &mut RgbFrame, boxes: &[BBox], color: [u8; 3]) {
    // Borrow the buffer for drawing and hand it back afterwards.
    let Some(mut img) = RgbImage::from_raw(frame.width, frame.height, std::mem::take(&mut frame.data))
    else {
        return;
    };

    for bbox in boxes {
        for inset in 0..LINE_WIDTH {
            let w = bbox.width() as i32 - 2 * inset;
            let h = bbox.height() as i32 - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(bbox.x1 as i32 + inset, bbox.y1 as i32 + inset)
                .of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut img, rect, Rgb(color));
        }
    }

    frame.data = img.into_raw();
}
