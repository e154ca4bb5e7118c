//! scanner — dense sliding-window scoring over one frame
//!
//! The frame is first resized to a working resolution (scanning cost is
//! independent of the display resolution), then every window of the
//! canonical patch size on a fixed stride grid is extracted and scored.
//! Windows that would cross the frame border are skipped, never padded.
//! Accepted windows are mapped back to original-frame coordinates.

use fast_image_resize as fr;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tracing::debug;

use crate::classifier::LinearClassifier;
use crate::detection::BBox;
use crate::error::{Error, Result};
use crate::features::DescriptorExtractor;
use crate::video::RgbFrame;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Horizontal step between window origins, in working-resolution pixels.
    pub stride_x: u32,
    /// Vertical step between window origins, in working-resolution pixels.
    pub stride_y: u32,
    /// Working resolution; `None` scans at the frame's own size.
    pub scan_width: Option<u32>,
    pub scan_height: Option<u32>,
    /// Windows scoring strictly above this become candidates. May be
    /// negative to trade precision for recall.
    pub threshold: f32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            stride_x: 16,
            stride_y: 16,
            scan_width: Some(320),
            scan_height: Some(240),
            threshold: 0.0,
        }
    }
}

/// Top-left corners of every window that fits entirely inside a
/// `width`×`height` image, in raster order.
pub fn window_positions(
    width: u32,
    height: u32,
    window_w: u32,
    window_h: u32,
    stride_x: u32,
    stride_y: u32,
) -> Vec<(u32, u32)> {
    if window_w > width || window_h > height || stride_x == 0 || stride_y == 0 {
        return Vec::new();
    }
    let ys = (0..=height - window_h).step_by(stride_y as usize);
    ys.flat_map(|y| {
        (0..=width - window_w)
            .step_by(stride_x as usize)
            .map(move |x| (x, y))
    })
    .collect()
}

/// Owns one detection session's extractor, classifier and resize scratch.
pub struct WindowScanner {
    extractor: DescriptorExtractor,
    classifier: LinearClassifier,
    config: ScanConfig,
    resizer: fr::Resizer,
    scan_buf: Vec<u8>,
}

impl WindowScanner {
    /// Fails with `CorruptModel` if the classifier was not built for this
    /// extractor's feature length.
    pub fn new(
        extractor: DescriptorExtractor,
        classifier: LinearClassifier,
        config: ScanConfig,
    ) -> Result<Self> {
        if classifier.len() != extractor.feature_len() {
            return Err(Error::corrupt(format!(
                "classifier has {} weights, extractor produces {} features",
                classifier.len(),
                extractor.feature_len()
            )));
        }
        if config.stride_x == 0 || config.stride_y == 0 {
            return Err(Error::invalid("scan stride must be non-zero"));
        }
        if matches!(config.scan_width, Some(0)) || matches!(config.scan_height, Some(0)) {
            return Err(Error::invalid("scan resolution must be non-zero"));
        }
        if !config.threshold.is_finite() {
            return Err(Error::invalid("scan threshold must be finite"));
        }
        Ok(Self {
            extractor,
            classifier,
            config,
            resizer: fr::Resizer::new(),
            scan_buf: Vec::new(),
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn extractor(&self) -> &DescriptorExtractor {
        &self.extractor
    }

    pub fn classifier(&self) -> &LinearClassifier {
        &self.classifier
    }

    /// Candidates for one frame, in raster order of their windows.
    ///
    /// An absent or malformed frame yields `NoFrame`. A window whose
    /// extraction fails is left out; the rest of the frame is still scanned.
    pub fn scan(&mut self, frame: Option<&RgbFrame>) -> Result<Vec<BBox>> {
        let frame = frame.filter(|f| f.is_valid()).ok_or(Error::NoFrame)?;

        let scan_w = self.config.scan_width.unwrap_or(frame.width);
        let scan_h = self.config.scan_height.unwrap_or(frame.height);
        let working = if (scan_w, scan_h) == (frame.width, frame.height) {
            Cow::Borrowed(frame)
        } else {
            Cow::Owned(self.downscale_frame(frame, scan_w, scan_h)?)
        };

        let (pw, ph) = self.extractor.patch_size();
        let positions = window_positions(
            scan_w,
            scan_h,
            pw,
            ph,
            self.config.stride_x,
            self.config.stride_y,
        );

        let sx = frame.width as f32 / scan_w as f32;
        let sy = frame.height as f32 / scan_h as f32;
        let threshold = self.config.threshold;
        let extractor = &self.extractor;
        let classifier = &self.classifier;
        let working_ref: &RgbFrame = &working;

        let candidates: Vec<BBox> = positions
            .par_iter()
            .filter_map(|&(x, y)| {
                let features = match working_ref
                    .crop(x, y, pw, ph)
                    .and_then(|window| extractor.extract(&window))
                {
                    Ok(f) => f,
                    Err(e) => {
                        debug!(x, y, "window skipped: {e}");
                        return None;
                    }
                };
                let score = classifier.score(&features);
                (score > threshold).then(|| {
                    BBox::new(
                        x as f32 * sx,
                        y as f32 * sy,
                        (x + pw) as f32 * sx,
                        (y + ph) as f32 * sy,
                        score,
                    )
                })
            })
            .collect();

        debug!(
            windows = positions.len(),
            candidates = candidates.len(),
            scan_w,
            scan_h,
            "frame scanned"
        );

        if let Cow::Owned(scaled) = working {
            self.scan_buf = scaled.data;
        }
        Ok(candidates)
    }

    fn downscale_frame(&mut self, frame: &RgbFrame, out_w: u32, out_h: u32) -> Result<RgbFrame> {
        let src =
            fr::images::ImageRef::new(frame.width, frame.height, &frame.data, fr::PixelType::U8x3)
                .map_err(|e| Error::invalid(format!("failed to create scan resize source: {e}")))?;

        let out_len = (out_w * out_h * 3) as usize;
        if self.scan_buf.len() != out_len {
            self.scan_buf.resize(out_len, 0);
        }

        let mut dst = fr::images::Image::from_vec_u8(
            out_w,
            out_h,
            std::mem::take(&mut self.scan_buf),
            fr::PixelType::U8x3,
        )
        .map_err(|e| Error::invalid(format!("failed to create scan resize destination: {e}")))?;

        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
        self.resizer
            .resize(&src, &mut dst, Some(&options))
            .map_err(|e| Error::invalid(format!("failed to resize frame for scanning: {e}")))?;

        Ok(RgbFrame::new(dst.into_vec(), out_w, out_h, frame.pts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_includes_the_last_window_that_fits() {
        let positions = window_positions(96, 160, 64, 128, 16, 16);
        assert_eq!(
            positions,
            vec![(0, 0), (16, 0), (32, 0), (0, 16), (16, 16), (32, 16), (0, 32), (16, 32), (32, 32)]
        );
    }

    #[test]
    fn grid_skips_partial_windows() {
        // 100 - 64 = 36 → x ∈ {0, 16, 32}; a window at 48 would overhang.
        let positions = window_positions(100, 128, 64, 128, 16, 16);
        assert_eq!(positions, vec![(0, 0), (16, 0), (32, 0)]);
    }

    #[test]
    fn frame_smaller_than_a_window_has_no_positions() {
        assert!(window_positions(63, 200, 64, 128, 8, 8).is_empty());
        assert!(window_positions(64, 127, 64, 128, 8, 8).is_empty());
    }

    #[test]
    fn exact_fit_has_one_position() {
        assert_eq!(window_positions(64, 128, 64, 128, 16, 16), vec![(0, 0)]);
    }
}
