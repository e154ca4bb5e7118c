//! features — HOG ⊕ LBP descriptor over a canonical 64×128 patch
//!
//! Every crop is resized to the canonical patch size, converted to gray, and
//! summarised by a gradient-orientation descriptor (`imageproc::hog`)
//! followed by an L1-normalised uniform-LBP histogram. The geometry lives in
//! [`ExtractorConfig`], which is stored alongside trained weights: a model is
//! only valid for the exact configuration it was trained with.

pub mod texture;

use fast_image_resize as fr;
use imageproc::hog::{hog, HogOptions};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

use crate::error::{Error, Result};
use crate::video::RgbFrame;

// ── Configuration ────────────────────────────────────────────────────────────

/// Gradient-histogram geometry. Defaults match the classic Dalal–Triggs
/// people detector: 8 px cells, 2×2-cell blocks sliding one cell at a time,
/// 9 unsigned orientation bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HogConfig {
    pub orientations: usize,
    pub signed: bool,
    pub cell_side: usize,
    /// Block side, in cells.
    pub block_side: usize,
    /// Block stride, in cells.
    pub block_stride: usize,
}

impl Default for HogConfig {
    fn default() -> Self {
        Self {
            orientations: 9,
            signed: false,
            cell_side: 8,
            block_side: 2,
            block_stride: 1,
        }
    }
}

impl HogConfig {
    fn options(&self) -> HogOptions {
        HogOptions {
            orientations: self.orientations,
            signed: self.signed,
            cell_side: self.cell_side,
            block_side: self.block_side,
            block_stride: self.block_stride,
        }
    }

    /// Descriptor length for a `width`×`height` patch, or why the geometry
    /// does not tile it.
    pub fn descriptor_len(&self, width: u32, height: u32) -> Result<usize> {
        if self.orientations == 0 || self.cell_side == 0 {
            return Err(Error::invalid("HOG needs at least one orientation and a non-zero cell"));
        }
        if self.block_side == 0 || self.block_stride == 0 {
            return Err(Error::invalid("HOG block side and stride must be non-zero"));
        }
        let (w, h) = (width as usize, height as usize);
        if w % self.cell_side != 0 || h % self.cell_side != 0 {
            return Err(Error::invalid(format!(
                "patch {width}x{height} is not a whole number of {} px cells",
                self.cell_side
            )));
        }
        let blocks = |cells: usize| -> Result<usize> {
            if cells < self.block_side || (cells - self.block_side) % self.block_stride != 0 {
                return Err(Error::invalid(format!(
                    "{cells} cells cannot be tiled by {}-cell blocks with stride {}",
                    self.block_side, self.block_stride
                )));
            }
            Ok((cells - self.block_side) / self.block_stride + 1)
        };
        let blocks_wide = blocks(w / self.cell_side)?;
        let blocks_high = blocks(h / self.cell_side)?;
        Ok(blocks_wide * blocks_high * self.block_side * self.block_side * self.orientations)
    }
}

/// Texture-histogram settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureConfig {
    /// Ring neighbours per pixel (P).
    pub points: u32,
    /// Ring radius in pixels (R).
    pub radius: f32,
    /// Histogram bins over the code range `[0, bins)`.
    pub bins: usize,
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            points: 8,
            radius: 1.0,
            bins: 59,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub patch_width: u32,
    pub patch_height: u32,
    pub hog: HogConfig,
    pub texture: TextureConfig,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            patch_width: 64,
            patch_height: 128,
            hog: HogConfig::default(),
            texture: TextureConfig::default(),
        }
    }
}

// ── Extractor ────────────────────────────────────────────────────────────────

thread_local! {
    static PATCH_RESIZER: RefCell<fr::Resizer> = RefCell::new(fr::Resizer::new());
}

/// Turns crops into feature vectors. Cheap to clone; holds no buffers, so a
/// single instance can be shared across rayon workers.
#[derive(Debug, Clone)]
pub struct DescriptorExtractor {
    config: ExtractorConfig,
    gradient_len: usize,
}

impl DescriptorExtractor {
    pub fn new(config: ExtractorConfig) -> Result<Self> {
        if config.patch_width == 0 || config.patch_height == 0 {
            return Err(Error::invalid("patch size must be non-zero"));
        }
        let gradient_len = config
            .hog
            .descriptor_len(config.patch_width, config.patch_height)?;

        let tex = &config.texture;
        if !(1..=32).contains(&tex.points) {
            return Err(Error::invalid(format!(
                "LBP ring needs 1..=32 points, got {}",
                tex.points
            )));
        }
        if !(tex.radius.is_finite() && tex.radius > 0.0) {
            return Err(Error::invalid(format!("LBP radius must be positive, got {}", tex.radius)));
        }
        if tex.bins < tex.points as usize + 2 {
            return Err(Error::invalid(format!(
                "{} texture bins cannot hold the {} uniform LBP classes",
                tex.bins,
                tex.points + 2
            )));
        }

        Ok(Self {
            config,
            gradient_len,
        })
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn patch_size(&self) -> (u32, u32) {
        (self.config.patch_width, self.config.patch_height)
    }

    pub fn gradient_len(&self) -> usize {
        self.gradient_len
    }

    pub fn texture_len(&self) -> usize {
        self.config.texture.bins
    }

    pub fn feature_len(&self) -> usize {
        self.gradient_len + self.texture_len()
    }

    /// Feature vector for a crop of any size; gradient part first, texture
    /// part last.
    pub fn extract(&self, crop: &RgbFrame) -> Result<Vec<f32>> {
        crop.validate()?;
        let (pw, ph) = self.patch_size();
        let resized;
        let patch = if crop.width == pw && crop.height == ph {
            crop
        } else {
            resized = resize_patch(crop, pw, ph)?;
            &resized
        };

        let gray = patch.to_gray();
        let mut features = hog(&gray, self.config.hog.options())
            .map_err(|e| Error::invalid(format!("HOG failed: {e}")))?;
        if features.len() != self.gradient_len {
            return Err(Error::invalid(format!(
                "HOG produced {} values, expected {}",
                features.len(),
                self.gradient_len
            )));
        }
        for v in &mut features {
            if !v.is_finite() {
                *v = 0.0;
            }
        }

        features.extend(texture::histogram(&gray, &self.config.texture));
        Ok(features)
    }

    /// The texture sub-vector of a feature vector produced by this extractor.
    pub fn texture_part<'a>(&self, features: &'a [f32]) -> &'a [f32] {
        &features[self.gradient_len.min(features.len())..]
    }
}

fn resize_patch(crop: &RgbFrame, width: u32, height: u32) -> Result<RgbFrame> {
    let src = fr::images::ImageRef::new(crop.width, crop.height, &crop.data, fr::PixelType::U8x3)
        .map_err(|e| Error::invalid(format!("failed to create patch resize source: {e}")))?;
    let mut dst = fr::images::Image::new(width, height, fr::PixelType::U8x3);

    let options =
        fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
    PATCH_RESIZER.with(|resizer| {
        resizer
            .borrow_mut()
            .resize(&src, &mut dst, Some(&options))
            .map_err(|e| Error::invalid(format!("patch resize failed: {e}")))
    })?;

    Ok(RgbFrame::new(dst.into_vec(), width, height, crop.pts))
}
