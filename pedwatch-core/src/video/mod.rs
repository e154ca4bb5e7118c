//! video — frame type and frame sources
//!
//! The detector only sees `RgbFrame`s; where they come from (a directory of
//! stills, a decoded video file, frames already in memory) is hidden behind
//! the `FrameSource` trait so the live runtime can own any of them.

use image::{GrayImage, ImageBuffer, RgbImage};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};

#[cfg(feature = "ffmpeg")]
mod ffmpeg;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::VideoFileSource;

/// File extensions accepted by [`ImageSequenceSource`] and the trainer.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// A single video frame in RGB24 format, along with its presentation
/// timestamp (source time-base units, or the frame index for stills).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
    pub data: Vec<u8>, // packed RGB24, row-major
    pub width: u32,
    pub height: u32,
    pub pts: i64,
}

impl RgbFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, pts: i64) -> Self {
        Self {
            data,
            width,
            height,
            pts,
        }
    }

    /// Uniform frame filled with `rgb`.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], pts: i64) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take((width * height * 3) as usize)
            .collect();
        Self::new(data, width, height, pts)
    }

    pub fn from_image(img: RgbImage, pts: i64) -> Self {
        let (width, height) = img.dimensions();
        Self::new(img.into_raw(), width, height, pts)
    }

    pub fn into_image(self) -> Option<RgbImage> {
        ImageBuffer::from_raw(self.width, self.height, self.data)
    }

    /// Non-empty and the buffer length matches the dimensions.
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == self.width as usize * self.height as usize * 3
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::invalid(format!(
                "zero-area frame {}x{}",
                self.width, self.height
            )));
        }
        if !self.is_valid() {
            return Err(Error::invalid(format!(
                "frame buffer holds {} bytes, expected {} for {}x{} RGB",
                self.data.len(),
                self.width as usize * self.height as usize * 3,
                self.width,
                self.height
            )));
        }
        Ok(())
    }

    /// Copy out the `w`×`h` region whose top-left corner is (`x`, `y`).
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> Result<RgbFrame> {
        self.validate()?;
        if w == 0 || h == 0 || x + w > self.width || y + h > self.height {
            return Err(Error::invalid(format!(
                "crop {w}x{h}+{x}+{y} outside {}x{} frame",
                self.width, self.height
            )));
        }
        let src_stride = (self.width * 3) as usize;
        let dst_stride = (w * 3) as usize;
        let mut data = Vec::with_capacity(dst_stride * h as usize);
        for row in 0..h as usize {
            let src_start = (y as usize + row) * src_stride + x as usize * 3;
            data.extend_from_slice(&self.data[src_start..src_start + dst_stride]);
        }
        Ok(RgbFrame::new(data, w, h, self.pts))
    }

    /// BT.601 luminance.
    pub fn to_gray(&self) -> GrayImage {
        let luma: Vec<u8> = self
            .data
            .chunks_exact(3)
            .map(|px| {
                (0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32).round() as u8
            })
            .collect();
        GrayImage::from_raw(self.width, self.height, luma)
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }
}

/// Anything that yields frames one at a time.
///
/// `Ok(None)` marks the end of the stream. An `Err` is a failed read of a
/// single frame; callers skip it and keep pulling.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbFrame>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
        (**self).next_frame()
    }
}

// ── Image sequence ───────────────────────────────────────────────────────────

/// Plays back the still images of a directory in file-name order.
#[derive(Debug)]
pub struct ImageSequenceSource {
    frames: Vec<PathBuf>,
    cursor: usize,
}

impl ImageSequenceSource {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut frames = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && has_image_extension(&path) {
                frames.push(path);
            }
        }
        frames.sort();
        info!(dir = %dir.display(), frames = frames.len(), "opened image sequence");
        Ok(Self { frames, cursor: 0 })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
        let Some(path) = self.frames.get(self.cursor).cloned() else {
            return Ok(None);
        };
        let pts = self.cursor as i64;
        self.cursor += 1;
        debug!(path = %path.display(), "reading frame");
        let img = image::open(&path)
            .map_err(|source| Error::ImageLoad { path, source })?
            .into_rgb8();
        Ok(Some(RgbFrame::from_image(img, pts)))
    }
}

// ── In-memory ────────────────────────────────────────────────────────────────

/// Frames handed over up front; used for single-image scans and tests.
#[derive(Debug, Default)]
pub struct MemorySource {
    frames: VecDeque<RgbFrame>,
}

impl MemorySource {
    pub fn new(frames: impl IntoIterator<Item = RgbFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
        Ok(self.frames.pop_front())
    }
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}
