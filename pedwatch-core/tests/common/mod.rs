//! Synthetic images shared by the integration tests.
#![allow(dead_code)]

use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

use pedwatch_core::classifier::LinearClassifier;
use pedwatch_core::features::{DescriptorExtractor, ExtractorConfig};
use pedwatch_core::scanner::{ScanConfig, WindowScanner};
use pedwatch_core::video::RgbFrame;

pub fn default_extractor() -> DescriptorExtractor {
    DescriptorExtractor::new(ExtractorConfig::default()).unwrap()
}

/// A classifier that ignores its input and always scores `bias`.
pub fn constant_classifier(extractor: &DescriptorExtractor, bias: f32) -> LinearClassifier {
    LinearClassifier::new(vec![0.0; extractor.feature_len()], bias).unwrap()
}

/// Scanner whose every window scores `bias`, scanning at frame resolution
/// unless `scan` says otherwise.
pub fn constant_scanner(bias: f32, scan: ScanConfig) -> WindowScanner {
    let extractor = default_extractor();
    let classifier = constant_classifier(&extractor, bias);
    WindowScanner::new(extractor, classifier, scan).unwrap()
}

pub fn native_resolution() -> ScanConfig {
    ScanConfig {
        scan_width: None,
        scan_height: None,
        ..ScanConfig::default()
    }
}

/// Light upright silhouette (head and torso) on a dark background.
/// `shift` moves it sideways, `shade` sets its brightness.
pub fn figure_image(shift: i32, shade: u8) -> RgbImage {
    let mut img = RgbImage::from_pixel(64, 128, Rgb([20, 20, 24]));
    let cx = 32 + shift;
    for y in 0..128i32 {
        for x in 0..64i32 {
            let head = (x - cx).pow(2) * 4 + (y - 22).pow(2) * 3 < 420;
            let torso = (x - cx).abs() <= 11 && (34..84).contains(&y);
            let legs = (y >= 84 && y < 122) && ((x - (cx - 6)).abs() <= 4 || (x - (cx + 6)).abs() <= 4);
            if head || torso || legs {
                img.put_pixel(x as u32, y as u32, Rgb([shade, shade, shade.saturating_sub(10)]));
            }
        }
    }
    img
}

/// Uniform random pixels.
pub fn noise_image(width: u32, height: u32, seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    RgbImage::from_fn(width, height, |_, _| Rgb([rng.gen(), rng.gen(), rng.gen()]))
}

/// Horizontal bands of alternating brightness.
pub fn stripes_image(width: u32, height: u32, period: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |_, y| {
        if (y / period) % 2 == 0 {
            Rgb([200, 190, 180])
        } else {
            Rgb([40, 45, 50])
        }
    })
}

pub fn frame(img: RgbImage) -> RgbFrame {
    RgbFrame::from_image(img, 0)
}

pub fn write_png(img: &RgbImage, path: &Path) {
    img.save(path).unwrap();
}
