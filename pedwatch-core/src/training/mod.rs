//! training — fit a classifier from labelled image corpora
//!
//! Two directories, one per class, are walked recursively. Every image is
//! reduced to a feature vector by the same extractor the scanner uses, each
//! class is shuffled and split on its own, the SVM is fitted on the larger
//! part and scored on the held-out part.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::classifier::{fit, LabeledSample, LinearClassifier, ModelArtifact, SvmParams, TrainingSummary};
use crate::error::{Error, Result};
use crate::features::DescriptorExtractor;
use crate::video::{has_image_extension, RgbFrame};

/// Images decoded and described per parallel batch.
const EXTRACT_CHUNK: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub positive_dir: PathBuf,
    pub negative_dir: PathBuf,
    /// Use at most this many positive images (sorted path order).
    #[serde(default)]
    pub max_positive: Option<usize>,
    #[serde(default)]
    pub max_negative: Option<usize>,
    /// Share of the samples held out for the accuracy estimate.
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    #[serde(default)]
    pub svm: SvmParams,
}

fn default_test_fraction() -> f64 {
    0.2
}

impl TrainingConfig {
    pub fn new(positive_dir: impl Into<PathBuf>, negative_dir: impl Into<PathBuf>) -> Self {
        Self {
            positive_dir: positive_dir.into(),
            negative_dir: negative_dir.into(),
            max_positive: None,
            max_negative: None,
            test_fraction: default_test_fraction(),
            svm: SvmParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    /// Usable positive samples.
    pub positives: usize,
    pub negatives: usize,
    /// Files that looked like images but could not be decoded.
    pub failed_loads: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    /// Held-out accuracy; `None` when nothing was held out.
    pub accuracy: Option<f64>,
    pub iterations: usize,
    pub converged: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub classifier: LinearClassifier,
    pub report: TrainingReport,
}

pub struct Trainer {
    extractor: DescriptorExtractor,
}

impl Trainer {
    pub fn new(extractor: DescriptorExtractor) -> Self {
        Self { extractor }
    }

    pub fn extractor(&self) -> &DescriptorExtractor {
        &self.extractor
    }

    /// Load both corpora, fit and evaluate. `progress` is called with
    /// (images described, images total) after every batch.
    pub fn run(
        &self,
        config: &TrainingConfig,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<TrainingOutcome> {
        if !(0.0..1.0).contains(&config.test_fraction) {
            return Err(Error::invalid(format!(
                "test fraction must lie in [0, 1), got {}",
                config.test_fraction
            )));
        }

        // A negative corpus nested under the positive one is not a positive.
        let mut positive_files = collect_images(&config.positive_dir, Some(&config.negative_dir))?;
        let mut negative_files = collect_images(&config.negative_dir, None)?;
        if let Some(max) = config.max_positive {
            positive_files.truncate(max);
        }
        if let Some(max) = config.max_negative {
            negative_files.truncate(max);
        }
        info!(
            positives = positive_files.len(),
            negatives = negative_files.len(),
            "collected training images"
        );

        let total = positive_files.len() + negative_files.len();
        let mut done = 0;
        progress(done, total);

        let mut failed_loads = 0;
        let mut samples: Vec<LabeledSample> = Vec::with_capacity(total);
        for (files, positive) in [(&positive_files, true), (&negative_files, false)] {
            for chunk in files.chunks(EXTRACT_CHUNK) {
                let described: Vec<Option<Vec<f32>>> = chunk
                    .par_iter()
                    .map(|path| match self.describe(path) {
                        Ok(features) => Some(features),
                        Err(e) => {
                            warn!("skipping training image: {e}");
                            None
                        }
                    })
                    .collect();
                for features in described {
                    match features {
                        Some(features) => samples.push(LabeledSample::new(features, positive)),
                        None => failed_loads += 1,
                    }
                }
                done += chunk.len();
                progress(done, total);
            }
        }

        let positives = samples.iter().filter(|s| s.positive).count();
        let negatives = samples.len() - positives;
        if positives == 0 || negatives == 0 {
            return Err(Error::invalid(format!(
                "need samples of both classes, got {positives} positive and {negatives} negative \
                 ({failed_loads} unreadable)"
            )));
        }

        let mut rng = StdRng::seed_from_u64(config.svm.seed);
        let (train, test) = stratified_split(samples, config.test_fraction, &mut rng);

        info!(train = train.len(), test = test.len(), "fitting linear SVM");
        let fitted = fit(&train, &config.svm)?;
        let accuracy = fitted.classifier.accuracy(&test);
        let warnings = fitted.warning().map(|w| w.to_string()).into_iter().collect();

        match accuracy {
            Some(acc) => info!(accuracy = format!("{:.4}", acc), "held-out accuracy"),
            None => info!("no held-out samples, accuracy not measured"),
        }

        Ok(TrainingOutcome {
            report: TrainingReport {
                positives,
                negatives,
                failed_loads,
                train_samples: train.len(),
                test_samples: test.len(),
                accuracy,
                iterations: fitted.iterations,
                converged: fitted.converged,
                warnings,
            },
            classifier: fitted.classifier,
        })
    }

    /// Write the fitted model together with this trainer's extractor
    /// settings.
    pub fn save(&self, outcome: &TrainingOutcome, path: &Path) -> Result<()> {
        let report = &outcome.report;
        let summary = TrainingSummary {
            positives: report.positives,
            negatives: report.negatives,
            accuracy: report.accuracy,
            iterations: report.iterations,
            converged: report.converged,
        };
        ModelArtifact::new(&outcome.classifier, &self.extractor, Some(summary))?.save(path)
    }

    fn describe(&self, path: &Path) -> Result<Vec<f32>> {
        let img = image::open(path)
            .map_err(|source| Error::ImageLoad {
                path: path.to_path_buf(),
                source,
            })?
            .into_rgb8();
        self.extractor.extract(&RgbFrame::from_image(img, 0))
    }
}

/// Samples of one class to hold out: `ceil(n · fraction)`, leaving at
/// least one to train on.
fn held_out_count(n: usize, fraction: f64) -> usize {
    let count = (n as f64 * fraction).ceil() as usize;
    count.min(n.saturating_sub(1))
}

/// Shuffle and split each class on its own, so both classes keep at least
/// one training sample whatever their sizes.
fn stratified_split(
    samples: Vec<LabeledSample>,
    fraction: f64,
    rng: &mut StdRng,
) -> (Vec<LabeledSample>, Vec<LabeledSample>) {
    let (mut positive, mut negative): (Vec<_>, Vec<_>) =
        samples.into_iter().partition(|s| s.positive);
    let mut train = Vec::with_capacity(positive.len() + negative.len());
    let mut test = Vec::new();
    for class in [&mut positive, &mut negative] {
        class.shuffle(rng);
        let held_out = held_out_count(class.len(), fraction);
        test.extend(class.split_off(class.len() - held_out));
        train.append(class);
    }
    train.shuffle(rng);
    (train, test)
}

/// Image files under `root`, recursively, in sorted path order. The
/// `exclude` subtree is skipped.
pub fn collect_images(root: &Path, exclude: Option<&Path>) -> Result<Vec<PathBuf>> {
    let exclude = exclude.and_then(|p| fs::canonicalize(p).ok());
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                let skip = exclude
                    .as_ref()
                    .is_some_and(|ex| fs::canonicalize(&path).ok().as_ref() == Some(ex));
                if !skip {
                    pending.push(path);
                }
            } else if has_image_extension(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
