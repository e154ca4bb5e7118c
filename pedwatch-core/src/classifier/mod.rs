//! classifier — linear decision function over feature vectors
//!
//! `score(f) = w · f + b`. Weights come from [`svm::fit`] at training time
//! and from a [`ModelArtifact`] at detection time; they never change once a
//! classifier has been built.

pub mod artifact;
pub mod svm;

use std::path::Path;

use crate::error::{Error, Result};
use crate::features::DescriptorExtractor;

pub use artifact::{ModelArtifact, TrainingSummary};
pub use svm::{fit, FitOutcome, LabeledSample, SvmParams};

#[derive(Debug, Clone, PartialEq)]
pub struct LinearClassifier {
    weights: Vec<f32>,
    bias: f32,
}

impl LinearClassifier {
    pub fn new(weights: Vec<f32>, bias: f32) -> Result<Self> {
        if weights.is_empty() {
            return Err(Error::invalid("classifier needs at least one weight"));
        }
        if !bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
            return Err(Error::invalid("classifier parameters must be finite"));
        }
        Ok(Self { weights, bias })
    }

    /// Load an artifact and check it against the running extractor.
    pub fn load<P: AsRef<Path>>(path: P, extractor: &DescriptorExtractor) -> Result<Self> {
        ModelArtifact::read(path)?.into_classifier(extractor)
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn bias(&self) -> f32 {
        self.bias
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Signed distance-like confidence; positive means "person".
    ///
    /// `features` must have [`len`](Self::len) values. Extra values are
    /// ignored and missing ones count as zero; callers validate lengths once
    /// up front instead of per window.
    pub fn score(&self, features: &[f32]) -> f32 {
        let dot: f64 = self
            .weights
            .iter()
            .zip(features)
            .map(|(&w, &f)| w as f64 * f as f64)
            .sum();
        (dot + self.bias as f64) as f32
    }

    pub fn predict(&self, features: &[f32]) -> bool {
        self.score(features) > 0.0
    }

    /// Fraction of samples whose predicted label matches; `None` when empty.
    pub fn accuracy(&self, samples: &[LabeledSample]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        let correct = samples
            .iter()
            .filter(|s| self.predict(&s.features) == s.positive)
            .count();
        Some(correct as f64 / samples.len() as f64)
    }
}
