//! On-disk model format.
//!
//! A JSON document carrying the weights together with the full extractor
//! configuration they were trained against. Loading refuses anything that
//! would make the scanner compute scores against a different feature layout.

use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use super::LinearClassifier;
use crate::error::{Error, Result};
use crate::features::{DescriptorExtractor, ExtractorConfig, HogConfig, TextureConfig};

pub const FORMAT_TAG: &str = "pedwatch-linear-svm";
pub const FORMAT_VERSION: u32 = 1;

/// Diagnostics recorded at training time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub positives: usize,
    pub negatives: usize,
    pub accuracy: Option<f64>,
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format: String,
    pub version: u32,
    #[serde(deserialize_with = "stored_extractor")]
    pub extractor: ExtractorConfig,
    pub feature_len: usize,
    pub weights: Vec<f32>,
    pub bias: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trained: Option<TrainingSummary>,
}

// Stored extractor section. Unlike the config structs, every setting is
// required here and unknown ones are rejected.

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StoredExtractor {
    patch_width: u32,
    patch_height: u32,
    hog: StoredHog,
    texture: StoredTexture,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StoredHog {
    orientations: usize,
    signed: bool,
    cell_side: usize,
    block_side: usize,
    block_stride: usize,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StoredTexture {
    points: u32,
    radius: f32,
    bins: usize,
}

fn stored_extractor<'de, D>(de: D) -> std::result::Result<ExtractorConfig, D::Error>
where
    D: Deserializer<'de>,
{
    let StoredExtractor {
        patch_width,
        patch_height,
        hog,
        texture,
    } = StoredExtractor::deserialize(de)?;
    Ok(ExtractorConfig {
        patch_width,
        patch_height,
        hog: HogConfig {
            orientations: hog.orientations,
            signed: hog.signed,
            cell_side: hog.cell_side,
            block_side: hog.block_side,
            block_stride: hog.block_stride,
        },
        texture: TextureConfig {
            points: texture.points,
            radius: texture.radius,
            bins: texture.bins,
        },
    })
}

impl ModelArtifact {
    pub fn new(
        classifier: &LinearClassifier,
        extractor: &DescriptorExtractor,
        trained: Option<TrainingSummary>,
    ) -> Result<Self> {
        if classifier.len() != extractor.feature_len() {
            return Err(Error::invalid(format!(
                "classifier has {} weights but the extractor produces {} features",
                classifier.len(),
                extractor.feature_len()
            )));
        }
        Ok(Self {
            format: FORMAT_TAG.to_string(),
            version: FORMAT_VERSION,
            extractor: extractor.config().clone(),
            feature_len: extractor.feature_len(),
            weights: classifier.weights().to_vec(),
            bias: classifier.bias(),
            trained,
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string(self)
            .map_err(|e| Error::invalid(format!("failed to serialise model: {e}")))?;
        fs::write(path, json)?;
        info!(path = %path.display(), features = self.feature_len, "saved model artifact");
        Ok(())
    }

    /// Parse an artifact. Only structural problems are caught here; use
    /// [`into_classifier`](Self::into_classifier) to check compatibility.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let artifact: ModelArtifact = serde_json::from_slice(&bytes).map_err(|e| {
            Error::corrupt(format!("{} is not a model artifact: {e}", path.display()))
        })?;
        if artifact.format != FORMAT_TAG {
            return Err(Error::corrupt(format!(
                "unknown model format {:?}, expected {FORMAT_TAG:?}",
                artifact.format
            )));
        }
        if artifact.version != FORMAT_VERSION {
            return Err(Error::corrupt(format!(
                "model format version {} is not supported (expected {FORMAT_VERSION})",
                artifact.version
            )));
        }
        if artifact.weights.len() != artifact.feature_len {
            return Err(Error::corrupt(format!(
                "model stores {} weights but declares feature length {}",
                artifact.weights.len(),
                artifact.feature_len
            )));
        }
        Ok(artifact)
    }

    /// Validate against the running extractor and build the classifier.
    pub fn into_classifier(self, extractor: &DescriptorExtractor) -> Result<LinearClassifier> {
        if self.feature_len != extractor.feature_len() {
            return Err(Error::corrupt(format!(
                "model expects {} features but the extractor produces {} \
                 (trained with patch {}x{}, {} texture bins)",
                self.feature_len,
                extractor.feature_len(),
                self.extractor.patch_width,
                self.extractor.patch_height,
                self.extractor.texture.bins
            )));
        }
        if &self.extractor != extractor.config() {
            return Err(Error::corrupt(format!(
                "model was trained with extractor {:?}, running with {:?}",
                self.extractor,
                extractor.config()
            )));
        }
        LinearClassifier::new(self.weights, self.bias)
            .map_err(|e| Error::corrupt(format!("model parameters rejected: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_classifier_of_wrong_length() {
        let extractor = DescriptorExtractor::new(ExtractorConfig::default()).unwrap();
        let classifier = LinearClassifier::new(vec![0.1; 10], 0.0).unwrap();
        assert!(ModelArtifact::new(&classifier, &extractor, None).is_err());
    }
}
