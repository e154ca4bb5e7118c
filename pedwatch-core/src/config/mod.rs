//! Detection settings loaded from a JSON file.
//!
//! Every section is optional; missing fields fall back to the defaults of
//! the respective config struct.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::features::ExtractorConfig;
use crate::pipeline::SessionConfig;
use crate::scanner::ScanConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    pub extractor: ExtractorConfig,
    pub scan: ScanConfig,
    pub session: SessionConfig,
}

pub fn load_config(path: &Path) -> Result<DetectConfig> {
    let contents = fs::read_to_string(path)?;
    let config: DetectConfig = serde_json::from_str(&contents).map_err(|e| {
        Error::invalid(format!("failed to parse config {}: {e}", path.display()))
    })?;
    Ok(config)
}
