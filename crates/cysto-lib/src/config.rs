use crate::{
    detectors::{
        peaks::DetectionParams,
        segments::{SegmentOverrides, SegmentParams},
    },
    sweep::SweepConfig,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Analysis settings read from a TOML file. Every section is optional.
///
/// ```toml
/// [detection]
/// height = 20.0
/// distance = 60
///
/// [segments]
/// kNoise = 2.5
///
/// [sweep]
/// budget = 40
/// mode = "approximate"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    pub detection: DetectionParams,
    pub segments: SegmentOverrides,
    pub sweep: SweepConfig,
}

impl AnalysisConfig {
    pub fn segment_params(&self) -> SegmentParams {
        SegmentParams::default().merged(&self.segments)
    }
}

pub fn parse_config(text: &str) -> Result<AnalysisConfig> {
    toml::from_str(text).context("parsing analysis config")
}

pub fn read_config(path: &Path) -> Result<AnalysisConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: AnalysisConfig = toml::from_str(&contents)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}
