//! Feature pipeline configuration.
//!
//! Defines the bucket width, the trailing-window cutoffs, and the degree of
//! parallelism. Built once and shared read-only by every partition.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for a feature run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Width of a time bucket in seconds.
    /// Default: 600 (10 minutes)
    pub bucket_width_secs: u64,

    /// Trailing-window cutoffs, in seconds after the bucket start.
    /// Merged in the listed order.
    /// Default: [450, 300, 150]
    pub trailing_cutoffs_secs: Vec<u64>,

    /// Number of worker threads used for per-security partitions.
    /// Default: 8
    pub jobs: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            bucket_width_secs: 600,
            trailing_cutoffs_secs: vec![450, 300, 150],
            jobs: 8,
        }
    }
}

impl FeatureConfig {
    /// Load a config from a JSON file. Absent fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        let config: FeatureConfig = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket_width_secs == 0 {
            return Err(Error::InvalidConfig("bucket_width_secs must be > 0".into()));
        }
        if self.jobs == 0 {
            return Err(Error::InvalidConfig("jobs must be > 0".into()));
        }
        for (idx, &cutoff) in self.trailing_cutoffs_secs.iter().enumerate() {
            if cutoff == 0 {
                return Err(Error::InvalidConfig(
                    "trailing cutoff 0 duplicates the full-bucket window".into(),
                ));
            }
            if cutoff >= self.bucket_width_secs {
                return Err(Error::InvalidConfig(format!(
                    "trailing cutoff {cutoff}s must be less than bucket width {}s",
                    self.bucket_width_secs
                )));
            }
            if self.trailing_cutoffs_secs[..idx].contains(&cutoff) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate trailing cutoff {cutoff}s"
                )));
            }
        }
        Ok(())
    }

    pub fn bucket_width_ms(&self) -> i64 {
        (self.bucket_width_secs as i64).saturating_mul(1_000)
    }
}
