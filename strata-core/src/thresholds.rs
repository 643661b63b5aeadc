//! Trend band boundaries
//!
//! Both trend classifiers bucket a signed magnitude into seven bands
//! (three below zero, one around zero, three above). The boundaries are
//! configuration loaded from JSON; a document that fails to parse or whose
//! boundaries are not strictly increasing is a fatal configuration error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Environment variable naming a thresholds JSON document
pub const THRESHOLDS_PATH_ENV: &str = "STRATA_THRESHOLDS_PATH";

/// Absolute-value boundaries of a symmetric seven-band classifier.
///
/// `|x| <= stable` is the neutral band, `stable < |x| <= slow` the mild band,
/// `slow < |x| <= moderate` the moderate band, and anything beyond is the
/// steepest band in that direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandThresholds {
    pub stable: f64,
    pub slow: f64,
    pub moderate: f64,
}

impl BandThresholds {
    pub fn new(stable: f64, slow: f64, moderate: f64) -> Self {
        Self {
            stable,
            slow,
            moderate,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        let bounds = [self.stable, self.slow, self.moderate];
        if bounds.iter().any(|b| !b.is_finite() || *b < 0.0) {
            return Err(Error::Configuration(format!(
                "{} thresholds must be finite and non-negative: {:?}",
                name, self
            )));
        }
        if !(self.stable < self.slow && self.slow < self.moderate) {
            return Err(Error::Configuration(format!(
                "{} thresholds must be strictly increasing (stable < slow < moderate): {:?}",
                name, self
            )));
        }
        Ok(())
    }
}

/// Configuration for the derived-metric trend classifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricThresholds {
    /// Bands over growth velocity (index units per day)
    pub growth: BandThresholds,
    /// Bands over consumption momentum (rate change per reading)
    pub consumption: BandThresholds,
    /// Performance factor (measured / target) at or above which an
    /// accelerating series is critical
    pub critical_performance_factor: f64,
    /// Performance factor at or below which a decelerating series is sharp
    pub low_performance_factor: f64,
}

impl Default for MetricThresholds {
    fn default() -> Self {
        Self {
            growth: BandThresholds::new(0.5, 2.0, 5.0),
            consumption: BandThresholds::new(0.05, 0.25, 0.75),
            critical_performance_factor: 1.5,
            low_performance_factor: 0.5,
        }
    }
}

impl MetricThresholds {
    pub fn validate(&self) -> Result<()> {
        self.growth.validate("growth")?;
        self.consumption.validate("consumption")?;

        let factors = [self.low_performance_factor, self.critical_performance_factor];
        if factors.iter().any(|f| !f.is_finite() || *f <= 0.0) {
            return Err(Error::Configuration(format!(
                "performance factors must be finite and positive: low={}, critical={}",
                self.low_performance_factor, self.critical_performance_factor
            )));
        }
        if self.low_performance_factor >= self.critical_performance_factor {
            return Err(Error::Configuration(format!(
                "low_performance_factor ({}) must be below critical_performance_factor ({})",
                self.low_performance_factor, self.critical_performance_factor
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON document; omitted fields take defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let thresholds: Self = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("Invalid thresholds document: {}", e)))?;
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "Failed to read thresholds from {}: {}",
                path.display(),
                e
            ))
        })?;
        let thresholds = Self::from_json(&json)?;
        info!(path = %path.display(), "Loaded metric thresholds");
        Ok(thresholds)
    }

    /// Load from `STRATA_THRESHOLDS_PATH` when set, defaults otherwise.
    ///
    /// A path that is set but unreadable or invalid is an error, never a
    /// silent fallback.
    pub fn from_env() -> Result<Self> {
        match std::env::var(THRESHOLDS_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::load(path.trim()),
            _ => Ok(Self::default()),
        }
    }
}
