//! Processing configuration
//!
//! The core never reads persisted settings itself: callers hand it an
//! already-resolved [`ProcessOptions`]. For command-line use the same
//! struct can be loaded from a TOML file, with CLI flags layered on top:
//!
//! ```toml
//! # speproc.toml
//! [process]
//! subtract = true
//! normalize = true
//! exposure_divide = true
//! upconversion_nm = 800.0
//! calibration_offset = 12.5
//! sample_string = "lipid"
//! ref_string = "quartz"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::frame::AccumulationMode;

/// Default substring that marks a filename as a background file.
pub const DEFAULT_BG_MARKER: &str = "_bg";

/// Every setting the core consumes, resolved by the caller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessOptions {
    /// Downconvert the energy axis by the upconversion line.
    pub downconvert: bool,
    /// Subtract backgrounds from signals (and from references when
    /// normalization is also on).
    pub subtract: bool,
    /// Normalize signals by their matched reference.
    pub normalize: bool,
    /// Divide every array by its own exposure time.
    pub exposure_divide: bool,
    /// Shift the energy axis by `calibration_offset`.
    pub calibrate: bool,
    /// Remove cosmic-ray spikes before anything else.
    pub cosmic_kill: bool,
    /// Re-apply corrections on top of previous applications. Compounds the
    /// effect and is always reported; never enabled silently.
    pub force: bool,

    /// How multi-frame files are collapsed.
    pub accumulation: AccumulationMode,

    /// Minimum height above the local level for a spike to count as a
    /// cosmic ray.
    pub cosmic_threshold: f64,
    /// Runs at least this wide are real features, not cosmic rays.
    pub cosmic_max_width: usize,

    /// Calibration offset in cm⁻¹ (positive shifts to higher energy).
    pub calibration_offset: Option<f64>,
    /// Upconversion line wavelength in nm.
    pub upconversion_nm: Option<f64>,

    /// Filename prefix identifying sample (signal) files; also overrides
    /// the sample label parsed from filenames.
    pub sample_string: Option<String>,
    /// Filename prefix identifying reference files.
    pub ref_string: Option<String>,
    /// Substring identifying background files.
    pub bg_marker: String,

    /// Left edge of the display window in cm⁻¹ (consumed by the plotting
    /// collaborator, carried here so one struct holds the whole surface).
    pub region_start: Option<f64>,
    /// Right edge of the display window in cm⁻¹.
    pub region_end: Option<f64>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            downconvert: false,
            subtract: false,
            normalize: false,
            exposure_divide: false,
            calibrate: false,
            cosmic_kill: false,
            force: false,
            accumulation: AccumulationMode::Sum,
            cosmic_threshold: 0.001,
            cosmic_max_width: 10,
            calibration_offset: None,
            upconversion_nm: None,
            sample_string: None,
            ref_string: None,
            bg_marker: DEFAULT_BG_MARKER.to_string(),
            region_start: None,
            region_end: None,
        }
    }
}

/// Root structure for speproc.toml files.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Processing settings.
    #[serde(default)]
    pub process: ProcessOptions,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }
}
