//! Per-file spectral records
//!
//! A [`SpectralRecord`] is created for every signal file in a batch and
//! accumulates everything associated with it: up to four raw arrays (signal,
//! background, reference, reference background), their post-correction
//! derivatives, per-array exposure times, metadata parsed from the filename,
//! and a flag per applied correction. The pipeline mutates records in place;
//! a record is never shared between signal files.

use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use log::warn;
use serde::Serialize;

use crate::frame::{AccumulationMode, Frame, Spectrum2D};

/// Which of the four source arrays a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataKind {
    /// The measured signal itself.
    Signal,
    /// Background taken with the signal arm blocked.
    Background,
    /// Reference spectrum from a known material.
    Reference,
    /// Background for the reference spectrum.
    ReferenceBackground,
}

impl DataKind {
    /// All four kinds, in the order they are decoded and corrected.
    pub const ALL: [DataKind; 4] = [
        DataKind::Signal,
        DataKind::Background,
        DataKind::Reference,
        DataKind::ReferenceBackground,
    ];

    fn index(self) -> usize {
        match self {
            DataKind::Signal => 0,
            DataKind::Background => 1,
            DataKind::Reference => 2,
            DataKind::ReferenceBackground => 3,
        }
    }

    /// Human-readable label used in log messages and export headers.
    pub fn label(self) -> &'static str {
        match self {
            DataKind::Signal => "signal",
            DataKind::Background => "background",
            DataKind::Reference => "reference",
            DataKind::ReferenceBackground => "reference background",
        }
    }
}

/// The corrections a record can have applied, one flag bit each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Correction {
    /// Upconversion line subtracted from the energy axis.
    Downconverted,
    /// Fixed wavenumber offset added to the energy axis.
    Calibrated,
    /// Background subtracted from the signal.
    BackgroundSubtracted,
    /// Reference background subtracted from the reference.
    RefBackgroundSubtracted,
    /// Signal divided by the reference.
    Normalized,
    /// One raw array divided by its exposure time.
    ExposureDivided(DataKind),
    /// Cosmic-ray spikes removed from one raw array.
    CosmicCleaned(DataKind),
}

impl Correction {
    fn bit(self) -> u16 {
        let shift = match self {
            Correction::Downconverted => 0,
            Correction::Calibrated => 1,
            Correction::BackgroundSubtracted => 2,
            Correction::RefBackgroundSubtracted => 3,
            Correction::Normalized => 4,
            Correction::ExposureDivided(kind) => 5 + kind.index() as u16,
            Correction::CosmicCleaned(kind) => 9 + kind.index() as u16,
        };
        1 << shift
    }
}

/// Set of corrections already applied to a record.
///
/// A single bitmask keyed by [`Correction`] keeps the idempotency contract
/// in one place instead of a flag field per correction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CorrectionSet(u16);

impl CorrectionSet {
    /// True if the given correction has run on this record.
    pub fn contains(&self, c: Correction) -> bool {
        self.0 & c.bit() != 0
    }

    /// Mark a correction as applied.
    pub fn insert(&mut self, c: Correction) {
        self.0 |= c.bit();
    }

    /// True if no correction has run yet.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Polarization combination encoded in a filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub enum Polarization {
    Ppp,
    Pps,
    Psp,
    Pss,
    Spp,
    Sps,
    Ssp,
    Sss,
}

impl Polarization {
    /// Match a filename token against the eight recognized codes.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "PPP" => Some(Polarization::Ppp),
            "PPS" => Some(Polarization::Pps),
            "PSP" => Some(Polarization::Psp),
            "PSS" => Some(Polarization::Pss),
            "SPP" => Some(Polarization::Spp),
            "SPS" => Some(Polarization::Sps),
            "SSP" => Some(Polarization::Ssp),
            "SSS" => Some(Polarization::Sss),
            _ => None,
        }
    }

    /// The filename spelling of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Polarization::Ppp => "PPP",
            Polarization::Pps => "PPS",
            Polarization::Psp => "PSP",
            Polarization::Pss => "PSS",
            Polarization::Spp => "SPP",
            Polarization::Sps => "SPS",
            Polarization::Ssp => "SSP",
            Polarization::Sss => "SSS",
        }
    }
}

/// All data and state for one signal file in a batch.
#[derive(Debug, Clone, Default)]
pub struct SpectralRecord {
    /// Sample label, from the filename or a caller override.
    pub sample: Option<String>,
    /// Group index (penultimate numeric filename token).
    pub group: Option<u32>,
    /// Sequence index (final numeric filename token).
    pub index: Option<u32>,
    /// Polarization code found in the filename.
    pub polarization: Option<Polarization>,
    /// Excitation wavelength in nm, from a `<n>nm` filename token.
    pub excitation_nm: Option<u32>,
    /// Filesystem modification time of the signal file.
    pub creation_time: Option<DateTime<Local>>,

    filenames: [Option<String>; 4],

    /// Energy axis in wavenumbers, mutated by axis corrections.
    pub axis: Option<Vec<f64>>,
    /// Pre-downconversion energy axis, kept as a side buffer.
    pub axis_raw: Option<Vec<f64>>,

    arrays: [Option<Spectrum2D>; 4],
    exposures: [Option<f64>; 4],

    /// Signal minus background, once subtraction ran.
    pub signal_subtracted: Option<Spectrum2D>,
    /// Reference minus reference background, once subtraction ran.
    pub ref_subtracted: Option<Spectrum2D>,
    /// Signal over reference, once normalization ran.
    pub signal_normalized: Option<Spectrum2D>,

    /// Frame stack kept apart under series accumulation (signal only).
    pub signal_series: Option<Vec<Spectrum2D>>,
    /// Per-frame timestamps under series accumulation.
    pub timestamps: Option<Vec<f64>>,

    /// Decoded frame width in pixels.
    pub width: usize,
    /// Decoded frame height in pixels.
    pub height: usize,
    /// Frames captured in the signal file.
    pub frame_count: usize,

    /// Cumulative calibration offset applied so far, in cm⁻¹.
    pub applied_calibration: Option<f64>,
    /// Upconversion line used for downconversion, in cm⁻¹.
    pub upconverter_used: Option<f64>,

    /// Which corrections have run on this record.
    pub corrections: CorrectionSet,
}

impl SpectralRecord {
    /// A fresh, empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Source filename stored for a kind, if one was decoded.
    pub fn filename(&self, kind: DataKind) -> Option<&str> {
        self.filenames[kind.index()].as_deref()
    }

    /// Record which file a kind came from.
    pub fn set_filename(&mut self, kind: DataKind, name: impl Into<String>) {
        self.filenames[kind.index()] = Some(name.into());
    }

    /// Raw array for a kind (post any in-place corrections).
    pub fn array(&self, kind: DataKind) -> Option<&Spectrum2D> {
        self.arrays[kind.index()].as_ref()
    }

    /// Mutable raw array for a kind.
    pub fn array_mut(&mut self, kind: DataKind) -> Option<&mut Spectrum2D> {
        self.arrays[kind.index()].as_mut()
    }

    /// Exposure time for a kind, in seconds.
    pub fn exposure(&self, kind: DataKind) -> Option<f64> {
        self.exposures[kind.index()]
    }

    /// Store an array directly, for records built from non-SPE sources.
    pub fn set_array(&mut self, kind: DataKind, array: Spectrum2D) {
        self.arrays[kind.index()] = Some(array);
    }

    /// Store or clear an exposure time directly.
    pub fn set_exposure(&mut self, kind: DataKind, exposure: Option<f64>) {
        self.exposures[kind.index()] = exposure;
    }

    /// Store a decoded frame into the slot for `kind`.
    ///
    /// Multi-frame files are collapsed according to `mode`. The wavelength
    /// axis and frame geometry are taken from the signal file only; the
    /// other three kinds contribute their array and exposure time.
    pub fn assign_frame(&mut self, kind: DataKind, frame: &Frame, mode: AccumulationMode) {
        self.exposures[kind.index()] = Some(frame.exposure);

        let collapsed = match mode {
            AccumulationMode::Sum => frame.summed(),
            AccumulationMode::Series => {
                let (frames, timestamps) = frame.series();
                if kind == DataKind::Signal {
                    self.signal_series = Some(frames);
                    self.timestamps = Some(timestamps);
                }
                // The 2D slot still holds the frame sum so the pipeline
                // operates on a consistent shape.
                frame.summed()
            }
        };
        self.arrays[kind.index()] = Some(collapsed);

        if kind == DataKind::Signal {
            self.axis = Some(frame.wavenumber_axis.clone());
            self.width = frame.width;
            self.height = frame.height;
            self.frame_count = frame.frame_count();
        }
    }

    /// Parse filename conventions into the record's metadata fields.
    ///
    /// `<sample>_..._<group>_<index>.spe` with optional `<n>nm` and
    /// polarization tokens anywhere in between. A caller-supplied sample
    /// label wins over the first filename token. The file's modification
    /// time is recorded as its creation time.
    pub fn parse_filename(&mut self, path: &Path, sample_override: Option<&str>) {
        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(s) => s,
            None => {
                warn!("cannot parse filename metadata from {}", path.display());
                return;
            }
        };
        let tokens: Vec<&str> = stem.split('_').collect();

        self.sample = sample_override
            .map(str::to_string)
            .or_else(|| tokens.first().map(|s| s.to_string()));

        if tokens.len() >= 2 {
            if let Ok(group) = tokens[tokens.len() - 2].parse() {
                self.group = Some(group);
            }
        }
        if let Some(last) = tokens.last() {
            if let Ok(index) = last.parse() {
                self.index = Some(index);
            }
        }

        for token in &tokens {
            if let Some(num) = token.strip_suffix("nm") {
                if let Ok(nm) = num.parse() {
                    self.excitation_nm = Some(nm);
                }
            }
            if let Some(pol) = Polarization::from_token(token) {
                self.polarization = Some(pol);
            }
        }

        if let Ok(meta) = std::fs::metadata(path) {
            if let Ok(mtime) = meta.modified() {
                self.creation_time = Some(DateTime::from(mtime));
            }
        }
    }

    /// Best-available signal: subtracted if subtraction ran, else raw.
    pub fn best_signal(&self) -> Option<&Spectrum2D> {
        if self.corrections.contains(Correction::BackgroundSubtracted) {
            self.signal_subtracted.as_ref()
        } else {
            self.array(DataKind::Signal)
        }
    }

    /// Best-available reference: subtracted if present, else raw.
    pub fn best_reference(&self) -> Option<&Spectrum2D> {
        self.ref_subtracted
            .as_ref()
            .or_else(|| self.array(DataKind::Reference))
    }
}

/// Filesystem modification time of a file, used for closest-in-time
/// matching and record metadata.
pub fn file_mtime(path: &Path) -> std::io::Result<SystemTime> {
    std::fs::metadata(path)?.modified()
}
