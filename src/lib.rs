//! # speproc - SPE Spectrometer File Processing
//!
//! `speproc` decodes Princeton Instruments SPE camera files (both the
//! legacy 2.x binary-header revision and the 3.0 XML-footer revision) and
//! runs vibrational-spectroscopy corrections over whole directories of
//! measurements: cosmic-ray removal, energy-axis downconversion and
//! calibration, exposure normalization, background subtraction and
//! reference normalization.
//!
//! ## Key pieces
//!
//! - **[`spe`]**: the format decoder. One entry point, [`spe::decode_file`],
//!   handles both revisions and produces a [`frame::Frame`] with the pixel
//!   data widened to `f64` and the wavelength calibration converted to
//!   wavenumbers.
//!
//! - **[`batch`] / [`matcher`]**: directory discovery and the pairing of
//!   signal files with their background and reference files, by naming
//!   convention first and nearest modification time second.
//!
//! - **[`record`] / [`pipeline`]**: per-file state and the correction
//!   pipeline itself. Corrections run in a fixed order, are idempotent
//!   unless explicitly forced, and every step reports whether it applied,
//!   was already applied, or was skipped and why.
//!
//! - **[`export`]**: stable eight-column text output per processed record.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use speproc::batch::Batch;
//! use speproc::config::ProcessOptions;
//!
//! let options = ProcessOptions {
//!     sample_string: Some("lipid".into()),
//!     ref_string: Some("quartz".into()),
//!     subtract: true,
//!     normalize: true,
//!     exposure_divide: true,
//!     ..Default::default()
//! };
//!
//! let mut batch = Batch::discover("./data".as_ref(), &options)?;
//! batch.match_files(&options)?;
//! let mut built = batch.build_records(&options);
//! let reports = Batch::process(&mut built.records, &options);
//!
//! for (record, report) in built.records.iter().zip(&reports) {
//!     println!("{:?}: {} step(s) applied", record.sample, report.applied_count());
//!     speproc::export::write_record(record, "./data".as_ref())?;
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

#![warn(missing_docs)]

pub mod batch;
pub mod config;
pub mod export;
pub mod frame;
pub mod matcher;
pub mod pipeline;
pub mod record;
pub mod spe;
pub mod units;

pub use batch::{Batch, BatchError};
pub use config::{Config, ProcessOptions};
pub use frame::{AccumulationMode, Frame, Spectrum2D};
pub use pipeline::{process_record, ProcessingReport, StepOutcome};
pub use record::{Correction, DataKind, SpectralRecord};
pub use spe::{decode_file, SpeError};
