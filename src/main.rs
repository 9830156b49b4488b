//! # speproc CLI
//!
//! Command-line front end for batch-processing directories of SPE camera
//! files.
//!
//! ## Usage
//!
//! ```bash
//! # Subtract backgrounds and normalize a directory of measurements
//! speproc process ./data --sample lipid --reference quartz -s -n -e
//!
//! # Inspect a single file
//! speproc info lipid_1.spe
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;

use speproc::batch::Batch;
use speproc::config::Config;
use speproc::frame::AccumulationMode;
use speproc::record::DataKind;
use speproc::{export, spe, ProcessOptions};

/// speproc - SPE spectrometer file decoder and correction pipeline
#[derive(Parser)]
#[command(name = "speproc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a directory of SPE files
    Process {
        /// Directory containing the .spe files
        #[arg(value_name = "DIR")]
        directory: PathBuf,

        /// TOML configuration file; command-line flags override it
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Filename prefix of sample (signal) files
        #[arg(long)]
        sample: Option<String>,

        /// Filename prefix of reference files
        #[arg(long)]
        reference: Option<String>,

        /// Substring marking background files
        #[arg(long)]
        bg_marker: Option<String>,

        /// Subtract backgrounds from signals
        #[arg(short = 's', long)]
        subtract: bool,

        /// Normalize signals by their matched reference
        #[arg(short = 'n', long)]
        normalize: bool,

        /// Divide each array by its exposure time
        #[arg(short = 'e', long)]
        exposure_divide: bool,

        /// Downconvert the energy axis by the upconversion line
        #[arg(short = 'd', long)]
        downconvert: bool,

        /// Shift the energy axis by the calibration offset
        #[arg(short = 'c', long)]
        calibrate: bool,

        /// Remove cosmic-ray spikes before other corrections
        #[arg(short = 'k', long)]
        cosmic_kill: bool,

        /// Re-apply corrections that already ran (compounds their effect)
        #[arg(long)]
        force: bool,

        /// Upconversion line wavelength in nm
        #[arg(long, value_name = "NM")]
        upconversion_nm: Option<f64>,

        /// Calibration offset in cm-1
        #[arg(long, value_name = "CM")]
        calibration_offset: Option<f64>,

        /// Cosmic-ray detection threshold
        #[arg(long)]
        cosmic_threshold: Option<f64>,

        /// Widest run of samples still treated as a cosmic ray
        #[arg(long)]
        cosmic_max_width: Option<usize>,

        /// Frame accumulation mode: sum or series
        #[arg(long, value_name = "MODE")]
        accumulation: Option<String>,

        /// Directory for the processed text files (defaults to DIR)
        #[arg(long, value_name = "DIR")]
        write_dir: Option<PathBuf>,

        /// Write a JSON processing report to this path
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// Display information about a single SPE file
    Info {
        /// Input SPE file path
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match cli.command {
        Commands::Process {
            directory,
            config,
            sample,
            reference,
            bg_marker,
            subtract,
            normalize,
            exposure_divide,
            downconvert,
            calibrate,
            cosmic_kill,
            force,
            upconversion_nm,
            calibration_offset,
            cosmic_threshold,
            cosmic_max_width,
            accumulation,
            write_dir,
            report,
        } => {
            let mut options = match config {
                Some(path) => Config::from_file(&path)?.process,
                None => ProcessOptions::default(),
            };

            // Flags layer on top of the config file: booleans only turn
            // corrections on, value flags replace the configured value.
            options.subtract |= subtract;
            options.normalize |= normalize;
            options.exposure_divide |= exposure_divide;
            options.downconvert |= downconvert;
            options.calibrate |= calibrate;
            options.cosmic_kill |= cosmic_kill;
            options.force |= force;
            if let Some(sample) = sample {
                options.sample_string = Some(sample);
            }
            if let Some(reference) = reference {
                options.ref_string = Some(reference);
            }
            if let Some(marker) = bg_marker {
                options.bg_marker = marker;
            }
            if upconversion_nm.is_some() {
                options.upconversion_nm = upconversion_nm;
            }
            if calibration_offset.is_some() {
                options.calibration_offset = calibration_offset;
            }
            if let Some(threshold) = cosmic_threshold {
                options.cosmic_threshold = threshold;
            }
            if let Some(width) = cosmic_max_width {
                options.cosmic_max_width = width;
            }
            if let Some(mode) = accumulation {
                options.accumulation = parse_accumulation(&mode)?;
            }

            run_process(directory, options, write_dir, report)
        }
        Commands::Info { file } => run_info(file),
    }
}

fn parse_accumulation(mode: &str) -> Result<AccumulationMode> {
    match mode {
        "sum" => Ok(AccumulationMode::Sum),
        "series" => Ok(AccumulationMode::Series),
        other => anyhow::bail!("unknown accumulation mode: {other} (expected sum or series)"),
    }
}

/// Discover, match, decode, process and export a directory.
fn run_process(
    directory: PathBuf,
    options: ProcessOptions,
    write_dir: Option<PathBuf>,
    report_path: Option<PathBuf>,
) -> Result<()> {
    if !directory.is_dir() {
        anyhow::bail!("not a directory: {}", directory.display());
    }
    let write_dir = write_dir.unwrap_or_else(|| directory.clone());

    let mut batch = Batch::discover(&directory, &options)?;
    batch.match_files(&options)?;

    let mut built = batch.build_records(&options);
    for failure in &built.failures {
        warn!("{} ({}): {}", failure.file, failure.kind.label(), failure.error);
    }

    let reports = Batch::process(&mut built.records, &options);

    for record in &built.records {
        let path = export::write_record(record, &write_dir)?;
        println!("{}", path.display());
    }

    let applied: usize = reports.iter().map(|r| r.applied_count()).sum();
    info!(
        "processed {} record(s), {} correction step(s) applied, {} file(s) failed to decode",
        built.records.len(),
        applied,
        built.failures.len()
    );

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&reports)
            .context("Failed to serialize processing report")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        info!("wrote report {}", path.display());
    }

    if built.records.is_empty() && !built.failures.is_empty() {
        anyhow::bail!("every signal file failed to decode");
    }
    Ok(())
}

/// Decode one file and print its geometry and metadata.
fn run_info(file: PathBuf) -> Result<()> {
    let frame = spe::decode_file(&file)
        .with_context(|| format!("Failed to decode {}", file.display()))?;

    println!("File:        {}", file.display());
    println!("Frames:      {}", frame.frame_count());
    println!("Geometry:    {} x {} px", frame.width, frame.height);
    println!("Pixel type:  {:?}", frame.pixel_type);
    println!("Exposure:    {:.6} s", frame.exposure);
    if let (Some(first), Some(last)) =
        (frame.wavenumber_axis.first(), frame.wavenumber_axis.last())
    {
        println!("Axis:        {first:.2} .. {last:.2} cm-1");
    }
    for warning in &frame.warnings {
        println!("Warning:     {warning:?}");
    }

    let mut record = speproc::SpectralRecord::new();
    record.assign_frame(DataKind::Signal, &frame, AccumulationMode::Sum);
    record.parse_filename(&file, None);
    if let Some(sample) = &record.sample {
        println!("Sample:      {sample}");
    }
    if let Some(pol) = record.polarization {
        println!("Polarization: {}", pol.as_str());
    }
    if let Some(time) = record.creation_time {
        println!("Recorded:    {}", time.format("%Y-%m-%d %H:%M:%S"));
    }
    Ok(())
}
