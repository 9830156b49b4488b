//! Batch discovery, building and processing
//!
//! A [`Batch`] holds the ordered filename lists for one directory of SPE
//! files: signals, backgrounds, references and reference backgrounds, plus
//! the discovery-order identifier of each reference. After
//! [`Batch::match_files`] every list exposed to the record builder has
//! exactly one entry per signal file, index-aligned so position n across
//! every list refers to the same measurement.
//!
//! Records are processed strictly one at a time; nothing here shares
//! mutable state between records, so a future parallel pass over them
//! would be safe, just not needed at single-digit-megabyte file sizes.

use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use crate::config::ProcessOptions;
use crate::matcher::{self, MatchError};
use crate::pipeline::{self, ProcessingReport};
use crate::record::{DataKind, SpectralRecord};
use crate::spe::{self, SpeError};

/// Errors that end a batch before any record is processed.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// I/O error scanning the data directory
    #[error("I/O error scanning {dir}: {source}")]
    Scan {
        /// Directory being scanned.
        dir: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Matching failed; nothing meaningful can be paired
    #[error(transparent)]
    Match(#[from] MatchError),

    /// Discovery needs a sample prefix to classify files
    #[error("no sample prefix configured; cannot classify files")]
    MissingSamplePrefix,

    /// Normalization was requested but no reference prefix is configured
    #[error("no reference prefix configured; cannot classify reference files")]
    MissingReferencePrefix,
}

/// One file that failed to decode; the batch carries on without it.
#[derive(Debug, Serialize)]
pub struct DecodeFailure {
    /// The file that failed.
    pub file: String,
    /// Which slot it was being decoded into.
    pub kind: DataKind,
    /// Rendered decode error.
    pub error: String,
}

/// Records built from a matched batch plus the files that failed.
#[derive(Debug, Default)]
pub struct BuildOutput {
    /// One record per successfully decoded signal file.
    pub records: Vec<SpectralRecord>,
    /// Per-file decode failures, structured for programmatic inspection.
    pub failures: Vec<DecodeFailure>,
}

/// The aligned filename lists for one directory of SPE files.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    /// Directory all filenames are relative to.
    pub directory: PathBuf,
    /// Signal files, the list everything else is aligned to.
    pub signals: Vec<String>,
    /// Background files (unmatched until [`Batch::match_files`]).
    pub backgrounds: Vec<String>,
    /// Reference files.
    pub references: Vec<String>,
    /// Reference background files.
    pub ref_backgrounds: Vec<String>,
    /// Discovery-order identifier per reference file (1-based).
    pub ref_ids: Vec<usize>,
    /// After matching: the reference identifier each signal uses.
    pub sig_ref_ids: Vec<usize>,
}

impl Batch {
    /// Scan a directory for `.spe` files and classify them.
    ///
    /// A file belongs to the sample when its name starts with the sample
    /// prefix, and to the references when it starts with the reference
    /// prefix; the background marker anywhere in the name makes it a
    /// background. Names are sorted so discovery order is deterministic.
    pub fn discover(directory: &Path, options: &ProcessOptions) -> Result<Self, BatchError> {
        let sample = options
            .sample_string
            .as_deref()
            .ok_or(BatchError::MissingSamplePrefix)?;
        let reference = options.ref_string.as_deref();
        if options.normalize && reference.is_none() {
            return Err(BatchError::MissingReferencePrefix);
        }
        let marker = &options.bg_marker;

        let mut names = Vec::new();
        let entries = std::fs::read_dir(directory).map_err(|source| BatchError::Scan {
            dir: directory.to_path_buf(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| BatchError::Scan {
                dir: directory.to_path_buf(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.to_ascii_lowercase().ends_with(".spe") {
                names.push(name);
            }
        }
        names.sort();

        let mut batch = Batch {
            directory: directory.to_path_buf(),
            ..Default::default()
        };
        for name in names {
            let is_bg = name.contains(marker.as_str());
            if name.starts_with(sample) {
                if is_bg {
                    batch.backgrounds.push(name.clone());
                } else {
                    batch.signals.push(name.clone());
                }
            }
            if let Some(reference) = reference {
                if name.starts_with(reference) {
                    if is_bg {
                        batch.ref_backgrounds.push(name.clone());
                    } else {
                        batch.references.push(name.clone());
                    }
                }
            }
        }
        batch.ref_ids = (1..=batch.references.len()).collect();

        info!(
            "discovered {} signal, {} background, {} reference, {} reference \
             background file(s)",
            batch.signals.len(),
            batch.backgrounds.len(),
            batch.references.len(),
            batch.ref_backgrounds.len()
        );
        Ok(batch)
    }

    /// Align every list with the signal list.
    ///
    /// Backgrounds are matched when subtraction is enabled, references when
    /// normalization is; lists a disabled correction would need stay as
    /// they are. An empty candidate list for a needed correction is fatal
    /// for the whole batch.
    pub fn match_files(&mut self, options: &ProcessOptions) -> Result<(), BatchError> {
        let dir = self.directory.clone();
        let marker = &options.bg_marker;

        if options.subtract {
            self.backgrounds = matcher::match_with_background(
                &self.signals,
                &self.backgrounds,
                &dir,
                marker,
                "background",
            )?;
        }

        if options.normalize {
            let ref_bgs_per_ref = if options.subtract {
                matcher::match_with_background(
                    &self.references,
                    &self.ref_backgrounds,
                    &dir,
                    marker,
                    "reference background",
                )?
            } else {
                vec![String::new(); self.references.len()]
            };

            self.sig_ref_ids =
                matcher::match_with_reference(&self.signals, &self.references, &self.ref_ids, &dir)?;
            let (refs, refbgs, _nums) = matcher::matched_ref_lists(
                &self.sig_ref_ids,
                &self.references,
                &ref_bgs_per_ref,
                &self.ref_ids,
            );
            self.references = refs;
            if options.subtract {
                self.ref_backgrounds = refbgs;
            }
        }
        Ok(())
    }

    /// Decode the matched files into one record per signal file.
    ///
    /// Only the files the enabled corrections need are decoded. A decode
    /// failure on a signal file drops that record; a failure on an
    /// auxiliary file leaves the record without that array, which the
    /// pipeline later reports as a skipped precondition. Either way the
    /// batch continues.
    pub fn build_records(&self, options: &ProcessOptions) -> BuildOutput {
        let mut output = BuildOutput::default();

        for (i, signal) in self.signals.iter().enumerate() {
            let mut record = SpectralRecord::new();
            let path = self.directory.join(signal);

            match self.decode_into(&mut record, DataKind::Signal, signal, options) {
                Ok(()) => {}
                Err(error) => {
                    warn!("skipping {signal}: {error}");
                    output.failures.push(DecodeFailure {
                        file: signal.clone(),
                        kind: DataKind::Signal,
                        error: error.to_string(),
                    });
                    continue;
                }
            }
            record.parse_filename(&path, options.sample_string.as_deref());

            let mut aux = Vec::new();
            if options.normalize {
                aux.push((DataKind::Reference, self.references.get(i)));
                if options.subtract {
                    aux.push((DataKind::ReferenceBackground, self.ref_backgrounds.get(i)));
                }
            }
            if options.subtract {
                aux.push((DataKind::Background, self.backgrounds.get(i)));
            }

            for (kind, name) in aux {
                let Some(name) = name else { continue };
                if let Err(error) = self.decode_into(&mut record, kind, name, options) {
                    warn!("{} file {name} failed to decode: {error}", kind.label());
                    output.failures.push(DecodeFailure {
                        file: name.clone(),
                        kind,
                        error: error.to_string(),
                    });
                }
            }

            output.records.push(record);
        }
        output
    }

    fn decode_into(
        &self,
        record: &mut SpectralRecord,
        kind: DataKind,
        name: &str,
        options: &ProcessOptions,
    ) -> Result<(), SpeError> {
        let path = self.directory.join(name);
        let frame = spe::decode_file(&path)?;
        record.assign_frame(kind, &frame, options.accumulation);
        record.set_filename(kind, name);
        Ok(())
    }

    /// Run the pipeline over every record, one at a time.
    pub fn process(
        records: &mut [SpectralRecord],
        options: &ProcessOptions,
    ) -> Vec<ProcessingReport> {
        let total = records.len();
        info!("processing {total} file(s)");
        records
            .iter_mut()
            .enumerate()
            .map(|(i, record)| {
                info!("processing file {}/{total}", i + 1);
                pipeline::process_record(record, options)
            })
            .collect()
    }
}
