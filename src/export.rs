//! Plain-text export of processed records
//!
//! One record is written per signal file as `<stem>_processed.txt`: a
//! commented header describing provenance and applied corrections, then
//! eight whitespace-delimited columns covering every intermediate stage so
//! downstream fitting tools can pick whichever they need. Missing stages
//! (corrections that were disabled or skipped) are written as NaN columns
//! rather than dropped, so the column layout is stable across files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;

use crate::frame::Spectrum2D;
use crate::record::{Correction, DataKind, SpectralRecord};

/// Suffix appended to the signal stem for the output filename.
pub const PROCESSED_SUFFIX: &str = "_processed";

fn yes_no(applied: bool) -> &'static str {
    if applied {
        "YES"
    } else {
        "NO"
    }
}

fn first_row(array: Option<&Spectrum2D>) -> Option<&[f64]> {
    array.map(|a| a.row(0))
}

fn value_at(row: Option<&[f64]>, i: usize) -> f64 {
    row.and_then(|r| r.get(i)).copied().unwrap_or(f64::NAN)
}

/// Write one processed record as a text file in `out_dir`.
///
/// The output name is derived from the signal filename; a record with no
/// signal filename (never produced by the batch builder) falls back to the
/// sample label or `record`.
pub fn write_record(record: &SpectralRecord, out_dir: &Path) -> std::io::Result<PathBuf> {
    let stem = record
        .filename(DataKind::Signal)
        .map(|name| {
            Path::new(name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.to_string())
        })
        .or_else(|| record.sample.clone())
        .unwrap_or_else(|| "record".to_string());
    let path = out_dir.join(format!("{stem}{PROCESSED_SUFFIX}.txt"));

    let file = File::create(&path)?;
    let mut out = BufWriter::new(file);
    write_header(record, &mut out)?;
    write_columns(record, &mut out)?;
    out.flush()?;

    info!("wrote {}", path.display());
    Ok(path)
}

fn write_header(record: &SpectralRecord, out: &mut impl Write) -> std::io::Result<()> {
    for kind in DataKind::ALL {
        writeln!(
            out,
            "# {} file: {}",
            capitalize(kind.label()),
            record.filename(kind).unwrap_or("none")
        )?;
    }

    let c = &record.corrections;
    writeln!(
        out,
        "# Background subtracted: {}",
        yes_no(c.contains(Correction::BackgroundSubtracted))
    )?;
    writeln!(
        out,
        "# Normalised: {}",
        yes_no(c.contains(Correction::Normalized))
    )?;
    match record.upconverter_used {
        Some(line) => writeln!(out, "# Downconverted: YES (upconversion line {line:.5} cm-1)")?,
        None => writeln!(out, "# Downconverted: NO")?,
    }
    match record.applied_calibration {
        Some(offset) => writeln!(out, "# Calibrated: YES (offset applied {offset:+.5} cm-1)")?,
        None => writeln!(out, "# Calibrated: NO")?,
    }
    for kind in DataKind::ALL {
        let divided = c.contains(Correction::ExposureDivided(kind));
        match record.exposure(kind) {
            Some(exposure) => writeln!(
                out,
                "# {} exposure corrected: {} (exposure {exposure:.5} s)",
                capitalize(kind.label()),
                yes_no(divided)
            )?,
            None => writeln!(
                out,
                "# {} exposure corrected: {}",
                capitalize(kind.label()),
                yes_no(divided)
            )?,
        }
    }

    writeln!(
        out,
        "# Columns: energy axis (cm-1) | normalised signal | subtracted reference | \
         pre-normalise signal | pre-subtract signal | background | \
         pre-subtract reference | raw energy axis (cm-1)"
    )
}

fn write_columns(record: &SpectralRecord, out: &mut impl Write) -> std::io::Result<()> {
    let axis = record.axis.as_deref();
    let axis_raw = record.axis_raw.as_deref().or(axis);
    let normalized = first_row(record.signal_normalized.as_ref());
    let ref_sub = first_row(record.ref_subtracted.as_ref());
    let sig_sub = first_row(record.signal_subtracted.as_ref());
    let signal = first_row(record.array(DataKind::Signal));
    let background = first_row(record.array(DataKind::Background));
    let reference = first_row(record.array(DataKind::Reference));

    let len = axis
        .map(|a| a.len())
        .or_else(|| signal.map(|s| s.len()))
        .unwrap_or(0);

    for i in 0..len {
        let row = [
            value_at(axis, i),
            value_at(normalized, i),
            value_at(ref_sub, i),
            value_at(sig_sub, i),
            value_at(signal, i),
            value_at(background, i),
            value_at(reference, i),
            value_at(axis_raw, i),
        ];
        for (j, v) in row.iter().enumerate() {
            if j > 0 {
                write!(out, " ")?;
            }
            write!(out, "{v:<10.5}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Spectrum2D;
    use tempfile::tempdir;

    fn record_with_signal() -> SpectralRecord {
        let mut record = SpectralRecord::new();
        record.set_filename(DataKind::Signal, "lipid_1.spe");
        record.axis = Some(vec![3000.0, 3001.0, 3002.0]);
        record.set_array(
            DataKind::Signal,
            Spectrum2D::from_flat(1, 3, vec![10.0, 20.0, 30.0]),
        );
        record
    }

    #[test]
    fn test_output_filename_from_signal_stem() {
        let dir = tempdir().unwrap();
        let path = write_record(&record_with_signal(), dir.path()).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "lipid_1_processed.txt"
        );
    }

    #[test]
    fn test_missing_stages_written_as_nan() {
        let dir = tempdir().unwrap();
        let path = write_record(&record_with_signal(), dir.path()).unwrap();
        let content = std::fs::read_to_string(path).unwrap();

        let data_lines: Vec<&str> = content
            .lines()
            .filter(|l| !l.starts_with('#'))
            .collect();
        assert_eq!(data_lines.len(), 3);

        let fields: Vec<&str> = data_lines[0].split_whitespace().collect();
        assert_eq!(fields.len(), 8);
        assert_eq!(fields[0], "3000.00000");
        // No normalization ran, so column 2 is a placeholder.
        assert_eq!(fields[1], "NaN");
        assert_eq!(fields[4], "10.00000");
        // Raw axis falls back to the working axis when no axis correction
        // was applied.
        assert_eq!(fields[7], "3000.00000");
    }

    #[test]
    fn test_header_reports_corrections() {
        let dir = tempdir().unwrap();
        let mut record = record_with_signal();
        record.applied_calibration = Some(12.5);
        record.corrections.insert(Correction::Calibrated);
        record.corrections.insert(Correction::Normalized);

        let path = write_record(&record, dir.path()).unwrap();
        let content = std::fs::read_to_string(path).unwrap();

        assert!(content.contains("# Signal file: lipid_1.spe"));
        assert!(content.contains("# Background file: none"));
        assert!(content.contains("# Normalised: YES"));
        assert!(content.contains("# Calibrated: YES (offset applied +12.50000 cm-1)"));
        assert!(content.contains("# Downconverted: NO"));
    }
}
