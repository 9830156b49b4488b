//! End-to-end tests: synthetic SPE files on disk through decode, batch
//! matching, the correction pipeline and text export.

use std::fs;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use tempfile::tempdir;

use speproc::batch::Batch;
use speproc::config::ProcessOptions;
use speproc::record::{Correction, DataKind};
use speproc::{decode_file, export, StepOutcome};

const HEADER_LEN: usize = 4100;

/// Write a legacy (2.x) SPE file: fixed-offset binary header, u16 pixel
/// data, wavelength calibration as polynomial coefficients.
fn write_legacy_spe(
    path: &Path,
    exposure_s: f32,
    width: u16,
    frames: &[Vec<u16>],
    coeffs_lowest_first: &[f64],
) {
    let mut buf = vec![0u8; HEADER_LEN + frames.len() * width as usize * 2];

    LittleEndian::write_f32(&mut buf[10..14], exposure_s);
    LittleEndian::write_u16(&mut buf[42..44], width);
    LittleEndian::write_i16(&mut buf[108..110], 3); // unsigned 16-bit pixels
    LittleEndian::write_u16(&mut buf[656..658], 1); // height
    LittleEndian::write_i32(&mut buf[1446..1450], frames.len() as i32);
    LittleEndian::write_f32(&mut buf[1992..1996], 2.5); // format version
    buf[3101] = (coeffs_lowest_first.len() - 1) as u8;
    for (i, c) in coeffs_lowest_first.iter().enumerate() {
        let at = 3263 + i * 8;
        LittleEndian::write_f64(&mut buf[at..at + 8], *c);
    }

    let mut at = HEADER_LEN;
    for frame in frames {
        assert_eq!(frame.len(), width as usize);
        for sample in frame {
            LittleEndian::write_u16(&mut buf[at..at + 2], *sample);
            at += 2;
        }
    }

    fs::write(path, buf).unwrap();
}

/// Write a modern (3.0) SPE file: 4100-byte header with a footer offset,
/// u16 pixel data, then the XML footer.
fn write_modern_spe(path: &Path, width: u16, frames: &[Vec<u16>]) {
    let stride = width as usize * 2;
    let data_len = frames.len() * stride;
    let footer_offset = (HEADER_LEN + data_len) as u64;

    let footer = format!(
        r#"<SpeFormat version="3.0" xmlns="http://example.invalid/spe/2009">
  <DataFormat>
    <DataBlock type="Frame" count="{count}" pixelFormat="MonochromeUnsigned16" size="{data_len}" stride="{stride}">
      <DataBlock type="Region" width="{width}" height="1" size="{stride}" stride="{stride}" />
    </DataBlock>
  </DataFormat>
  <Calibrations>
    <WavelengthMapping>
      <Wavelength>800.0,801.0,802.0,803.0,804.0,805.0</Wavelength>
    </WavelengthMapping>
    <SensorMapping x="0" y="0" width="{width}" height="1" xBinning="1" yBinning="1" />
  </Calibrations>
  <DataHistories>
    <DataHistory>
      <Origin>
        <Experiment>
          <Devices>
            <Cameras>
              <Camera>
                <ShutterTiming>
                  <ExposureTime>500</ExposureTime>
                </ShutterTiming>
              </Camera>
            </Cameras>
          </Devices>
        </Experiment>
      </Origin>
    </DataHistory>
  </DataHistories>
</SpeFormat>"#,
        count = frames.len(),
    );

    let mut buf = vec![0u8; HEADER_LEN + data_len];
    LittleEndian::write_f32(&mut buf[1992..1996], 3.0);
    LittleEndian::write_u64(&mut buf[678..686], footer_offset);
    let mut at = HEADER_LEN;
    for frame in frames {
        assert_eq!(frame.len(), width as usize);
        for sample in frame {
            LittleEndian::write_u16(&mut buf[at..at + 2], *sample);
            at += 2;
        }
    }
    buf.extend_from_slice(footer.as_bytes());

    fs::write(path, buf).unwrap();
}

#[test]
fn test_decode_legacy_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sample.spe");
    // Wavelength lambda(x) = 800 + x over columns 1..=4.
    write_legacy_spe(
        &path,
        0.5,
        4,
        &[vec![100, 200, 300, 400], vec![10, 20, 30, 40]],
        &[800.0, 1.0],
    );

    let frame = decode_file(&path).unwrap();
    assert_eq!(frame.width, 4);
    assert_eq!(frame.height, 1);
    assert_eq!(frame.frame_count(), 2);
    assert!((frame.exposure - 0.5).abs() < 1e-9);
    assert_eq!(frame.frames[0].row(0), &[100.0, 200.0, 300.0, 400.0]);
    assert_eq!(frame.frames[1].row(0), &[10.0, 20.0, 30.0, 40.0]);

    let summed = frame.summed();
    assert_eq!(summed.row(0), &[110.0, 220.0, 330.0, 440.0]);

    // Wavenumbers are 1e7 / lambda_nm and descend across the row.
    assert_eq!(frame.wavenumber_axis.len(), 4);
    assert!((frame.wavenumber_axis[0] - 1e7 / 801.0).abs() < 1e-6);
    assert!((frame.wavenumber_axis[3] - 1e7 / 804.0).abs() < 1e-6);
    assert!(frame.wavenumber_axis[0] > frame.wavenumber_axis[3]);
    assert!(frame.warnings.is_empty());
}

#[test]
fn test_decode_modern_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sample.spe");
    write_modern_spe(
        &path,
        6,
        &[vec![1, 2, 3, 4, 5, 6], vec![10, 20, 30, 40, 50, 60]],
    );

    let frame = decode_file(&path).unwrap();
    assert_eq!(frame.width, 6);
    assert_eq!(frame.frame_count(), 2);
    // ExposureTime is stored in milliseconds.
    assert!((frame.exposure - 0.5).abs() < 1e-9);
    assert_eq!(frame.frames[1].row(0), &[10.0, 20.0, 30.0, 40.0, 50.0, 60.0]);
    assert!((frame.wavenumber_axis[0] - 1e7 / 800.0).abs() < 1e-6);
}

#[test]
fn test_decode_truncated_file_is_structured() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("short.spe");
    fs::write(&path, vec![0u8; 100]).unwrap();

    match decode_file(&path) {
        Err(speproc::SpeError::TruncatedFile { offset, .. }) => assert_eq!(offset, 1992),
        other => panic!("expected TruncatedFile, got {other:?}"),
    }
}

fn flat_frame(width: u16, value: u16) -> Vec<Vec<u16>> {
    vec![vec![value; width as usize]]
}

#[test]
fn test_batch_end_to_end() {
    let dir = tempdir().unwrap();
    let coeffs = [800.0, 1.0];

    // Exposure-divided: signal (8 - 2) / 2 = 3, reference (9 - 3) / 3 = 2,
    // normalized signal 3 / 2 = 1.5.
    write_legacy_spe(&dir.path().join("lipid_1.spe"), 2.0, 4, &flat_frame(4, 8), &coeffs);
    write_legacy_spe(&dir.path().join("lipid_1_bg.spe"), 2.0, 4, &flat_frame(4, 2), &coeffs);
    write_legacy_spe(&dir.path().join("quartz_1.spe"), 3.0, 4, &flat_frame(4, 9), &coeffs);
    write_legacy_spe(&dir.path().join("quartz_1_bg.spe"), 3.0, 4, &flat_frame(4, 3), &coeffs);

    let options = ProcessOptions {
        sample_string: Some("lipid".to_string()),
        ref_string: Some("quartz".to_string()),
        subtract: true,
        normalize: true,
        exposure_divide: true,
        ..Default::default()
    };

    let mut batch = Batch::discover(dir.path(), &options).unwrap();
    batch.match_files(&options).unwrap();
    assert_eq!(batch.signals, vec!["lipid_1.spe"]);
    assert_eq!(batch.backgrounds, vec!["lipid_1_bg.spe"]);
    assert_eq!(batch.references, vec!["quartz_1.spe"]);
    assert_eq!(batch.ref_backgrounds, vec!["quartz_1_bg.spe"]);

    let mut built = batch.build_records(&options);
    assert!(built.failures.is_empty());
    assert_eq!(built.records.len(), 1);

    let reports = Batch::process(&mut built.records, &options);
    let report = &reports[0];
    assert_eq!(
        report.outcome(Correction::BackgroundSubtracted),
        Some(&StepOutcome::Applied)
    );
    assert_eq!(
        report.outcome(Correction::Normalized),
        Some(&StepOutcome::Applied)
    );

    let record = &built.records[0];
    assert_eq!(record.sample.as_deref(), Some("lipid"));
    let normalized = record.signal_normalized.as_ref().unwrap();
    for v in normalized.row(0) {
        assert!((v - 1.5).abs() < 1e-9, "normalized value {v}");
    }

    let out = export::write_record(record, dir.path()).unwrap();
    let content = fs::read_to_string(&out).unwrap();
    assert!(content.contains("# Signal file: lipid_1.spe"));
    assert!(content.contains("# Background subtracted: YES"));
    assert!(content.contains("# Normalised: YES"));

    let first_data_line = content.lines().find(|l| !l.starts_with('#')).unwrap();
    let fields: Vec<&str> = first_data_line.split_whitespace().collect();
    assert_eq!(fields.len(), 8);
    assert_eq!(fields[1], "1.50000");
}

#[test]
fn test_batch_survives_one_bad_file() {
    let dir = tempdir().unwrap();
    let coeffs = [800.0, 1.0];
    write_legacy_spe(&dir.path().join("lipid_1.spe"), 1.0, 4, &flat_frame(4, 5), &coeffs);
    // A signal file too short to hold its header.
    fs::write(dir.path().join("lipid_2.spe"), vec![0u8; 64]).unwrap();

    let options = ProcessOptions {
        sample_string: Some("lipid".to_string()),
        ..Default::default()
    };

    let mut batch = Batch::discover(dir.path(), &options).unwrap();
    batch.match_files(&options).unwrap();
    let built = batch.build_records(&options);

    assert_eq!(built.records.len(), 1);
    assert_eq!(built.failures.len(), 1);
    assert_eq!(built.failures[0].file, "lipid_2.spe");
    assert!(matches!(built.failures[0].kind, DataKind::Signal));
}

#[test]
fn test_processing_is_idempotent_per_batch() {
    let dir = tempdir().unwrap();
    let coeffs = [800.0, 1.0];
    write_legacy_spe(&dir.path().join("lipid_1.spe"), 2.0, 4, &flat_frame(4, 8), &coeffs);

    let options = ProcessOptions {
        sample_string: Some("lipid".to_string()),
        exposure_divide: true,
        ..Default::default()
    };

    let mut batch = Batch::discover(dir.path(), &options).unwrap();
    batch.match_files(&options).unwrap();
    let mut built = batch.build_records(&options);

    Batch::process(&mut built.records, &options);
    let signal = built.records[0].array(DataKind::Signal).unwrap().clone();

    // A second pass sees the exposure division already done and leaves the
    // data untouched.
    let reports = Batch::process(&mut built.records, &options);
    assert_eq!(
        reports[0].outcome(Correction::ExposureDivided(DataKind::Signal)),
        Some(&StepOutcome::AlreadyApplied)
    );
    assert_eq!(
        built.records[0].array(DataKind::Signal).unwrap().row(0),
        signal.row(0)
    );
}
