//! Modern (SPE 3.0) decoder
//!
//! 3.0 files store a u64 offset to an XML footer that describes the data
//! layout and calibration in two namespaced sections (format metadata and
//! experiment metadata). The footer is streamed with quick-xml, matching on
//! local names so the namespace prefixes the camera software chooses do not
//! matter.
//!
//! The frame-level DataBlock carries the frame count, pixel format and byte
//! stride; its child DataBlocks are the regions of interest with the actual
//! width and height. Exactly one ROI is supported: extras are reported as a
//! structured warning and skipped rather than rejected.

use std::io::{Read, Seek};

use log::{info, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{binary::ByteReader, read_frame_stack, PixelType, SpeError};
use crate::frame::{DecodeWarning, Frame};
use crate::units;

/// Byte offset of the u64 holding the XML footer's byte offset.
const FOOTER_OFFSET_OFFSET: u64 = 678;

/// Decode an SPE 3.0 stream into a [`Frame`].
pub(super) fn decode<R: Read + Seek>(reader: &mut ByteReader<R>) -> Result<Frame, SpeError> {
    let footer_offset = reader.read_u64_at(FOOTER_OFFSET_OFFSET)?;
    let footer = reader.read_remaining_at(footer_offset)?;
    let meta = parse_footer(&footer)?;

    let pixel_type = PixelType::from_modern_name(&meta.pixel_format)?;
    info!(
        "modern frame: {}x{} px, {} frame(s), {} byte pixels, exposure {} s",
        meta.width,
        meta.height,
        meta.frame_count,
        pixel_type.byte_width(),
        meta.exposure
    );

    let mut warnings = Vec::new();
    if meta.roi_count > 1 {
        warn!(
            "{} regions of interest declared; only the first is read",
            meta.roi_count
        );
        warnings.push(DecodeWarning::ExtraRegions {
            declared: meta.roi_count,
        });
    }
    if meta.height > 1 {
        info!(
            "data is not in n x 1 format (height {}); processing is fine but \
             display assumes one row",
            meta.height
        );
        warnings.push(DecodeWarning::TallFrame { height: meta.height });
    }

    let frames = read_frame_stack(
        reader,
        meta.width,
        meta.height,
        meta.frame_count,
        meta.stride,
        pixel_type,
    )?;

    // The stored calibration spans the whole sensor; slice out the columns
    // the active region actually covers.
    let left = meta.sensor_x.min(meta.wavelengths_nm.len());
    let right = (meta.sensor_x + meta.sensor_width).min(meta.wavelengths_nm.len());
    let wavenumber_axis = units::axis_nm_to_cm(&meta.wavelengths_nm[left..right]);

    if wavenumber_axis.len() != meta.width {
        warn!(
            "wavelength axis has {} elements but data rows have {} columns",
            wavenumber_axis.len(),
            meta.width
        );
        warnings.push(DecodeWarning::AxisLengthMismatch {
            axis_len: wavenumber_axis.len(),
            data_cols: meta.width,
        });
    }

    Ok(Frame {
        frames,
        width: meta.width,
        height: meta.height,
        exposure: meta.exposure,
        wavenumber_axis,
        pixel_type,
        warnings,
    })
}

/// Everything the decoder needs out of the XML footer.
#[derive(Debug, Default)]
struct FooterMeta {
    width: usize,
    height: usize,
    frame_count: usize,
    stride: u64,
    pixel_format: String,
    /// Exposure time in seconds (the document stores milliseconds).
    exposure: f64,
    /// Whole-sensor wavelength calibration, in nanometres.
    wavelengths_nm: Vec<f64>,
    /// Left edge of the active region on the sensor, in columns.
    sensor_x: usize,
    /// Column width of the active region on the sensor.
    sensor_width: usize,
    /// Number of ROI DataBlocks declared.
    roi_count: usize,
}

/// Which element's text content the parser is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextTarget {
    ExposureTime,
    Wavelength,
}

fn parse_footer(footer: &[u8]) -> Result<FooterMeta, SpeError> {
    let mut xml = Reader::from_reader(footer);
    xml.config_mut().trim_text(true);

    let mut meta = FooterMeta::default();
    let mut frame_seen = false;
    let mut exposure_seen = false;
    let mut in_data_format = false;
    let mut in_calibrations = false;
    let mut sensor_seen = false;
    // Nesting depth of open DataBlock elements inside DataFormat.
    let mut block_depth = 0usize;
    let mut pending_text: Option<TextTarget> = None;

    let mut buf = Vec::new();
    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                match e.local_name().as_ref() {
                    b"DataFormat" => in_data_format = true,
                    b"Calibrations" => in_calibrations = true,
                    b"DataBlock" => {
                        handle_data_block(&e, &mut meta, in_data_format, block_depth, &mut frame_seen)?;
                        block_depth += 1;
                    }
                    b"ExposureTime" if !exposure_seen => {
                        pending_text = Some(TextTarget::ExposureTime);
                    }
                    b"Wavelength" if in_calibrations && meta.wavelengths_nm.is_empty() => {
                        pending_text = Some(TextTarget::Wavelength);
                    }
                    b"SensorMapping" if in_calibrations && !sensor_seen => {
                        meta.sensor_x = parse_attr(&e, "x")?;
                        meta.sensor_width = parse_attr(&e, "width")?;
                        sensor_seen = true;
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"DataBlock" => {
                    handle_data_block(&e, &mut meta, in_data_format, block_depth, &mut frame_seen)?;
                }
                b"SensorMapping" if in_calibrations && !sensor_seen => {
                    meta.sensor_x = parse_attr(&e, "x")?;
                    meta.sensor_width = parse_attr(&e, "width")?;
                    sensor_seen = true;
                }
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if let Some(target) = pending_text.take() {
                    let text = t.unescape()?;
                    match target {
                        TextTarget::ExposureTime => {
                            // Stored in milliseconds.
                            let ms: f64 = text.trim().parse().map_err(|_| {
                                SpeError::InvalidMetadata {
                                    field: "ExposureTime",
                                    value: text.trim().to_string(),
                                }
                            })?;
                            meta.exposure = ms / 1000.0;
                            exposure_seen = true;
                        }
                        TextTarget::Wavelength => {
                            meta.wavelengths_nm = parse_wavelengths(text.trim())?;
                        }
                    }
                }
            }
            Ok(Event::End(e)) => {
                pending_text = None;
                match e.local_name().as_ref() {
                    b"DataFormat" => in_data_format = false,
                    b"Calibrations" => in_calibrations = false,
                    b"DataBlock" => block_depth = block_depth.saturating_sub(1),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SpeError::Xml(e)),
            _ => {}
        }
        buf.clear();
    }

    if !frame_seen {
        return Err(SpeError::MissingMetadata("DataFormat/DataBlock".into()));
    }
    if meta.roi_count == 0 {
        return Err(SpeError::MissingMetadata("frame ROI DataBlock".into()));
    }
    if !exposure_seen {
        return Err(SpeError::MissingMetadata("ExposureTime".into()));
    }
    if meta.wavelengths_nm.is_empty() {
        return Err(SpeError::MissingMetadata("Calibrations/Wavelength".into()));
    }
    if !sensor_seen {
        return Err(SpeError::MissingMetadata("SensorMapping".into()));
    }
    Ok(meta)
}

/// Route a DataBlock element: depth 0 inside DataFormat is the frame block
/// (count, pixel format, stride), depth 1 is an ROI (width, height).
fn handle_data_block(
    e: &BytesStart,
    meta: &mut FooterMeta,
    in_data_format: bool,
    block_depth: usize,
    frame_seen: &mut bool,
) -> Result<(), SpeError> {
    if !in_data_format {
        return Ok(());
    }
    match block_depth {
        0 => {
            if *frame_seen {
                warn!("extra frame-level DataBlock ignored");
                return Ok(());
            }
            meta.frame_count = parse_attr(e, "count")?;
            meta.stride = parse_attr::<u64>(e, "stride")?;
            meta.pixel_format = get_attr(e, "pixelFormat")?
                .ok_or_else(|| SpeError::MissingMetadata("DataBlock pixelFormat".into()))?;
            *frame_seen = true;
        }
        1 => {
            meta.roi_count += 1;
            if meta.roi_count == 1 {
                meta.width = parse_attr(e, "width")?;
                meta.height = parse_attr(e, "height")?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Fetch one attribute value by name, if present.
fn get_attr(e: &BytesStart, name: &str) -> Result<Option<String>, SpeError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| SpeError::Xml(quick_xml::Error::from(e)))?;
        if attr.key.as_ref() == name.as_bytes() {
            let value = String::from_utf8_lossy(&attr.value).into_owned();
            return Ok(Some(value));
        }
    }
    Ok(None)
}

/// Fetch and parse a required attribute.
fn parse_attr<T: std::str::FromStr>(e: &BytesStart, name: &'static str) -> Result<T, SpeError> {
    let raw = get_attr(e, name)?
        .ok_or_else(|| SpeError::MissingMetadata(format!("DataBlock attribute {name}")))?;
    raw.parse().map_err(|_| SpeError::InvalidMetadata {
        field: name,
        value: raw,
    })
}

/// Parse the comma-separated wavelength calibration array.
fn parse_wavelengths(text: &str) -> Result<Vec<f64>, SpeError> {
    text.split(',')
        .map(|s| {
            s.trim().parse().map_err(|_| SpeError::InvalidMetadata {
                field: "Wavelength",
                value: s.trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOOTER: &str = r#"<SpeFormat version="3.0" xmlns="http://example.invalid/spe/2009">
  <DataFormat>
    <DataBlock type="Frame" count="2" pixelFormat="MonochromeUnsigned16" size="24" stride="12">
      <DataBlock type="Region" width="6" height="1" size="12" stride="12" />
    </DataBlock>
  </DataFormat>
  <Calibrations>
    <WavelengthMapping>
      <Wavelength>800.0,801.0,802.0,803.0,804.0,805.0,806.0,807.0</Wavelength>
    </WavelengthMapping>
    <SensorInformation width="8" height="1" />
    <SensorMapping x="1" y="0" width="6" height="1" xBinning="1" yBinning="1" />
  </Calibrations>
  <DataHistories>
    <DataHistory>
      <Origin>
        <Experiment>
          <Devices>
            <Cameras>
              <Camera>
                <ShutterTiming>
                  <ExposureTime>250</ExposureTime>
                </ShutterTiming>
              </Camera>
            </Cameras>
          </Devices>
        </Experiment>
      </Origin>
    </DataHistory>
  </DataHistories>
</SpeFormat>"#;

    #[test]
    fn test_parse_footer() {
        let meta = parse_footer(FOOTER.as_bytes()).unwrap();
        assert_eq!(meta.width, 6);
        assert_eq!(meta.height, 1);
        assert_eq!(meta.frame_count, 2);
        assert_eq!(meta.stride, 12);
        assert_eq!(meta.pixel_format, "MonochromeUnsigned16");
        assert_eq!(meta.exposure, 0.25);
        assert_eq!(meta.wavelengths_nm.len(), 8);
        assert_eq!(meta.sensor_x, 1);
        assert_eq!(meta.sensor_width, 6);
        assert_eq!(meta.roi_count, 1);
    }

    #[test]
    fn test_extra_rois_counted() {
        let footer = FOOTER.replace(
            r#"<DataBlock type="Region" width="6" height="1" size="12" stride="12" />"#,
            r#"<DataBlock type="Region" width="6" height="1" size="12" stride="12" />
               <DataBlock type="Region" width="2" height="1" size="4" stride="4" />"#,
        );
        let meta = parse_footer(footer.as_bytes()).unwrap();
        // First ROI wins; the second only bumps the count.
        assert_eq!(meta.roi_count, 2);
        assert_eq!(meta.width, 6);
    }

    #[test]
    fn test_missing_exposure_is_structured() {
        let footer = FOOTER.replace("<ExposureTime>250</ExposureTime>", "");
        match parse_footer(footer.as_bytes()) {
            Err(SpeError::MissingMetadata(field)) => assert!(field.contains("ExposureTime")),
            other => panic!("expected MissingMetadata, got {other:?}"),
        }
    }
}
