//! Legacy (SPE 2.x) decoder
//!
//! 2.x files keep every field at a fixed byte offset in the 4100-byte
//! binary header. The wavelength axis is not stored directly; the header
//! carries polynomial coefficients that are evaluated over the column
//! indices 1..=width (the calibration is one-based, verified against real
//! camera output).

use std::io::{Read, Seek};

use log::{debug, info};

use super::{binary::ByteReader, read_frame_stack, PixelType, SpeError};
use crate::frame::{DecodeWarning, Frame};
use crate::units;

const EXPOSURE_OFFSET: u64 = 10;
const WIDTH_OFFSET: u64 = 42;
const PIXEL_TYPE_OFFSET: u64 = 108;
const HEIGHT_OFFSET: u64 = 656;
const FRAME_COUNT_OFFSET: u64 = 1446;
const POLY_DEGREE_OFFSET: u64 = 3101;
const POLY_COEFFS_OFFSET: u64 = 3263;

/// Decode an SPE 2.x stream into a [`Frame`].
pub(super) fn decode<R: Read + Seek>(reader: &mut ByteReader<R>) -> Result<Frame, SpeError> {
    let width = reader.read_u16_at(WIDTH_OFFSET)? as usize;
    let height = reader.read_u16_at(HEIGHT_OFFSET)? as usize;
    let frame_count = reader.read_i32_at(FRAME_COUNT_OFFSET)?.max(0) as usize;
    let pixel_code = reader.read_i16_at(PIXEL_TYPE_OFFSET)?;
    let pixel_type = PixelType::from_legacy_code(pixel_code)?;
    let exposure = reader.read_f32_at(EXPOSURE_OFFSET)? as f64;

    let stride = (width * height * pixel_type.byte_width()) as u64;
    info!(
        "legacy frame: {width}x{height} px, {frame_count} frame(s), \
         {} byte pixels, exposure {exposure} s",
        pixel_type.byte_width()
    );

    let mut warnings = Vec::new();
    if height > 1 {
        info!("data is not in n x 1 format (height {height})");
        warnings.push(DecodeWarning::TallFrame { height });
    }

    let frames = read_frame_stack(reader, width, height, frame_count, stride, pixel_type)?;

    let wavelength_nm = wavelength_axis(reader, width)?;
    let wavenumber_axis = units::axis_nm_to_cm(&wavelength_nm);

    if wavenumber_axis.len() != width {
        log::warn!(
            "wavelength axis has {} elements but data rows have {} columns",
            wavenumber_axis.len(),
            width
        );
        warnings.push(DecodeWarning::AxisLengthMismatch {
            axis_len: wavenumber_axis.len(),
            data_cols: width,
        });
    }

    Ok(Frame {
        frames,
        width,
        height,
        exposure,
        wavenumber_axis,
        pixel_type,
        warnings,
    })
}

/// Evaluate the stored calibration polynomial over columns 1..=width.
///
/// Coefficients are stored lowest-degree-first; they are reversed into
/// highest-first order and evaluated in Horner form.
fn wavelength_axis<R: Read + Seek>(
    reader: &mut ByteReader<R>,
    width: usize,
) -> Result<Vec<f64>, SpeError> {
    let degree = reader.read_i8_at(POLY_DEGREE_OFFSET)?.max(0) as usize;
    let mut coeffs = reader.read_f64_slice_at(POLY_COEFFS_OFFSET, degree + 1)?;
    coeffs.reverse();
    debug!("calibration coefficients (highest degree first): {coeffs:?}");

    Ok((1..=width).map(|x| polyval(&coeffs, x as f64)).collect())
}

/// Horner evaluation; `coeffs` ordered from the highest degree down.
fn polyval(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().fold(0.0, |acc, &c| acc * x + c)
}
