//! SPE camera-file decoding
//!
//! SPE is the binary format written by spectroscopy CCD cameras. Two
//! incompatible revisions circulate: 2.x files keep everything at fixed
//! byte offsets in a 4100-byte header, while 3.0 files carry an XML footer
//! describing the data layout and calibration. A 4-byte float at a fixed
//! offset near the file start identifies the revision, and [`decode_file`]
//! dispatches on it.
//!
//! Decoding one file is self-contained: the file handle is opened, read and
//! dropped inside the call, and a failure aborts only that file, never a
//! whole batch.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::debug;

use crate::frame::{Frame, Spectrum2D};

pub use binary::{ByteReader, PixelType};

pub mod binary;
mod legacy;
mod modern;

/// Byte offset of the 4-byte float holding the file format version.
pub(crate) const VERSION_OFFSET: u64 = 1992;
/// Byte offset where frame data begins, shared by both revisions.
pub(crate) const DATA_OFFSET: u64 = 4100;

/// Errors raised while decoding one SPE file.
///
/// All of these are recoverable at the one-file granularity: the caller
/// drops the file from the batch and reports the error.
#[derive(Debug, thiserror::Error)]
pub enum SpeError {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fewer bytes remained than a positional read requested
    #[error("truncated file: wanted {wanted} bytes at offset {offset}")]
    TruncatedFile {
        /// Absolute byte offset of the read.
        offset: u64,
        /// Bytes the read needed.
        wanted: usize,
    },

    /// Pixel-type code or name not in the registry
    #[error("unrecognized pixel type: {0}")]
    UnrecognizedPixelType(String),

    /// Error parsing the XML footer of a 3.0 file
    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// A metadata node the decoder needs was absent from the footer
    #[error("missing expected metadata: {0}")]
    MissingMetadata(String),

    /// A metadata value could not be parsed as the expected type
    #[error("invalid metadata value for {field}: {value}")]
    InvalidMetadata {
        /// Which footer field was malformed.
        field: &'static str,
        /// The offending text.
        value: String,
    },
}

/// Decode one SPE file from disk, dispatching on the stored version tag.
pub fn decode_file(path: &Path) -> Result<Frame, SpeError> {
    let file = File::open(path)?;
    let mut reader = ByteReader::new(BufReader::new(file));
    decode(&mut reader)
}

/// Decode an SPE byte stream, dispatching on the stored version tag.
///
/// Versions below 3.0 use the fixed-offset legacy header; 3.0 and later
/// carry an XML footer.
pub fn decode<R: std::io::Read + std::io::Seek>(
    reader: &mut ByteReader<R>,
) -> Result<Frame, SpeError> {
    let version = reader.read_f32_at(VERSION_OFFSET)?;
    debug!("SPE version tag is {version}");

    if version < 3.0 {
        legacy::decode(reader)
    } else {
        modern::decode(reader)
    }
}

/// Read every captured frame from the data region, reshaping the flat
/// sample buffer to (height × width) per frame.
///
/// Frame `i` starts at `DATA_OFFSET + i * stride`; a short read anywhere
/// surfaces as [`SpeError::TruncatedFile`], upholding the invariant that
/// the sample buffer holds exactly width × height × count elements.
pub(crate) fn read_frame_stack<R: std::io::Read + std::io::Seek>(
    reader: &mut ByteReader<R>,
    width: usize,
    height: usize,
    frame_count: usize,
    stride: u64,
    pixel_type: PixelType,
) -> Result<Vec<Spectrum2D>, SpeError> {
    let npixels = width * height;
    let mut frames = Vec::with_capacity(frame_count);
    for i in 0..frame_count {
        let offset = DATA_OFFSET + i as u64 * stride;
        let flat = reader.read_samples_at(offset, npixels, pixel_type)?;
        frames.push(Spectrum2D::from_flat(height, width, flat));
    }
    Ok(frames)
}
