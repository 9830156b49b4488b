//! Positional typed reads over an SPE byte stream
//!
//! Both SPE revisions store header fields at absolute byte offsets, so the
//! reader here seeks and reads little-endian values of a declared type. The
//! pixel-type registry maps the format's declared pixel codes (an integer
//! for 2.x, a string for 3.0) to an element type and byte width.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use super::SpeError;

/// Pixel element types SPE files can store samples as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
    /// Signed 16-bit integer
    I16,
    /// Signed 32-bit integer
    I32,
    /// Unsigned 8-bit integer
    U8,
    /// Unsigned 16-bit integer
    U16,
    /// Unsigned 32-bit integer
    U32,
}

impl PixelType {
    /// Size of one sample in bytes.
    pub fn byte_width(&self) -> usize {
        match self {
            PixelType::U8 => 1,
            PixelType::I16 | PixelType::U16 => 2,
            PixelType::F32 | PixelType::I32 | PixelType::U32 => 4,
            PixelType::F64 => 8,
        }
    }

    /// Resolve a legacy (2.x) integer pixel-type code.
    pub fn from_legacy_code(code: i16) -> Result<Self, SpeError> {
        match code {
            0 => Ok(PixelType::F32),
            1 => Ok(PixelType::I32),
            2 => Ok(PixelType::I16),
            3 => Ok(PixelType::U16),
            5 => Ok(PixelType::F64),
            6 => Ok(PixelType::U8),
            8 => Ok(PixelType::U32),
            other => Err(SpeError::UnrecognizedPixelType(other.to_string())),
        }
    }

    /// Resolve a modern (3.0) pixel-format name.
    pub fn from_modern_name(name: &str) -> Result<Self, SpeError> {
        match name {
            "MonochromeUnsigned16" => Ok(PixelType::U16),
            "MonochromeUnsigned32" => Ok(PixelType::U32),
            "MonochromeFloating32" => Ok(PixelType::F32),
            other => Err(SpeError::UnrecognizedPixelType(other.to_string())),
        }
    }
}

/// Seek-and-read wrapper giving typed positional access to a byte stream.
pub struct ByteReader<R: Read + Seek> {
    inner: R,
}

impl<R: Read + Seek> ByteReader<R> {
    /// Wrap a seekable byte stream.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    fn seek_to(&mut self, offset: u64) -> Result<(), SpeError> {
        self.inner.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Read exactly `buf.len()` bytes at `offset`.
    fn fill_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), SpeError> {
        self.seek_to(offset)?;
        self.inner.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                SpeError::TruncatedFile {
                    offset,
                    wanted: buf.len(),
                }
            } else {
                SpeError::Io(e)
            }
        })
    }

    /// Read one little-endian f32 at an absolute byte offset.
    pub fn read_f32_at(&mut self, offset: u64) -> Result<f32, SpeError> {
        let mut buf = [0u8; 4];
        self.fill_at(offset, &mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    /// Read one little-endian u16 at an absolute byte offset.
    pub fn read_u16_at(&mut self, offset: u64) -> Result<u16, SpeError> {
        let mut buf = [0u8; 2];
        self.fill_at(offset, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Read one little-endian i16 at an absolute byte offset.
    pub fn read_i16_at(&mut self, offset: u64) -> Result<i16, SpeError> {
        let mut buf = [0u8; 2];
        self.fill_at(offset, &mut buf)?;
        Ok(i16::from_le_bytes(buf))
    }

    /// Read one little-endian i32 at an absolute byte offset.
    pub fn read_i32_at(&mut self, offset: u64) -> Result<i32, SpeError> {
        let mut buf = [0u8; 4];
        self.fill_at(offset, &mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    /// Read one i8 at an absolute byte offset.
    pub fn read_i8_at(&mut self, offset: u64) -> Result<i8, SpeError> {
        let mut buf = [0u8; 1];
        self.fill_at(offset, &mut buf)?;
        Ok(buf[0] as i8)
    }

    /// Read one little-endian u64 at an absolute byte offset.
    pub fn read_u64_at(&mut self, offset: u64) -> Result<u64, SpeError> {
        let mut buf = [0u8; 8];
        self.fill_at(offset, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read `count` little-endian f64 values starting at an absolute offset.
    pub fn read_f64_slice_at(&mut self, offset: u64, count: usize) -> Result<Vec<f64>, SpeError> {
        let mut bytes = vec![0u8; count * 8];
        self.fill_at(offset, &mut bytes)?;
        let mut cursor = std::io::Cursor::new(bytes);
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(cursor.read_f64::<LittleEndian>()?);
        }
        Ok(values)
    }

    /// Read `count` samples of `pixel_type` at an absolute offset, widening
    /// every sample to f64.
    pub fn read_samples_at(
        &mut self,
        offset: u64,
        count: usize,
        pixel_type: PixelType,
    ) -> Result<Vec<f64>, SpeError> {
        let mut bytes = vec![0u8; count * pixel_type.byte_width()];
        self.fill_at(offset, &mut bytes)?;

        let mut cursor = std::io::Cursor::new(bytes);
        let mut values = Vec::with_capacity(count);
        match pixel_type {
            PixelType::F32 => {
                for _ in 0..count {
                    values.push(cursor.read_f32::<LittleEndian>()? as f64);
                }
            }
            PixelType::F64 => {
                for _ in 0..count {
                    values.push(cursor.read_f64::<LittleEndian>()?);
                }
            }
            PixelType::I16 => {
                for _ in 0..count {
                    values.push(cursor.read_i16::<LittleEndian>()? as f64);
                }
            }
            PixelType::I32 => {
                for _ in 0..count {
                    values.push(cursor.read_i32::<LittleEndian>()? as f64);
                }
            }
            PixelType::U8 => {
                for _ in 0..count {
                    values.push(cursor.read_u8()? as f64);
                }
            }
            PixelType::U16 => {
                for _ in 0..count {
                    values.push(cursor.read_u16::<LittleEndian>()? as f64);
                }
            }
            PixelType::U32 => {
                for _ in 0..count {
                    values.push(cursor.read_u32::<LittleEndian>()? as f64);
                }
            }
        }
        Ok(values)
    }

    /// Read everything from an absolute offset to end of stream.
    ///
    /// This is the whole-remainder form of the positional read, used for the
    /// XML footer whose length is not stored anywhere.
    pub fn read_remaining_at(&mut self, offset: u64) -> Result<Vec<u8>, SpeError> {
        self.seek_to(offset)?;
        let mut buf = Vec::new();
        self.inner.read_to_end(&mut buf)?;
        Ok(buf)
    }
}
