//! Decoded detector frames
//!
//! A [`Frame`] is the decoder's output: one or more detector readouts of
//! shape (height × width), a wavelength axis converted to wavenumbers, and
//! the per-frame exposure time. Multi-frame files can be collapsed with
//! [`Frame::summed`] or kept apart with [`Frame::series`].

use serde::Serialize;

use crate::spe::PixelType;

/// A dense 2D array of samples, row-major, shape (rows × cols).
///
/// Detector data is almost always (1 × width) for a binned spectrum, but
/// full-chip readouts give taller arrays and every operation here keeps the
/// row dimension intact.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum2D {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Spectrum2D {
    /// Create an array from a flat row-major buffer.
    ///
    /// # Panics
    /// Panics if `data.len() != rows * cols`; decoders validate lengths
    /// before construction.
    pub fn from_flat(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), rows * cols, "flat buffer does not match shape");
        Self { rows, cols, data }
    }

    /// Create a zero-filled array.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Create an array filled with NaN, used for export placeholder columns.
    pub fn nan(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![f64::NAN; rows * cols],
        }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Borrow one row as a slice.
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Borrow one row mutably.
    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// The flat row-major buffer.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Elementwise in-place addition. Shapes must match.
    pub fn add_assign(&mut self, other: &Spectrum2D) {
        debug_assert_eq!((self.rows, self.cols), (other.rows, other.cols));
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += *b;
        }
    }

    /// Elementwise subtraction into a new array. Shapes must match.
    pub fn sub(&self, other: &Spectrum2D) -> Spectrum2D {
        debug_assert_eq!((self.rows, self.cols), (other.rows, other.cols));
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| a - b)
            .collect();
        Spectrum2D {
            rows: self.rows,
            cols: self.cols,
            data,
        }
    }

    /// Elementwise division into a new array. Shapes must match.
    pub fn div(&self, other: &Spectrum2D) -> Spectrum2D {
        debug_assert_eq!((self.rows, self.cols), (other.rows, other.cols));
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| a / b)
            .collect();
        Spectrum2D {
            rows: self.rows,
            cols: self.cols,
            data,
        }
    }

    /// Divide every sample by a scalar, in place.
    pub fn scale_div(&mut self, divisor: f64) {
        for v in &mut self.data {
            *v /= divisor;
        }
    }
}

/// How multi-frame files are collapsed when records are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccumulationMode {
    /// Elementwise-add all frames into one (height × width) array.
    #[default]
    Sum,
    /// Keep frames apart, with a parallel per-frame timestamp array.
    Series,
}

/// Non-fatal conditions noticed while decoding one file.
///
/// These are logged as they happen, and carried on the [`Frame`] so callers
/// and tests can assert on them (they never abort a decode).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DecodeWarning {
    /// Wavelength axis length differs from the data column count; the file
    /// is likely corrupt or an unsupported variant.
    AxisLengthMismatch {
        /// Elements in the wavelength axis.
        axis_len: usize,
        /// Columns in the decoded data.
        data_cols: usize,
    },
    /// More than one region of interest declared; only the first is read.
    ExtraRegions {
        /// Number of ROI blocks declared in the file.
        declared: usize,
    },
    /// Frame height above one; downstream display assumes (1 × n) data.
    TallFrame {
        /// Decoded frame height.
        height: usize,
    },
}

/// One decoded SPE file: all captured frames plus calibration and timing.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Every captured readout, each (height × width).
    pub frames: Vec<Spectrum2D>,
    /// Frame width in pixels.
    pub width: usize,
    /// Frame height in pixels.
    pub height: usize,
    /// Per-frame exposure time in seconds.
    pub exposure: f64,
    /// Wavelength axis in wavenumbers (cm⁻¹), one value per column.
    pub wavenumber_axis: Vec<f64>,
    /// Pixel element type the samples were stored as.
    pub pixel_type: PixelType,
    /// Non-fatal conditions noticed during the decode.
    pub warnings: Vec<DecodeWarning>,
}

impl Frame {
    /// Number of captured frames.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Collapse all frames into one (height × width) array by summation.
    pub fn summed(&self) -> Spectrum2D {
        let mut acc = Spectrum2D::zeros(self.height, self.width);
        for f in &self.frames {
            acc.add_assign(f);
        }
        acc
    }

    /// The frame stack plus a per-frame timestamp array `t[i] = i * exposure`.
    pub fn series(&self) -> (Vec<Spectrum2D>, Vec<f64>) {
        let timestamps = (0..self.frames.len())
            .map(|i| i as f64 * self.exposure)
            .collect();
        (self.frames.clone(), timestamps)
    }
}
