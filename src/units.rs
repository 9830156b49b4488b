//! Spectroscopic unit conversions
//!
//! Wavelength axes come out of the SPE calibration in nanometres; the
//! pipeline works in wavenumbers (cm⁻¹). Terahertz conversions are provided
//! for callers that prefer a frequency axis.

/// Speed of light in m/s, at the precision the THz conversions use.
const SPEED_OF_LIGHT: f64 = 2.997e8;

/// Convert a wavelength in nanometres to a wavenumber in cm⁻¹.
pub fn nm_to_cm(nm: f64) -> f64 {
    1.0 / (nm * 1.0e-9) * 0.01
}

/// Convert a wavenumber in cm⁻¹ to a wavelength in nanometres.
pub fn cm_to_nm(cm: f64) -> f64 {
    (1.0 / cm) * 1.0e7
}

/// Convert a wavelength in nanometres to a frequency in THz.
pub fn nm_to_thz(nm: f64) -> f64 {
    (SPEED_OF_LIGHT / (nm * 1.0e-9)) / 1.0e12
}

/// Convert a wavenumber in cm⁻¹ to a frequency in THz.
pub fn cm_to_thz(cm: f64) -> f64 {
    (SPEED_OF_LIGHT * 100.0 * cm) / 1.0e12
}

/// Convert a frequency in THz to a wavelength in nanometres.
pub fn thz_to_nm(thz: f64) -> f64 {
    SPEED_OF_LIGHT * 1.0e9 / (thz * 1.0e12)
}

/// Convert a frequency in THz to a wavenumber in cm⁻¹.
pub fn thz_to_cm(thz: f64) -> f64 {
    (thz * 1.0e12) / (SPEED_OF_LIGHT * 100.0)
}

/// Convert a whole axis from nanometres to wavenumbers.
pub fn axis_nm_to_cm(axis: &[f64]) -> Vec<f64> {
    axis.iter().map(|&v| nm_to_cm(v)).collect()
}
