//! Fixed-order correction pipeline
//!
//! Corrections run in one prescribed order per record: cosmic-ray removal,
//! downconversion, calibration, exposure division, background subtraction,
//! reference-background subtraction, normalization. Every step follows the
//! same contract: a non-forced call on an already-corrected record is a
//! reported no-op, and a forced call re-applies on top of the current state,
//! compounding the effect. Missing prerequisites (no background file, no
//! exposure time) skip the step with a structured reason instead of failing,
//! so later steps and callers can see exactly what did and did not run.

use log::{info, warn};
use serde::Serialize;

use crate::config::ProcessOptions;
use crate::record::{Correction, DataKind, SpectralRecord};
use crate::units;

/// What happened when one correction step ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StepOutcome {
    /// Correction applied for the first time.
    Applied,
    /// Correction forced on top of a previous application; the effect
    /// compounds and this is deliberate, reported, and allowed.
    Reapplied,
    /// Correction had already run and force was off; nothing changed.
    AlreadyApplied,
    /// A prerequisite was missing; the step did not run and its flag
    /// remains unset.
    Skipped(SkipReason),
}

impl StepOutcome {
    /// True if the step changed the record this run.
    pub fn applied(&self) -> bool {
        matches!(self, StepOutcome::Applied | StepOutcome::Reapplied)
    }
}

/// Why a correction step was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// The named source array was never decoded.
    MissingArray(DataKind),
    /// The named array has no recorded exposure time.
    MissingExposure(DataKind),
    /// Neither a subtracted nor a raw reference exists.
    MissingReference,
    /// The record has no energy axis.
    MissingAxis,
    /// A configuration value the step needs was not supplied.
    MissingSetting(&'static str),
}

/// One entry in a record's processing report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    /// Which correction the entry is about.
    pub correction: Correction,
    /// What happened.
    pub outcome: StepOutcome,
}

/// Structured account of one pipeline run over one record.
///
/// Serializable so a harness can assert on outcomes programmatically
/// instead of scraping log text.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingReport {
    /// Step entries in execution order.
    pub steps: Vec<StepReport>,
}

impl ProcessingReport {
    fn push(&mut self, correction: Correction, outcome: StepOutcome) {
        self.steps.push(StepReport { correction, outcome });
    }

    /// Outcome recorded for a correction, if that step ran this pass.
    pub fn outcome(&self, correction: Correction) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| s.correction == correction)
            .map(|s| &s.outcome)
    }

    /// Number of steps that applied (or re-applied) this pass.
    pub fn applied_count(&self) -> usize {
        self.steps.iter().filter(|s| s.outcome.applied()).count()
    }
}

/// Remove narrow spikes from one detector row, in place.
///
/// Scanning left to right up to `len - max_width`, at index `i` the maximal
/// run of consecutive samples after `i` exceeding `row[i] + threshold` is
/// found. Runs strictly shorter than `max_width` are replaced by linear
/// interpolation between the bracketing samples `row[i]` and `row[i+n+1]`;
/// runs reaching `max_width` are taken for real spectral features and left
/// alone. Returns the number of samples replaced.
///
/// This is a best-effort heuristic with a tunable threshold/width pair, not
/// a statistically validated spike detector.
pub fn cosmic_ray_filter(row: &mut [f64], threshold: f64, max_width: usize) -> usize {
    if max_width == 0 || row.len() <= max_width {
        return 0;
    }

    let mut replaced = 0;
    for i in 0..row.len() - max_width {
        let base = row[i];
        let mut n = 0;
        while n < max_width && i + n + 1 < row.len() && row[i + n + 1] > base + threshold {
            n += 1;
        }
        if n > 0 && n < max_width {
            let right = row[i + n + 1];
            for k in 1..=n {
                let t = k as f64 / (n + 1) as f64;
                row[i + k] = base + t * (right - base);
                replaced += 1;
            }
        }
    }
    replaced
}

impl SpectralRecord {
    /// Subtract the upconversion line from the energy axis.
    ///
    /// The pre-downconversion axis is preserved in `axis_raw`.
    pub fn downconvert(&mut self, upconverter_cm: f64, force: bool) -> StepOutcome {
        let Some(axis) = self.axis.as_mut() else {
            return StepOutcome::Skipped(SkipReason::MissingAxis);
        };
        let again = self.corrections.contains(Correction::Downconverted);
        if again && !force {
            info!("spectrum already downconverted; pass force to downconvert twice");
            return StepOutcome::AlreadyApplied;
        }
        if again {
            warn!("forcing a second downconversion");
        }

        self.axis_raw = Some(axis.clone());
        for v in axis.iter_mut() {
            *v -= upconverter_cm;
        }
        self.upconverter_used = Some(upconverter_cm);
        self.corrections.insert(Correction::Downconverted);
        info!("energy axis downconverted by {upconverter_cm} cm-1");

        if again {
            StepOutcome::Reapplied
        } else {
            StepOutcome::Applied
        }
    }

    /// Shift the energy axis by a fixed wavenumber offset.
    ///
    /// Forced re-application accumulates the total offset in
    /// `applied_calibration`.
    pub fn calibrate(&mut self, offset_cm: f64, force: bool) -> StepOutcome {
        let Some(axis) = self.axis.as_mut() else {
            return StepOutcome::Skipped(SkipReason::MissingAxis);
        };
        let again = self.corrections.contains(Correction::Calibrated);
        if again && !force {
            info!("calibration offset already applied; pass force to apply again");
            return StepOutcome::AlreadyApplied;
        }

        for v in axis.iter_mut() {
            *v += offset_cm;
        }
        if again {
            warn!("applying multiple calibrations");
            let total = self.applied_calibration.unwrap_or(0.0) + offset_cm;
            self.applied_calibration = Some(total);
            info!("calibration of {offset_cm:+} cm-1 applied, {total:+} cm-1 in total");
        } else {
            self.applied_calibration = Some(offset_cm);
            info!("calibration of {offset_cm:+} cm-1 applied");
        }
        self.corrections.insert(Correction::Calibrated);

        if again {
            StepOutcome::Reapplied
        } else {
            StepOutcome::Applied
        }
    }

    /// Divide one raw array by its own exposure time.
    pub fn divide_exposure_one(&mut self, kind: DataKind, force: bool) -> StepOutcome {
        if self.array(kind).is_none() {
            info!("no {} file present, exposure not divided", kind.label());
            return StepOutcome::Skipped(SkipReason::MissingArray(kind));
        }
        let Some(time) = self.exposure(kind) else {
            warn!(
                "no exposure time recorded for {}; check the source file",
                kind.label()
            );
            return StepOutcome::Skipped(SkipReason::MissingExposure(kind));
        };
        let flag = Correction::ExposureDivided(kind);
        let again = self.corrections.contains(flag);
        if again && !force {
            info!(
                "exposure for {} already divided; pass force to divide twice",
                kind.label()
            );
            return StepOutcome::AlreadyApplied;
        }
        if again {
            warn!("dividing the {} exposure out more than once", kind.label());
        }

        if let Some(arr) = self.array_mut(kind) {
            arr.scale_div(time);
        }
        self.corrections.insert(flag);
        info!("{} data divided by exposure time of {time} s", kind.label());

        if again {
            StepOutcome::Reapplied
        } else {
            StepOutcome::Applied
        }
    }

    /// Divide all four raw arrays by their exposure times, independently.
    pub fn divide_exposure(&mut self, force: bool) -> Vec<(DataKind, StepOutcome)> {
        DataKind::ALL
            .iter()
            .map(|&kind| (kind, self.divide_exposure_one(kind, force)))
            .collect()
    }

    /// Subtract the background array from the signal.
    pub fn background_subtract(&mut self, force: bool) -> StepOutcome {
        let Some(background) = self.array(DataKind::Background).cloned() else {
            warn!("no background file found, subtraction skipped");
            return StepOutcome::Skipped(SkipReason::MissingArray(DataKind::Background));
        };
        let Some(signal) = self.array(DataKind::Signal) else {
            warn!("no signal file found, subtraction skipped");
            return StepOutcome::Skipped(SkipReason::MissingArray(DataKind::Signal));
        };
        let again = self.corrections.contains(Correction::BackgroundSubtracted);
        if again && !force {
            info!("spectrum already background subtracted; pass force to subtract twice");
            return StepOutcome::AlreadyApplied;
        }

        self.signal_subtracted = match (&self.signal_subtracted, again) {
            (Some(prev), true) => {
                warn!("subtracting the background twice");
                Some(prev.sub(&background))
            }
            _ => Some(signal.sub(&background)),
        };
        self.corrections.insert(Correction::BackgroundSubtracted);
        info!("background subtracted from the signal data");

        if again {
            StepOutcome::Reapplied
        } else {
            StepOutcome::Applied
        }
    }

    /// Subtract the reference background from the reference.
    pub fn ref_background_subtract(&mut self, force: bool) -> StepOutcome {
        let Some(ref_bg) = self.array(DataKind::ReferenceBackground).cloned() else {
            warn!("no background for the reference file found, subtraction skipped");
            return StepOutcome::Skipped(SkipReason::MissingArray(DataKind::ReferenceBackground));
        };
        let Some(reference) = self.array(DataKind::Reference) else {
            warn!("no reference file found, subtraction skipped");
            return StepOutcome::Skipped(SkipReason::MissingArray(DataKind::Reference));
        };
        let again = self.corrections.contains(Correction::RefBackgroundSubtracted);
        if again && !force {
            info!("reference already background subtracted; pass force to subtract twice");
            return StepOutcome::AlreadyApplied;
        }

        self.ref_subtracted = match (&self.ref_subtracted, again) {
            (Some(prev), true) => {
                warn!("subtracting the reference background twice");
                Some(prev.sub(&ref_bg))
            }
            _ => Some(reference.sub(&ref_bg)),
        };
        self.corrections.insert(Correction::RefBackgroundSubtracted);
        info!("background subtracted from the reference data");

        if again {
            StepOutcome::Reapplied
        } else {
            StepOutcome::Applied
        }
    }

    /// Divide the best-available signal by the best-available reference.
    pub fn normalize(&mut self, force: bool) -> StepOutcome {
        let Some(reference) = self.best_reference().cloned() else {
            warn!("no reference data found, normalization skipped");
            return StepOutcome::Skipped(SkipReason::MissingReference);
        };
        let again = self.corrections.contains(Correction::Normalized);
        if again && !force {
            info!("spectrum already normalized; pass force to normalize twice");
            return StepOutcome::AlreadyApplied;
        }

        if again {
            warn!("normalizing twice");
            if let Some(prev) = &self.signal_normalized {
                self.signal_normalized = Some(prev.div(&reference));
            }
        } else {
            let Some(basis) = self.best_signal().cloned() else {
                warn!("no signal data found, normalization skipped");
                return StepOutcome::Skipped(SkipReason::MissingArray(DataKind::Signal));
            };
            self.signal_normalized = Some(basis.div(&reference));
        }
        self.corrections.insert(Correction::Normalized);
        info!("signal data normalized");

        if again {
            StepOutcome::Reapplied
        } else {
            StepOutcome::Applied
        }
    }

    /// Remove cosmic-ray spikes from one raw array, row by row.
    pub fn remove_cosmic_rays(
        &mut self,
        kind: DataKind,
        threshold: f64,
        max_width: usize,
        force: bool,
    ) -> StepOutcome {
        let flag = Correction::CosmicCleaned(kind);
        let again = self.corrections.contains(flag);
        if again && !force {
            info!(
                "cosmic rays already removed from {}; pass force to run again",
                kind.label()
            );
            return StepOutcome::AlreadyApplied;
        }
        let Some(arr) = self.array_mut(kind) else {
            info!("no {} file present, cosmic removal skipped", kind.label());
            return StepOutcome::Skipped(SkipReason::MissingArray(kind));
        };

        info!(
            "killing cosmic rays in {} (threshold {threshold}, max width {max_width})",
            kind.label()
        );
        let mut replaced = 0;
        for i in 0..arr.rows() {
            replaced += cosmic_ray_filter(arr.row_mut(i), threshold, max_width);
        }
        self.corrections.insert(flag);
        info!("samples replaced: {replaced}");

        if again {
            StepOutcome::Reapplied
        } else {
            StepOutcome::Applied
        }
    }
}

/// Run the enabled corrections over one record, in the fixed order.
///
/// Cosmic-ray removal runs first, on the signal always and on the other
/// arrays only when the correction consuming them is also enabled. Axis
/// corrections follow, then per-array exposure division, then the
/// subtractions, then normalization. Violating this order is a contract
/// violation, so there is exactly one place that encodes it.
pub fn process_record(record: &mut SpectralRecord, options: &ProcessOptions) -> ProcessingReport {
    let mut report = ProcessingReport::default();
    let force = options.force;

    if options.cosmic_kill {
        let th = options.cosmic_threshold;
        let mw = options.cosmic_max_width;
        report.push(
            Correction::CosmicCleaned(DataKind::Signal),
            record.remove_cosmic_rays(DataKind::Signal, th, mw, force),
        );
        if options.subtract {
            report.push(
                Correction::CosmicCleaned(DataKind::Background),
                record.remove_cosmic_rays(DataKind::Background, th, mw, force),
            );
        }
        if options.normalize {
            report.push(
                Correction::CosmicCleaned(DataKind::Reference),
                record.remove_cosmic_rays(DataKind::Reference, th, mw, force),
            );
        }
        if options.normalize && options.subtract {
            report.push(
                Correction::CosmicCleaned(DataKind::ReferenceBackground),
                record.remove_cosmic_rays(DataKind::ReferenceBackground, th, mw, force),
            );
        }
    }

    if options.downconvert {
        let outcome = match options.upconversion_nm {
            Some(nm) => record.downconvert(units::nm_to_cm(nm), force),
            None => {
                warn!("downconversion enabled but no upconversion wavelength set");
                StepOutcome::Skipped(SkipReason::MissingSetting("upconversion_nm"))
            }
        };
        report.push(Correction::Downconverted, outcome);
    }

    if options.calibrate {
        let outcome = match options.calibration_offset {
            Some(offset) => record.calibrate(offset, force),
            None => {
                warn!("calibration enabled but no offset set");
                StepOutcome::Skipped(SkipReason::MissingSetting("calibration_offset"))
            }
        };
        report.push(Correction::Calibrated, outcome);
    }

    if options.exposure_divide {
        for (kind, outcome) in record.divide_exposure(force) {
            report.push(Correction::ExposureDivided(kind), outcome);
        }
    }

    if options.subtract {
        report.push(
            Correction::BackgroundSubtracted,
            record.background_subtract(force),
        );
    }

    if options.subtract && options.normalize {
        report.push(
            Correction::RefBackgroundSubtracted,
            record.ref_background_subtract(force),
        );
    }

    if options.normalize {
        report.push(Correction::Normalized, record.normalize(force));
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Spectrum2D;
    use crate::record::Correction;

    fn record_with(signal: &[f64]) -> SpectralRecord {
        let mut record = SpectralRecord::new();
        let frame = crate::frame::Frame {
            frames: vec![Spectrum2D::from_flat(1, signal.len(), signal.to_vec())],
            width: signal.len(),
            height: 1,
            exposure: 2.0,
            wavenumber_axis: (0..signal.len()).map(|i| 3000.0 + i as f64).collect(),
            pixel_type: crate::spe::PixelType::F32,
            warnings: Vec::new(),
        };
        record.assign_frame(DataKind::Signal, &frame, Default::default());
        record
    }

    fn attach(record: &mut SpectralRecord, kind: DataKind, data: &[f64], exposure: f64) {
        let frame = crate::frame::Frame {
            frames: vec![Spectrum2D::from_flat(1, data.len(), data.to_vec())],
            width: data.len(),
            height: 1,
            exposure,
            wavenumber_axis: Vec::new(),
            pixel_type: crate::spe::PixelType::F32,
            warnings: Vec::new(),
        };
        record.assign_frame(kind, &frame, Default::default());
    }

    #[test]
    fn test_downconvert_idempotence_law() {
        let mut record = record_with(&[1.0, 2.0]);
        let axis0 = record.axis.clone().unwrap();

        assert!(!record.corrections.contains(Correction::Downconverted));
        assert_eq!(record.downconvert(100.0, false), StepOutcome::Applied);
        assert!(record.corrections.contains(Correction::Downconverted));
        let once = record.axis.clone().unwrap();
        assert_eq!(once[0], axis0[0] - 100.0);

        // Non-forced second call is a no-op with the axis untouched.
        assert_eq!(record.downconvert(100.0, false), StepOutcome::AlreadyApplied);
        assert_eq!(record.axis.as_ref().unwrap(), &once);

        // Forced call compounds and says so.
        assert_eq!(record.downconvert(100.0, true), StepOutcome::Reapplied);
        assert_eq!(record.axis.as_ref().unwrap()[0], axis0[0] - 200.0);
    }

    #[test]
    fn test_forced_calibration_accumulates() {
        let mut record = record_with(&[1.0]);
        let start = record.axis.as_ref().unwrap()[0];

        assert_eq!(record.calibrate(5.0, false), StepOutcome::Applied);
        assert_eq!(record.applied_calibration, Some(5.0));

        assert_eq!(record.calibrate(3.0, true), StepOutcome::Reapplied);
        assert_eq!(record.applied_calibration, Some(8.0));
        assert_eq!(record.axis.as_ref().unwrap()[0], start + 8.0);
    }

    #[test]
    fn test_exposure_division_per_kind() {
        let mut record = record_with(&[4.0, 8.0]);
        attach(&mut record, DataKind::Background, &[2.0, 2.0], 4.0);

        let outcomes = record.divide_exposure(false);
        assert_eq!(outcomes[0].1, StepOutcome::Applied);
        assert_eq!(outcomes[1].1, StepOutcome::Applied);
        assert_eq!(
            outcomes[2].1,
            StepOutcome::Skipped(SkipReason::MissingArray(DataKind::Reference))
        );

        assert_eq!(record.array(DataKind::Signal).unwrap().row(0), &[2.0, 4.0]);
        assert_eq!(
            record.array(DataKind::Background).unwrap().row(0),
            &[0.5, 0.5]
        );
        assert!(record
            .corrections
            .contains(Correction::ExposureDivided(DataKind::Signal)));
        assert!(!record
            .corrections
            .contains(Correction::ExposureDivided(DataKind::Reference)));
    }

    #[test]
    fn test_exposure_division_without_time_is_reported() {
        let mut record = SpectralRecord::new();
        record.set_array(DataKind::Signal, Spectrum2D::from_flat(1, 2, vec![4.0, 8.0]));

        // An array with no exposure time stays unchanged, flag unset.
        let outcome = record.divide_exposure_one(DataKind::Signal, false);
        assert_eq!(
            outcome,
            StepOutcome::Skipped(SkipReason::MissingExposure(DataKind::Signal))
        );
        assert_eq!(record.array(DataKind::Signal).unwrap().row(0), &[4.0, 8.0]);
        assert!(!record
            .corrections
            .contains(Correction::ExposureDivided(DataKind::Signal)));
    }

    #[test]
    fn test_subtract_and_normalize_chain() {
        let mut record = record_with(&[10.0, 20.0]);
        attach(&mut record, DataKind::Background, &[1.0, 2.0], 1.0);
        attach(&mut record, DataKind::Reference, &[3.0, 6.0], 1.0);

        assert_eq!(record.background_subtract(false), StepOutcome::Applied);
        assert_eq!(record.signal_subtracted.as_ref().unwrap().row(0), &[9.0, 18.0]);

        // No ref background present: skipped, flag stays unset.
        assert_eq!(
            record.ref_background_subtract(false),
            StepOutcome::Skipped(SkipReason::MissingArray(DataKind::ReferenceBackground))
        );
        assert!(!record
            .corrections
            .contains(Correction::RefBackgroundSubtracted));

        // Normalization falls back to the raw reference.
        assert_eq!(record.normalize(false), StepOutcome::Applied);
        assert_eq!(record.signal_normalized.as_ref().unwrap().row(0), &[3.0, 3.0]);
    }

    #[test]
    fn test_normalize_without_reference_is_skipped() {
        let mut record = record_with(&[1.0]);
        assert_eq!(
            record.normalize(false),
            StepOutcome::Skipped(SkipReason::MissingReference)
        );
        assert!(record.signal_normalized.is_none());
    }

    #[test]
    fn test_cosmic_filter_narrow_spike_interpolated() {
        // Width-2 spike at indices 3 and 4, max_width 4.
        let mut row = vec![1.0, 1.0, 1.0, 9.0, 9.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let replaced = cosmic_ray_filter(&mut row, 0.5, 4);
        assert_eq!(replaced, 2);
        // Replaced values lie on the line between row[2] (1.0) and row[5] (1.0).
        assert!((row[3] - 1.0).abs() < 1e-12);
        assert!((row[4] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cosmic_filter_wide_feature_untouched() {
        // Width-3 feature with max_width 3 is real signal.
        let mut row = vec![1.0, 1.0, 9.0, 9.0, 9.0, 1.0, 1.0, 1.0, 1.0];
        let before = row.clone();
        let replaced = cosmic_ray_filter(&mut row, 0.5, 3);
        assert_eq!(replaced, 0);
        assert_eq!(row, before);
    }

    #[test]
    fn test_cosmic_filter_sloped_interpolation() {
        let mut row = vec![2.0, 50.0, 4.0, 2.0, 2.0, 2.0, 2.0, 2.0];
        let replaced = cosmic_ray_filter(&mut row, 1.0, 3);
        assert_eq!(replaced, 1);
        // Single sample replaced by the midpoint of row[0] and row[2].
        assert!((row[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_process_order_and_report() {
        let mut record = record_with(&[10.0, 20.0]);
        attach(&mut record, DataKind::Background, &[2.0, 2.0], 1.0);
        attach(&mut record, DataKind::Reference, &[2.0, 2.0], 1.0);
        attach(&mut record, DataKind::ReferenceBackground, &[1.0, 1.0], 1.0);

        let options = ProcessOptions {
            subtract: true,
            normalize: true,
            downconvert: true,
            upconversion_nm: Some(800.0),
            ..Default::default()
        };
        let report = process_record(&mut record, &options);

        assert_eq!(
            report.outcome(Correction::BackgroundSubtracted),
            Some(&StepOutcome::Applied)
        );
        assert_eq!(
            report.outcome(Correction::RefBackgroundSubtracted),
            Some(&StepOutcome::Applied)
        );
        assert_eq!(
            report.outcome(Correction::Normalized),
            Some(&StepOutcome::Applied)
        );
        assert_eq!(
            report.outcome(Correction::Downconverted),
            Some(&StepOutcome::Applied)
        );
        // Calibration was not enabled, so it produced no entry at all.
        assert_eq!(report.outcome(Correction::Calibrated), None);

        // (10-2)/(2-1), (20-2)/(2-1)
        assert_eq!(
            record.signal_normalized.as_ref().unwrap().row(0),
            &[8.0, 18.0]
        );

        // Running the same non-forced pipeline again changes nothing.
        let again = process_record(&mut record, &options);
        assert_eq!(
            again.outcome(Correction::Normalized),
            Some(&StepOutcome::AlreadyApplied)
        );
        assert_eq!(
            record.signal_normalized.as_ref().unwrap().row(0),
            &[8.0, 18.0]
        );
    }

    #[test]
    fn test_downconvert_without_wavelength_is_reported() {
        let mut record = record_with(&[1.0]);
        let options = ProcessOptions {
            downconvert: true,
            ..Default::default()
        };
        let report = process_record(&mut record, &options);
        assert_eq!(
            report.outcome(Correction::Downconverted),
            Some(&StepOutcome::Skipped(SkipReason::MissingSetting(
                "upconversion_nm"
            )))
        );
    }
}
