//! Signal/background/reference file matching
//!
//! Batches arrive as four unmatched filename lists. Backgrounds are paired
//! with signals by name first (a background whose name equals the signal's
//! once the background marker is stripped belongs to it), falling back to
//! the file whose modification time is nearest. References have no naming
//! convention, so they are matched purely by nearest modification time and
//! carry an identifier assigned at discovery; the reference background is
//! whichever background was already matched to that reference.
//!
//! Modification-time matching is inherently fragile: copy and sync
//! operations rewrite mtimes, and nothing here can detect that. It is kept
//! because it is the established convention for these batches, not because
//! it is robust.

use std::path::Path;
use std::time::SystemTime;

use log::debug;

use crate::record::file_mtime;

/// Errors raised while matching a batch's filename lists.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// A required candidate list was empty; the batch cannot be matched.
    #[error("no candidate {0} files to match against")]
    NoCandidateFiles(&'static str),

    /// I/O error resolving a file's modification time
    #[error("I/O error reading timestamps: {0}")]
    Io(#[from] std::io::Error),
}

fn abs_diff(a: SystemTime, b: SystemTime) -> std::time::Duration {
    a.duration_since(b)
        .unwrap_or_else(|e| e.duration())
}

/// The candidate whose modification time is nearest the target's.
pub fn closest_file<'a>(
    dir: &Path,
    candidates: &'a [String],
    target: &str,
) -> Result<&'a str, MatchError> {
    let target_time = file_mtime(&dir.join(target))?;
    let mut best: Option<(&str, std::time::Duration)> = None;
    for name in candidates {
        let time = file_mtime(&dir.join(name))?;
        let diff = abs_diff(time, target_time);
        if best.map_or(true, |(_, d)| diff < d) {
            best = Some((name, diff));
        }
    }
    best.map(|(name, _)| name)
        .ok_or(MatchError::NoCandidateFiles("timestamp"))
}

/// Pair each target file with a background file.
///
/// Name matching wins: a background whose name equals the target's once
/// `bg_marker` is removed is its background, timestamps never consulted.
/// Targets left over fall back to the nearest-mtime background. The same
/// procedure pairs references with reference backgrounds.
pub fn match_with_background(
    targets: &[String],
    backgrounds: &[String],
    dir: &Path,
    bg_marker: &str,
    kind: &'static str,
) -> Result<Vec<String>, MatchError> {
    if backgrounds.is_empty() {
        return Err(MatchError::NoCandidateFiles(kind));
    }

    let mut matched: Vec<Option<String>> = vec![None; targets.len()];
    for (i, target) in targets.iter().enumerate() {
        for bg in backgrounds {
            if bg.replace(bg_marker, "") == *target {
                debug!("matched {target} with {bg} by name");
                matched[i] = Some(bg.clone());
                break;
            }
        }
    }

    for (i, slot) in matched.iter_mut().enumerate() {
        if slot.is_none() {
            let bg = closest_file(dir, backgrounds, &targets[i])?;
            debug!("matched {} with {bg} by timestamp", targets[i]);
            *slot = Some(bg.to_string());
        }
    }

    Ok(matched.into_iter().map(|m| m.unwrap()).collect())
}

/// Resolve the reference identifier each signal file should use, by
/// nearest modification time.
pub fn match_with_reference(
    signals: &[String],
    references: &[String],
    ref_ids: &[usize],
    dir: &Path,
) -> Result<Vec<usize>, MatchError> {
    if references.is_empty() {
        return Err(MatchError::NoCandidateFiles("reference"));
    }

    let mut sig_ref_ids = Vec::with_capacity(signals.len());
    for signal in signals {
        let reference = closest_file(dir, references, signal)?;
        let pos = references
            .iter()
            .position(|r| r == reference)
            .expect("closest_file returns a member of the candidate list");
        sig_ref_ids.push(ref_ids[pos]);
    }
    Ok(sig_ref_ids)
}

/// Expand resolved reference ids into per-signal reference lists.
pub fn matched_ref_lists(
    sig_ref_ids: &[usize],
    references: &[String],
    ref_backgrounds: &[String],
    ref_ids: &[usize],
) -> (Vec<String>, Vec<String>, Vec<usize>) {
    let mut refs = Vec::with_capacity(sig_ref_ids.len());
    let mut refbgs = Vec::with_capacity(sig_ref_ids.len());
    let mut nums = Vec::with_capacity(sig_ref_ids.len());
    for id in sig_ref_ids {
        let pos = ref_ids
            .iter()
            .position(|r| r == id)
            .expect("signal ref ids come from the reference id list");
        refs.push(references[pos].clone());
        refbgs.push(ref_backgrounds[pos].clone());
        nums.push(pos + 1);
    }
    (refs, refbgs, nums)
}
