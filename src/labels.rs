//! Conversions between dense output vectors and sparse class labels.
//!
//! These are used at the training boundary only (building targets, scoring predictions);
//! layer math never sees sparse labels.

use crate::{Error, Result};

/// Index of the largest value; the first one wins on ties.
///
/// Returns `None` for an empty slice.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Fill `out` with `low` everywhere except `out[label] = high`.
pub fn one_hot(label: usize, out: &mut [f32], low: f32, high: f32) -> Result<()> {
    labels_to_dense(&[label], out, low, high)
}

/// Indices whose value is at least `threshold`.
pub fn threshold_labels(values: &[f32], threshold: f32) -> Vec<usize> {
    values
        .iter()
        .enumerate()
        .filter(|&(_, &v)| v >= threshold)
        .map(|(i, _)| i)
        .collect()
}

/// Fill `out` with `low` except at every index in `labels`, which gets `high`.
pub fn labels_to_dense(labels: &[usize], out: &mut [f32], low: f32, high: f32) -> Result<()> {
    out.fill(low);
    for &label in labels {
        let len = out.len();
        let slot = out.get_mut(label).ok_or_else(|| {
            Error::InvalidData(format!("label {label} out of range for {len} outputs"))
        })?;
        *slot = high;
    }
    Ok(())
}

/// Fraction of output positions where predicted and expected class membership agree.
///
/// Expected classes are the positions with `expected >= 0.5`. When there is more than one,
/// predicted classes are thresholded the same way; otherwise the predicted class is the
/// argmax of `predicted`.
pub fn accuracy(predicted: &[f32], expected: &[f32]) -> f32 {
    debug_assert_eq!(predicted.len(), expected.len());
    if expected.is_empty() {
        return 0.0;
    }
    const THRESHOLD: f32 = 0.5;

    let multi_label = expected.iter().filter(|&&e| e >= THRESHOLD).nth(1).is_some();
    let matches = if multi_label {
        expected
            .iter()
            .zip(predicted)
            .filter(|&(&e, &p)| (e >= THRESHOLD) == (p >= THRESHOLD))
            .count()
    } else {
        let best = argmax(predicted);
        expected
            .iter()
            .enumerate()
            .filter(|&(i, &e)| (e >= THRESHOLD) == (best == Some(i)))
            .count()
    };
    matches as f32 / expected.len() as f32
}
