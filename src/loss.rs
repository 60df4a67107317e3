//! Loss functions.
//!
//! A [`LossState`] is used in two steps per sample:
//!
//! - `forward(pred, target)` computes the scalar loss and keeps the per-element terms the
//!   derivative needs in two scratch buffers
//! - `backward(len)` turns those scratch terms into `dL/d(pred)` without looking at
//!   `pred`/`target` again
//!
//! Every logarithm and every division that could hit zero is guarded with [`EPSILON`].

use crate::{EPSILON, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Supported loss functions.
pub enum Loss {
    /// Mean squared error.
    Mse,
    /// Mean squared logarithmic error.
    Msle,
    /// Root mean squared logarithmic error.
    Rmsle,
    /// Mean absolute error.
    Mae,
    /// Binary cross-entropy on probabilities in `(0, 1)`.
    BinaryCrossEntropy,
    /// Categorical cross-entropy on a probability vector (usually a softmax output).
    ///
    /// The value is summed over classes, not averaged.
    CategoricalCrossEntropy,
}

impl Loss {
    pub fn id(self) -> u8 {
        match self {
            Loss::Mse => 0,
            Loss::Msle => 1,
            Loss::Rmsle => 2,
            Loss::Mae => 3,
            Loss::BinaryCrossEntropy => 4,
            Loss::CategoricalCrossEntropy => 5,
        }
    }
}

impl TryFrom<u8> for Loss {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        Ok(match id {
            0 => Loss::Mse,
            1 => Loss::Msle,
            2 => Loss::Rmsle,
            3 => Loss::Mae,
            4 => Loss::BinaryCrossEntropy,
            5 => Loss::CategoricalCrossEntropy,
            other => return Err(Error::UnsupportedLoss(other)),
        })
    }
}

/// A loss function bound to its output and scratch buffers.
///
/// `output()` holds the scalar loss at index 0 after `forward` and the gradient after
/// `backward`.
#[derive(Debug, Clone)]
pub struct LossState {
    loss: Loss,
    value: f32,
    output: Vec<f32>,
    scratch_a: Option<Vec<f32>>,
    scratch_b: Option<Vec<f32>>,
}

impl LossState {
    pub fn new(loss: Loss) -> Self {
        Self {
            loss,
            value: 0.0,
            output: Vec::new(),
            scratch_a: None,
            scratch_b: None,
        }
    }

    #[inline]
    pub fn loss(&self) -> Loss {
        self.loss
    }

    /// Loss computed by the most recent `forward`.
    #[inline]
    pub fn value(&self) -> f32 {
        self.value
    }

    #[inline]
    pub fn output(&self) -> &[f32] {
        &self.output
    }

    /// Compute the loss of `predicted` against `expected`.
    pub fn forward(&mut self, predicted: &[f32], expected: &[f32]) -> Result<f32> {
        if predicted.len() != expected.len() || predicted.is_empty() {
            return Err(Error::InvalidData(format!(
                "predicted len {} does not match expected len {}",
                predicted.len(),
                expected.len()
            )));
        }
        let len = predicted.len();
        let n = len as f32;

        self.output.clear();
        self.output.resize(len, 0.0);
        let a = self.scratch_a.get_or_insert_with(Vec::new);
        let b = self.scratch_b.get_or_insert_with(Vec::new);
        a.resize(len, 0.0);
        b.resize(len, 0.0);

        let value = match self.loss {
            Loss::Mse => {
                for i in 0..len {
                    a[i] = expected[i] - predicted[i];
                }
                a.iter().map(|d| d * d).sum::<f32>() / n
            }
            Loss::Msle | Loss::Rmsle => {
                for i in 0..len {
                    a[i] = predicted[i] + 1.0;
                    b[i] = (expected[i] + 1.0 + EPSILON).ln() - (a[i] + EPSILON).ln();
                }
                let msle = b.iter().map(|d| d * d).sum::<f32>() / n;
                if self.loss == Loss::Rmsle {
                    msle.sqrt()
                } else {
                    msle
                }
            }
            Loss::Mae => {
                for i in 0..len {
                    a[i] = expected[i] - predicted[i];
                    b[i] = a[i].abs();
                }
                b.iter().sum::<f32>() / n
            }
            Loss::BinaryCrossEntropy => {
                a.copy_from_slice(predicted);
                b.copy_from_slice(expected);
                let sum: f32 = predicted
                    .iter()
                    .zip(expected)
                    .map(|(&p, &e)| e * (p + EPSILON).ln() + (1.0 - e) * (1.0 - p + EPSILON).ln())
                    .sum();
                -sum / n
            }
            Loss::CategoricalCrossEntropy => {
                a.copy_from_slice(predicted);
                b.copy_from_slice(expected);
                -predicted
                    .iter()
                    .zip(expected)
                    .map(|(&p, &e)| e * (p + EPSILON).ln())
                    .sum::<f32>()
            }
        };

        self.value = value;
        self.output[0] = value;
        Ok(value)
    }

    /// Overwrite the output buffer with `dL/d(pred)` for the last `forward`.
    pub fn backward(&mut self, len: usize) -> Result<&[f32]> {
        let (a, b) = match (self.scratch_a.as_ref(), self.scratch_b.as_ref()) {
            (Some(a), Some(b)) if a.len() >= len && b.len() >= len && len > 0 => (a, b),
            _ => return Err(Error::MissingLossScratch),
        };
        let n = len as f32;
        self.output.resize(len, 0.0);
        let out = &mut self.output[..len];

        match self.loss {
            Loss::Mse => {
                for i in 0..len {
                    out[i] = -2.0 * a[i] / n;
                }
            }
            Loss::Msle => {
                for i in 0..len {
                    out[i] = -2.0 / n * b[i] / (a[i] + EPSILON);
                }
            }
            Loss::Rmsle => {
                let denom = 2.0 * self.value + EPSILON;
                for i in 0..len {
                    out[i] = -2.0 / n * b[i] / (a[i] + EPSILON) / denom;
                }
            }
            Loss::Mae => {
                for i in 0..len {
                    out[i] = -1.0 / n * a[i] / (b[i] + EPSILON);
                }
            }
            Loss::BinaryCrossEntropy => {
                for i in 0..len {
                    let p = a[i];
                    out[i] = 1.0 / n * (p - b[i]) / (p - p * p + EPSILON);
                }
            }
            Loss::CategoricalCrossEntropy => {
                for i in 0..len {
                    out[i] = -b[i] / (a[i] + EPSILON);
                }
            }
        }
        Ok(&self.output[..len])
    }

    pub fn estimate_size(&self) -> usize {
        let f = std::mem::size_of::<f32>();
        std::mem::size_of::<Self>()
            + self.output.capacity() * f
            + self.scratch_a.as_ref().map_or(0, |v| v.capacity() * f)
            + self.scratch_b.as_ref().map_or(0, |v| v.capacity() * f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Loss; 6] = [
        Loss::Mse,
        Loss::Msle,
        Loss::Rmsle,
        Loss::Mae,
        Loss::BinaryCrossEntropy,
        Loss::CategoricalCrossEntropy,
    ];

    fn value(loss: Loss, pred: &[f32], target: &[f32]) -> f32 {
        LossState::new(loss).forward(pred, target).unwrap()
    }

    #[test]
    fn backward_matches_finite_differences() {
        let pred = [0.1_f32, 0.5, 0.2, 0.9, 0.4, 0.7];
        let target = [0.0_f32, 0.0, 0.0, 1.0, 0.0, 1.0];
        let h = 1e-3_f32;

        for loss in ALL {
            let mut state = LossState::new(loss);
            state.forward(&pred, &target).unwrap();
            let grad = state.backward(pred.len()).unwrap().to_vec();

            for i in 0..pred.len() {
                let mut plus = pred;
                let mut minus = pred;
                plus[i] += h;
                minus[i] -= h;
                let numeric =
                    (value(loss, &plus, &target) - value(loss, &minus, &target)) / (2.0 * h);
                assert!(
                    (numeric - grad[i]).abs() < 0.01,
                    "{loss:?}[{i}]: analytic={} numeric={numeric}",
                    grad[i]
                );
            }
        }
    }

    #[test]
    fn known_values() {
        let pred = [0.0_f32, 0.5];
        let target = [1.0_f32, 0.5];
        assert!((value(Loss::Mse, &pred, &target) - 0.5).abs() < 1e-6);
        assert!((value(Loss::Mae, &pred, &target) - 0.5).abs() < 1e-6);

        let cce = value(Loss::CategoricalCrossEntropy, &[0.25, 0.75], &[0.0, 1.0]);
        assert!((cce + 0.75_f32.ln()).abs() < 1e-6);

        let msle = value(Loss::Msle, &[0.0], &[1.0]);
        let rmsle = value(Loss::Rmsle, &[0.0], &[1.0]);
        assert!((msle - 2.0_f32.ln().powi(2)).abs() < 1e-5);
        assert!((rmsle - msle.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn forward_writes_value_at_index_zero() {
        let mut state = LossState::new(Loss::Mse);
        state.forward(&[1.0, 2.0, 3.0], &[1.0, 2.0, 5.0]).unwrap();
        assert_eq!(state.output().len(), 3);
        assert!((state.output()[0] - 4.0 / 3.0).abs() < 1e-6);
        assert_eq!(&state.output()[1..], &[0.0, 0.0]);
    }

    #[test]
    fn backward_before_forward_fails() {
        let mut state = LossState::new(Loss::Mae);
        assert_eq!(state.backward(3).err(), Some(Error::MissingLossScratch));
    }

    #[test]
    fn length_mismatch_is_invalid_data() {
        let mut state = LossState::new(Loss::Mse);
        assert!(matches!(
            state.forward(&[1.0], &[1.0, 2.0]),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn ids_round_trip_and_unknown_fails() {
        for loss in ALL {
            assert_eq!(Loss::try_from(loss.id()), Ok(loss));
        }
        assert_eq!(Loss::try_from(6), Err(Error::UnsupportedLoss(6)));
    }
}
