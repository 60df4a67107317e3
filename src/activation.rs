//! Activation functions.
//!
//! Activations run in place over a layer's output buffer. The forward pass stores whatever
//! it needs for the derivative in a per-layer cache (the raw input for piecewise functions,
//! an intermediate denominator for softsign/swish). The backward pass then overwrites the
//! same buffer with the derivative, computed either from that cache or from the activated
//! values already in the buffer (e.g. `sigmoid'(x) = y * (1 - y)`). The raw pre-activation
//! input is never needed again.
//!
//! Softmax is the exception to "element-wise": its backward pass writes the full `n x n`
//! Jacobian (row-major) into the buffer, which therefore must hold `n * n` values.

use crate::bit_mask::BitMask;
use crate::{EPSILON, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Activation function and its hyperparameters.
pub enum Activation {
    /// `alpha * x + constant`.
    Linear { alpha: f32, constant: f32 },
    /// `x` for `x >= 0`, `leak * x` otherwise. `leak = 0` is the plain ReLU.
    LeakyReLU { leak: f32 },
    /// Exponential linear unit: `alpha * (e^x - 1)` for `x < 0`.
    Elu { alpha: f32 },
    /// `x / (|x| + 1)`.
    Softsign,
    Sigmoid,
    /// Piecewise linear sigmoid: `0.2 * x + 0.5` clamped to `[0, 1]`.
    HardSigmoid,
    /// `beta * x * sigmoid(x)` (E-swish; `beta = 1` is the plain swish).
    Swish { beta: f32 },
    Softmax,
    Tanh,
}

impl Activation {
    pub const LINEAR: Self = Activation::Linear {
        alpha: 1.0,
        constant: 0.0,
    };
    pub const RELU: Self = Activation::LeakyReLU { leak: 0.0 };

    /// Numeric id of the function (stable across releases).
    pub fn id(self) -> u8 {
        match self {
            Activation::Linear { .. } => 0,
            Activation::LeakyReLU { .. } => 1,
            Activation::Elu { .. } => 2,
            Activation::Softsign => 3,
            Activation::Sigmoid => 4,
            Activation::HardSigmoid => 5,
            Activation::Swish { .. } => 6,
            Activation::Softmax => 7,
            Activation::Tanh => 8,
        }
    }

    /// Validate activation parameters.
    pub fn validate(self) -> Result<()> {
        let finite = |name: &str, v: f32| {
            if v.is_finite() {
                Ok(())
            } else {
                Err(Error::InvalidConfig(format!(
                    "{name} must be finite, got {v}"
                )))
            }
        };
        match self {
            Activation::Linear { alpha, constant } => {
                finite("linear alpha", alpha)?;
                finite("linear constant", constant)
            }
            Activation::LeakyReLU { leak } => finite("relu leak", leak),
            Activation::Elu { alpha } => finite("elu alpha", alpha),
            Activation::Swish { beta } => finite("swish beta", beta),
            Activation::Softsign
            | Activation::Sigmoid
            | Activation::HardSigmoid
            | Activation::Softmax
            | Activation::Tanh => Ok(()),
        }
    }

    /// Length of the output buffer a layer needs for `len` activated values.
    pub fn buffer_len(self, len: usize) -> usize {
        match self {
            Activation::Softmax => len * len,
            _ => len,
        }
    }
}

impl TryFrom<u8> for Activation {
    type Error = Error;

    /// Map a numeric id to an activation with default hyperparameters.
    fn try_from(id: u8) -> Result<Self> {
        Ok(match id {
            0 => Activation::LINEAR,
            1 => Activation::LeakyReLU { leak: 0.01 },
            2 => Activation::Elu { alpha: 0.01 },
            3 => Activation::Softsign,
            4 => Activation::Sigmoid,
            5 => Activation::HardSigmoid,
            6 => Activation::Swish { beta: 1.0 },
            7 => Activation::Softmax,
            8 => Activation::Tanh,
            other => return Err(Error::UnsupportedActivation(other)),
        })
    }
}

/// An activation bound to a layer, plus its derivative cache.
#[derive(Debug, Clone)]
pub struct ActivationState {
    activation: Activation,
    cache: Option<Vec<f32>>,
}

impl ActivationState {
    pub fn new(activation: Activation) -> Self {
        Self {
            activation,
            cache: None,
        }
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// Apply the activation in place over `buf`, skipping indices marked in `mask`.
    pub fn forward(&mut self, buf: &mut [f32], mask: Option<&BitMask>) -> Result<()> {
        let len = buf.len();
        check_mask(mask, len)?;

        let cache = self.cache.get_or_insert_with(Vec::new);
        if cache.len() < len {
            cache.resize(len, 0.0);
        }
        let live = |i: usize| mask.is_none_or(|m| !m.contains(i));

        match self.activation {
            Activation::Linear { alpha, constant } => {
                for (i, x) in buf.iter_mut().enumerate() {
                    if live(i) {
                        *x = alpha * *x + constant;
                    }
                }
            }
            Activation::LeakyReLU { leak } => {
                for (i, x) in buf.iter_mut().enumerate() {
                    if live(i) {
                        cache[i] = *x;
                        if *x < 0.0 {
                            *x = if leak == 0.0 { 0.0 } else { *x * leak };
                        }
                    }
                }
            }
            Activation::Elu { alpha } => {
                for (i, x) in buf.iter_mut().enumerate() {
                    if live(i) {
                        cache[i] = *x;
                        if *x < 0.0 {
                            *x = alpha * (x.exp() - 1.0);
                        }
                    }
                }
            }
            Activation::Softsign => {
                for (i, x) in buf.iter_mut().enumerate() {
                    if live(i) {
                        cache[i] = x.abs() + 1.0;
                        *x /= cache[i] + EPSILON;
                    }
                }
            }
            Activation::Sigmoid => {
                for (i, x) in buf.iter_mut().enumerate() {
                    if live(i) {
                        *x = sigmoid(*x);
                    }
                }
            }
            Activation::HardSigmoid => {
                for (i, x) in buf.iter_mut().enumerate() {
                    if live(i) {
                        cache[i] = *x;
                        *x = hard_sigmoid(*x);
                    }
                }
            }
            Activation::Swish { beta } => {
                for (i, x) in buf.iter_mut().enumerate() {
                    if live(i) {
                        cache[i] = 1.0 + (-*x).exp();
                        *x = *x * beta / (cache[i] + EPSILON);
                    }
                }
            }
            Activation::Softmax => {
                // Shift by the max so the largest exponent is e^0.
                let max = buf.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let mut sum = 0.0_f32;
                for (i, x) in buf.iter_mut().enumerate() {
                    if live(i) {
                        *x = (*x - max).exp();
                        sum += *x;
                    }
                }
                let denom = sum + EPSILON;
                for (i, x) in buf.iter_mut().enumerate() {
                    if live(i) {
                        *x /= denom;
                    }
                }
            }
            Activation::Tanh => {
                for (i, x) in buf.iter_mut().enumerate() {
                    if live(i) {
                        *x = x.tanh();
                    }
                }
            }
        }
        Ok(())
    }

    /// Overwrite the first `len` activated values in `buf` with the derivative.
    ///
    /// For softmax, `buf` must hold `len * len` values and receives the Jacobian
    /// `J[r * len + c] = dy_r / dx_c`; the mask is ignored.
    pub fn backward(&mut self, buf: &mut [f32], len: usize, mask: Option<&BitMask>) -> Result<()> {
        let cache = match self.cache.as_mut() {
            Some(cache) if cache.len() >= len => cache,
            _ => return Err(Error::MissingActivationCache),
        };
        check_mask(mask, len)?;
        if buf.len() < self.activation.buffer_len(len) {
            return Err(Error::InvalidData(format!(
                "activation buffer holds {} values, {} required",
                buf.len(),
                self.activation.buffer_len(len)
            )));
        }
        let live = |i: usize| mask.is_none_or(|m| !m.contains(i));

        match self.activation {
            Activation::Linear { alpha, .. } => {
                for (i, y) in buf[..len].iter_mut().enumerate() {
                    if live(i) {
                        *y = alpha;
                    }
                }
            }
            Activation::LeakyReLU { leak } => {
                for (i, y) in buf[..len].iter_mut().enumerate() {
                    if live(i) {
                        *y = if cache[i] < 0.0 { leak } else { 1.0 };
                    }
                }
            }
            Activation::Elu { alpha } => {
                for (i, y) in buf[..len].iter_mut().enumerate() {
                    if live(i) {
                        *y = if cache[i] < 0.0 { *y + alpha } else { 1.0 };
                    }
                }
            }
            Activation::Softsign => {
                for (i, y) in buf[..len].iter_mut().enumerate() {
                    if live(i) {
                        *y = 1.0 / (cache[i] * cache[i] + EPSILON);
                    }
                }
            }
            Activation::Sigmoid => {
                for (i, y) in buf[..len].iter_mut().enumerate() {
                    if live(i) {
                        *y *= 1.0 - *y;
                    }
                }
            }
            Activation::HardSigmoid => {
                for (i, y) in buf[..len].iter_mut().enumerate() {
                    if live(i) {
                        *y = if (-2.5..=2.5).contains(&cache[i]) {
                            0.2
                        } else {
                            0.0
                        };
                    }
                }
            }
            Activation::Swish { beta } => {
                for (i, y) in buf[..len].iter_mut().enumerate() {
                    if live(i) {
                        *y += (beta - *y) / (cache[i] + EPSILON);
                    }
                }
            }
            Activation::Softmax => {
                cache[..len].copy_from_slice(&buf[..len]);
                for r in 0..len {
                    for c in 0..len {
                        let delta = if r == c { 1.0 } else { 0.0 };
                        buf[r * len + c] = cache[r] * (delta - cache[c]);
                    }
                }
            }
            Activation::Tanh => {
                for (i, y) in buf[..len].iter_mut().enumerate() {
                    if live(i) {
                        *y = 1.0 - *y * *y;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn estimate_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self
                .cache
                .as_ref()
                .map_or(0, |c| c.capacity() * std::mem::size_of::<f32>())
    }
}

fn check_mask(mask: Option<&BitMask>, len: usize) -> Result<()> {
    match mask {
        Some(m) if len > m.len() => Err(Error::MaskOutOfBounds {
            index: len - 1,
            len: m.len(),
        }),
        _ => Ok(()),
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

#[inline]
fn hard_sigmoid(x: f32) -> f32 {
    if x < -2.5 {
        0.0
    } else if x > 2.5 {
        1.0
    } else {
        0.2 * x + 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XS: [f32; 5] = [-2.0, -1.0, 0.0, 1.0, 2.0];

    fn element_wise() -> Vec<Activation> {
        vec![
            Activation::Linear {
                alpha: 0.5,
                constant: 1.0,
            },
            Activation::LeakyReLU { leak: 0.1 },
            Activation::Elu { alpha: 0.1 },
            Activation::Softsign,
            Activation::Sigmoid,
            Activation::HardSigmoid,
            Activation::Swish { beta: 2.0 },
            Activation::Tanh,
        ]
    }

    fn run_forward(act: Activation, xs: &[f32]) -> Vec<f32> {
        let mut buf = xs.to_vec();
        ActivationState::new(act).forward(&mut buf, None).unwrap();
        buf
    }

    #[test]
    fn backward_matches_finite_differences() {
        let h = 1e-3_f32;
        for act in element_wise() {
            let mut state = ActivationState::new(act);
            let mut buf = XS.to_vec();
            state.forward(&mut buf, None).unwrap();
            state.backward(&mut buf, XS.len(), None).unwrap();

            let shifted: Vec<f32> = XS.iter().map(|x| x + h).collect();
            let y0 = run_forward(act, &XS);
            let y1 = run_forward(act, &shifted);
            for i in 0..XS.len() {
                let numeric = (y1[i] - y0[i]) / h;
                assert!(
                    (numeric - buf[i]).abs() < 0.01,
                    "{act:?} at x={}: analytic={} numeric={numeric}",
                    XS[i],
                    buf[i]
                );
            }
        }
    }

    #[test]
    fn softmax_jacobian_matches_reference() {
        #[rustfmt::skip]
        let reference = [
            0.011_520_364, -0.000_369_326_76, -0.001_003_934_2, -0.002_728_976, -0.007_418_126,
            -0.000_369_326_76, 0.030_680_986, -0.002_728_975_8, -0.007_418_126, -0.020_164_557,
            -0.001_003_934_2, -0.002_728_975_8, 0.078_710_415, -0.020_164_557, -0.054_812_945,
            -0.002_728_976, -0.007_418_126, -0.020_164_557, 0.179_308_7, -0.148_997_04,
            -0.007_418_126, -0.020_164_557, -0.054_812_945, -0.148_997_04, 0.231_392_68_f32,
        ];

        let n = 5;
        let mut state = ActivationState::new(Activation::Softmax);
        let mut buf = vec![0.0_f32; Activation::Softmax.buffer_len(n)];
        buf[..n].copy_from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        state.forward(&mut buf[..n], None).unwrap();

        let sum: f32 = buf[..n].iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);

        state.backward(&mut buf, n, None).unwrap();
        for (i, (&got, &want)) in buf.iter().zip(reference.iter()).enumerate() {
            assert!((got - want).abs() < 1e-5, "J[{i}] = {got}, expected {want}");
        }
    }

    #[test]
    fn softmax_is_shift_invariant_and_stable() {
        let a = run_forward(Activation::Softmax, &[1.0, 2.0, 3.0]);
        let b = run_forward(Activation::Softmax, &[1001.0, 1002.0, 1003.0]);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6);
            assert!(y.is_finite());
        }
    }

    #[test]
    fn backward_before_forward_fails() {
        let mut state = ActivationState::new(Activation::Tanh);
        let mut buf = [0.5_f32; 3];
        assert_eq!(
            state.backward(&mut buf, 3, None),
            Err(Error::MissingActivationCache)
        );
    }

    #[test]
    fn masked_indices_are_untouched() {
        let mut mask = BitMask::new(4);
        mask.set(1).unwrap();
        let mut state = ActivationState::new(Activation::Sigmoid);
        let mut buf = [0.0_f32, 7.0, 0.0, 0.0];
        state.forward(&mut buf, Some(&mask)).unwrap();
        assert_eq!(buf[1], 7.0);
        assert_eq!(buf[0], 0.5);

        state.backward(&mut buf, 4, Some(&mask)).unwrap();
        assert_eq!(buf[1], 7.0);
        assert_eq!(buf[0], 0.25);
    }

    #[test]
    fn short_mask_is_rejected() {
        let mask = BitMask::new(2);
        let mut state = ActivationState::new(Activation::Tanh);
        let mut buf = [0.0_f32; 3];
        assert!(matches!(
            state.forward(&mut buf, Some(&mask)),
            Err(Error::MaskOutOfBounds { .. })
        ));
    }

    #[test]
    fn ids_round_trip_and_unknown_fails() {
        for id in 0..=8_u8 {
            assert_eq!(Activation::try_from(id).unwrap().id(), id);
        }
        assert_eq!(
            Activation::try_from(9),
            Err(Error::UnsupportedActivation(9))
        );
    }

    #[test]
    fn validate_rejects_non_finite_parameters() {
        assert!(Activation::Swish { beta: f32::NAN }.validate().is_err());
        assert!(Activation::LeakyReLU { leak: f32::INFINITY }.validate().is_err());
        assert!(Activation::RELU.validate().is_ok());
    }
}
