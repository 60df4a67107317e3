//! Optimizers.
//!
//! An [`Optimizer`] is a plain description of an update rule. The per-parameter state it
//! needs (velocity, squared-gradient averages, Adam moments) lives in an [`OptimizerState`]
//! owned by each weight store and is allocated on the first update.
//!
//! Applying a rule never touches the gradient buffer; resetting it is a separate step
//! (see [`crate::Weights::zero_grad`]).

use crate::{EPSILON, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Optimizer choice for training.
pub enum Optimizer {
    /// SGD with optional momentum: `v = momentum * v - lr * g; w += v`.
    ///
    /// `momentum = 0` is plain SGD.
    Sgd { momentum: f32 },
    /// RMSProp: `v = beta * v + (1 - beta) * g^2; w -= lr * g / (sqrt(v) + eps)`.
    RmsProp { beta: f32 },
    /// AdaGrad: `c += g^2; w -= lr * g / (sqrt(c) + eps)`.
    AdaGrad,
    /// Adam with bias-corrected moments.
    Adam { beta1: f32, beta2: f32 },
}

impl Default for Optimizer {
    fn default() -> Self {
        Optimizer::Sgd { momentum: 0.0 }
    }
}

impl Optimizer {
    pub fn id(self) -> u8 {
        match self {
            Optimizer::Sgd { .. } => 0,
            Optimizer::RmsProp { .. } => 1,
            Optimizer::AdaGrad => 2,
            Optimizer::Adam { .. } => 3,
        }
    }

    /// Validate optimizer hyperparameters.
    pub fn validate(self) -> Result<()> {
        let unit = |name: &str, v: f32| {
            if v.is_finite() && (0.0..1.0).contains(&v) {
                Ok(())
            } else {
                Err(Error::InvalidConfig(format!(
                    "{name} must be finite and in [0,1), got {v}"
                )))
            }
        };
        match self {
            Optimizer::Sgd { momentum } => unit("momentum", momentum),
            Optimizer::RmsProp { beta } => unit("rmsprop beta", beta),
            Optimizer::AdaGrad => Ok(()),
            Optimizer::Adam { beta1, beta2 } => {
                unit("adam beta1", beta1)?;
                unit("adam beta2", beta2)
            }
        }
    }

    /// Apply one update to `params` from `grads`.
    ///
    /// `state` must have been created for `params.len()` values.
    pub(crate) fn apply(
        self,
        lr: f32,
        params: &mut [f32],
        grads: &[f32],
        state: &mut OptimizerState,
    ) -> Result<()> {
        self.validate()?;
        if !(lr.is_finite() && lr > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be finite and > 0, got {lr}"
            )));
        }
        debug_assert_eq!(params.len(), grads.len());
        debug_assert_eq!(params.len(), state.first.len());

        match self {
            Optimizer::Sgd { momentum } => {
                if momentum > 0.0 {
                    for ((w, &g), v) in params.iter_mut().zip(grads).zip(&mut state.first) {
                        *v = momentum * *v - lr * g;
                        *w += *v;
                    }
                } else {
                    for (w, &g) in params.iter_mut().zip(grads) {
                        *w -= lr * g;
                    }
                }
            }
            Optimizer::RmsProp { beta } => {
                for ((w, &g), v) in params.iter_mut().zip(grads).zip(&mut state.second) {
                    *v = beta * *v + (1.0 - beta) * g * g;
                    *w -= lr / (v.sqrt() + EPSILON) * g;
                }
            }
            Optimizer::AdaGrad => {
                for ((w, &g), c) in params.iter_mut().zip(grads).zip(&mut state.second) {
                    *c += g * g;
                    *w -= lr * g / (c.sqrt() + EPSILON);
                }
            }
            Optimizer::Adam { beta1, beta2 } => {
                state.beta1_pow *= beta1;
                state.beta2_pow *= beta2;
                let corr1 = 1.0 - state.beta1_pow;
                let corr2 = 1.0 - state.beta2_pow;

                let OptimizerState { first, second, .. } = state;
                for (((w, &g), m), v) in params.iter_mut().zip(grads).zip(first).zip(second) {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    let m_hat = *m / corr1;
                    let v_hat = *v / corr2;
                    *w -= lr * m_hat / (v_hat.sqrt() + EPSILON);
                }
            }
        }

        state.step += 1;
        Ok(())
    }
}

impl TryFrom<u8> for Optimizer {
    type Error = Error;

    /// Map a numeric id to an optimizer with default hyperparameters.
    fn try_from(id: u8) -> Result<Self> {
        Ok(match id {
            0 => Optimizer::default(),
            1 => Optimizer::RmsProp { beta: 0.9 },
            2 => Optimizer::AdaGrad,
            3 => Optimizer::Adam {
                beta1: 0.9,
                beta2: 0.999,
            },
            other => return Err(Error::UnsupportedOptimizer(other)),
        })
    }
}

/// Per-parameter optimizer buffers for one weight store.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerState {
    /// Momentum velocity or Adam first moment.
    first: Vec<f32>,
    /// RMSProp average, AdaGrad accumulator or Adam second moment.
    second: Vec<f32>,
    /// Number of updates applied.
    step: u64,
    beta1_pow: f32,
    beta2_pow: f32,
}

impl OptimizerState {
    pub fn zeros(len: usize) -> Self {
        Self {
            first: vec![0.0; len],
            second: vec![0.0; len],
            step: 0,
            beta1_pow: 1.0,
            beta2_pow: 1.0,
        }
    }

    #[inline]
    pub fn step(&self) -> u64 {
        self.step
    }

    #[inline]
    pub fn first(&self) -> &[f32] {
        &self.first
    }

    #[inline]
    pub fn second(&self) -> &[f32] {
        &self.second
    }

    pub fn estimate_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + (self.first.capacity() + self.second.capacity()) * std::mem::size_of::<f32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(opt: Optimizer, lr: f32, w: &mut [f32], g: &[f32], state: &mut OptimizerState) {
        opt.apply(lr, w, g, state).unwrap();
    }

    #[test]
    fn optimizer_validation_rejects_bad_hyperparams() {
        assert!(Optimizer::Sgd { momentum: 1.0 }.validate().is_err());
        assert!(Optimizer::Sgd { momentum: -0.1 }.validate().is_err());
        assert!(Optimizer::RmsProp { beta: f32::NAN }.validate().is_err());
        assert!(
            Optimizer::Adam {
                beta1: 1.0,
                beta2: 0.999
            }
            .validate()
            .is_err()
        );
        assert!(
            Optimizer::Adam {
                beta1: 0.9,
                beta2: 1.0
            }
            .validate()
            .is_err()
        );
        assert!(Optimizer::AdaGrad.validate().is_ok());
    }

    #[test]
    fn apply_rejects_bad_learning_rate() {
        let mut state = OptimizerState::zeros(1);
        let mut w = [1.0_f32];
        assert!(Optimizer::AdaGrad.apply(0.0, &mut w, &[1.0], &mut state).is_err());
        assert!(Optimizer::AdaGrad.apply(f32::NAN, &mut w, &[1.0], &mut state).is_err());
    }

    #[test]
    fn sgd_momentum_accumulates_velocity() {
        let opt = Optimizer::Sgd { momentum: 0.9 };
        let mut state = OptimizerState::zeros(1);
        let mut w = [1.0_f32];

        run(opt, 0.1, &mut w, &[3.0], &mut state);
        assert!((w[0] - 0.7).abs() < 1e-6);

        // v = 0.9 * -0.3 - 0.1 * 3 = -0.57
        run(opt, 0.1, &mut w, &[3.0], &mut state);
        assert!((w[0] - 0.13).abs() < 1e-6);
        assert_eq!(state.step(), 2);
    }

    #[test]
    fn rmsprop_and_adagrad_first_steps() {
        let mut state = OptimizerState::zeros(1);
        let mut w = [0.0_f32];
        run(Optimizer::RmsProp { beta: 0.9 }, 0.01, &mut w, &[2.0], &mut state);
        // v = 0.1 * 4 = 0.4
        let expected = -0.01 / 0.4_f32.sqrt() * 2.0;
        assert!((w[0] - expected).abs() < 1e-6);

        let mut state = OptimizerState::zeros(1);
        let mut w = [0.0_f32];
        run(Optimizer::AdaGrad, 0.5, &mut w, &[2.0], &mut state);
        assert!((w[0] + 0.5).abs() < 1e-6);
        run(Optimizer::AdaGrad, 0.5, &mut w, &[2.0], &mut state);
        let expected = -0.5 - 0.5 * 2.0 / 8.0_f32.sqrt();
        assert!((w[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn adam_first_step_is_lr_sized_for_any_gradient_scale() {
        let opt = Optimizer::Adam {
            beta1: 0.9,
            beta2: 0.999,
        };
        for &g in &[1.0_f32, 1e-3, 250.0] {
            let mut state = OptimizerState::zeros(1);
            let mut w = [1.0_f32];
            run(opt, 0.1, &mut w, &[g], &mut state);
            assert!((w[0] - 0.9).abs() < 1e-5, "g={g} w={}", w[0]);
        }
    }

    #[test]
    fn adam_step_counter_advances_once_per_update() {
        let opt = Optimizer::Adam {
            beta1: 0.9,
            beta2: 0.999,
        };
        let mut state = OptimizerState::zeros(64);
        let mut w = vec![0.0_f32; 64];
        let g = vec![1.0_f32; 64];
        run(opt, 0.1, &mut w, &g, &mut state);
        run(opt, 0.1, &mut w, &g, &mut state);
        assert_eq!(state.step(), 2);

        // Constant unit gradients keep every bias-corrected step at exactly lr.
        for &x in &w {
            assert!((x + 0.2).abs() < 1e-4);
        }
    }

    #[test]
    fn zero_gradient_leaves_plain_sgd_unchanged() {
        let mut state = OptimizerState::zeros(2);
        let mut w = [0.5_f32, -0.5];
        run(Optimizer::default(), 0.1, &mut w, &[0.0, 0.0], &mut state);
        assert_eq!(w, [0.5, -0.5]);
    }

    #[test]
    fn zero_gradient_still_moves_stateful_rules() {
        let adam = Optimizer::Adam {
            beta1: 0.9,
            beta2: 0.999,
        };
        let mut state = OptimizerState::zeros(1);
        let mut w = [0.0_f32];
        run(adam, 0.1, &mut w, &[1.0], &mut state);
        let after_first = w[0];
        run(adam, 0.1, &mut w, &[0.0], &mut state);
        assert!(w[0] < after_first, "adam momentum should keep moving");

        let momentum = Optimizer::Sgd { momentum: 0.5 };
        let mut state = OptimizerState::zeros(1);
        let mut w = [0.0_f32];
        run(momentum, 0.1, &mut w, &[1.0], &mut state);
        run(momentum, 0.1, &mut w, &[0.0], &mut state);
        assert!((w[0] + 0.15).abs() < 1e-6);

        // RMSProp keeps decaying its average even when the weights stay put.
        let mut state = OptimizerState::zeros(1);
        let mut w = [0.0_f32];
        run(Optimizer::RmsProp { beta: 0.9 }, 0.1, &mut w, &[1.0], &mut state);
        let v1 = state.second()[0];
        run(Optimizer::RmsProp { beta: 0.9 }, 0.1, &mut w, &[0.0], &mut state);
        assert!(state.second()[0] < v1);
    }

    #[test]
    fn ids_round_trip_and_unknown_fails() {
        for id in 0..=3_u8 {
            assert_eq!(Optimizer::try_from(id).unwrap().id(), id);
        }
        assert_eq!(Optimizer::try_from(4), Err(Error::UnsupportedOptimizer(4)));
    }
}
