//! Weight stores.
//!
//! A [`Weights`] holds one flat parameter buffer together with its gradient accumulator and
//! optimizer state. Gradients are summed across every sample of a batch and only cleared by
//! an explicit [`Weights::zero_grad`]; [`Weights::update`] is the usual
//! "apply rule, then clear" boundary used by the training loop.
//!
//! Layers hold their stores through [`Params`], which either owns a store outright or shares
//! one through a reference-counted handle so several layers (or networks) train the same
//! parameters.

use std::cell::RefCell;
use std::rc::Rc;

use rand::RngCore;

use crate::optim::{Optimizer, OptimizerState};
use crate::random::UnitFloat;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Weight initialization scheme.
pub enum Init {
    /// Every value equals `center`.
    #[default]
    Constant,
    /// Uniform in `[center - deviation, center + deviation]`.
    Uniform,
    /// Normal with mean `center` and standard deviation `deviation`.
    Gaussian,
    /// `Uniform` scaled by `sqrt(6 / n)`.
    XavierUniform,
    /// `Gaussian` scaled by `sqrt(6 / n)`.
    XavierGaussian,
    /// `Uniform` scaled by `sqrt(2 / n)`.
    KaimingUniform,
    /// `Gaussian` scaled by `sqrt(2 / n)`.
    KaimingGaussian,
}

impl Init {
    pub fn id(self) -> u8 {
        match self {
            Init::Constant => 0,
            Init::Uniform => 1,
            Init::Gaussian => 2,
            Init::XavierUniform => 3,
            Init::XavierGaussian => 4,
            Init::KaimingUniform => 5,
            Init::KaimingGaussian => 6,
        }
    }
}

impl TryFrom<u8> for Init {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        Ok(match id {
            0 => Init::Constant,
            1 => Init::Uniform,
            2 => Init::Gaussian,
            3 => Init::XavierUniform,
            4 => Init::XavierGaussian,
            5 => Init::KaimingUniform,
            6 => Init::KaimingGaussian,
            other => return Err(Error::UnsupportedInitializer(other)),
        })
    }
}

/// A flat parameter buffer with its gradients and optimizer state.
#[derive(Debug, Clone)]
pub struct Weights {
    init: Init,
    center: f32,
    deviation: f32,
    trainable: bool,
    values: Vec<f32>,
    grads: Vec<f32>,
    optimizer_state: Option<OptimizerState>,
}

impl Weights {
    /// A trainable store, filled by `init` when a layer first sizes it.
    pub fn new(init: Init, center: f32, deviation: f32) -> Self {
        Self {
            init,
            center,
            deviation,
            trainable: true,
            values: Vec::new(),
            grads: Vec::new(),
            optimizer_state: None,
        }
    }

    /// A trainable store filled with `value`.
    pub fn constant(value: f32) -> Self {
        Self::new(Init::Constant, value, 0.0)
    }

    /// A trainable store with explicit values.
    ///
    /// The layer using it must expect exactly `values.len()` parameters.
    pub fn from_values(values: Vec<f32>) -> Self {
        Self {
            values,
            ..Self::constant(0.0)
        }
    }

    /// Set whether optimizer updates apply to this store.
    pub fn trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.center.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "weights center must be finite, got {}",
                self.center
            )));
        }
        if !(self.deviation.is_finite() && self.deviation >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "weights deviation must be finite and >= 0, got {}",
                self.deviation
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn init(&self) -> Init {
        self.init
    }

    #[inline]
    pub fn is_trainable(&self) -> bool {
        self.trainable
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    #[inline]
    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    /// Accumulated gradients (empty for frozen stores).
    #[inline]
    pub fn grads(&self) -> &[f32] {
        &self.grads
    }

    #[inline]
    pub fn grads_mut(&mut self) -> &mut [f32] {
        &mut self.grads
    }

    /// Values and gradients at once, for accumulation in backward passes.
    #[inline]
    pub(crate) fn values_and_grads_mut(&mut self) -> (&[f32], &mut [f32]) {
        (&self.values, &mut self.grads)
    }

    pub fn optimizer_state(&self) -> Option<&OptimizerState> {
        self.optimizer_state.as_ref()
    }

    /// Size the store for `len` parameters.
    ///
    /// Values are initialized if the store is still empty, and a zeroed gradient buffer is
    /// allocated for trainable stores.
    pub fn check_init<R: RngCore + ?Sized>(&mut self, len: usize, rng: &mut R) -> Result<()> {
        self.validate()?;
        if self.values.is_empty() {
            self.values = vec![0.0; len];
            self.initialize(rng);
        } else if self.values.len() != len {
            return Err(Error::InvalidData(format!(
                "weights hold {} values, layer expects {len}",
                self.values.len()
            )));
        }
        if self.trainable && self.grads.len() != len {
            self.grads = vec![0.0; len];
        }
        Ok(())
    }

    /// Refill every value according to the initializer.
    pub fn initialize<R: RngCore + ?Sized>(&mut self, rng: &mut R) {
        let (center, dev) = (self.center, self.deviation);
        match self.init {
            Init::Constant => self.values.fill(center),
            Init::Uniform => fill_uniform(&mut self.values, center, dev, rng),
            Init::Gaussian => fill_gaussian(&mut self.values, center, dev, rng),
            Init::XavierUniform | Init::KaimingUniform => {
                fill_uniform(&mut self.values, center, dev, rng);
                self.scale_by_fan();
            }
            Init::XavierGaussian | Init::KaimingGaussian => {
                fill_gaussian(&mut self.values, center, dev, rng);
                self.scale_by_fan();
            }
        }
    }

    fn scale_by_fan(&mut self) {
        let numerator = match self.init {
            Init::XavierUniform | Init::XavierGaussian => 6.0,
            _ => 2.0,
        };
        let limit = (numerator / self.values.len() as f32).sqrt();
        for v in &mut self.values {
            *v *= limit;
        }
    }

    /// Apply `optimizer` using the accumulated gradients, leaving the gradients in place.
    ///
    /// No-op for frozen or unsized stores.
    pub fn step(&mut self, optimizer: Optimizer, lr: f32) -> Result<()> {
        if !self.trainable || self.values.is_empty() || self.grads.len() != self.values.len() {
            return Ok(());
        }
        let len = self.values.len();
        let state = self
            .optimizer_state
            .get_or_insert_with(|| OptimizerState::zeros(len));
        optimizer.apply(lr, &mut self.values, &self.grads, state)
    }

    /// End the accumulation window.
    pub fn zero_grad(&mut self) {
        self.grads.fill(0.0);
    }

    /// [`Weights::step`] followed by [`Weights::zero_grad`].
    pub fn update(&mut self, optimizer: Optimizer, lr: f32) -> Result<()> {
        self.step(optimizer, lr)?;
        self.zero_grad();
        Ok(())
    }

    pub fn estimate_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + (self.values.capacity() + self.grads.capacity()) * std::mem::size_of::<f32>()
            + self
                .optimizer_state
                .as_ref()
                .map_or(0, OptimizerState::estimate_size)
    }
}

fn fill_uniform<R: RngCore + ?Sized>(values: &mut [f32], center: f32, dev: f32, rng: &mut R) {
    for v in values {
        *v = rng.next_unit_f32() * 2.0 * dev + center - dev;
    }
}

/// Marsaglia polar method; each accepted pair fills two values.
fn fill_gaussian<R: RngCore + ?Sized>(values: &mut [f32], center: f32, dev: f32, rng: &mut R) {
    for pair in values.chunks_mut(2) {
        let (x, y, rsq) = loop {
            let x = rng.next_unit_f32() * 2.0 - 1.0;
            let y = rng.next_unit_f32() * 2.0 - 1.0;
            let rsq = x * x + y * y;
            if rsq < 1.0 && rsq != 0.0 {
                break (x, y, rsq);
            }
        };
        let f = (-2.0 * rsq.ln() / rsq).sqrt();
        pair[0] = x * f * dev + center;
        if let Some(second) = pair.get_mut(1) {
            *second = y * f * dev + center;
        }
    }
}

/// How a layer holds a weight store.
///
/// Cloning an `Owned` store copies it; cloning a `Shared` handle aliases the same store.
#[derive(Debug, Clone)]
pub enum Params {
    Owned(Weights),
    Shared(Rc<RefCell<Weights>>),
}

impl Params {
    /// Wrap `weights` in a handle that can be cloned into several layers.
    pub fn share(weights: Weights) -> Self {
        Params::Shared(Rc::new(RefCell::new(weights)))
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        matches!(self, Params::Shared(_))
    }

    pub fn with<T>(&self, f: impl FnOnce(&Weights) -> T) -> T {
        match self {
            Params::Owned(w) => f(w),
            Params::Shared(w) => f(&w.borrow()),
        }
    }

    pub fn with_mut<T>(&mut self, f: impl FnOnce(&mut Weights) -> T) -> T {
        match self {
            Params::Owned(w) => f(w),
            Params::Shared(w) => f(&mut w.borrow_mut()),
        }
    }

    pub fn estimate_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.with(Weights::estimate_size)
    }
}

impl From<Weights> for Params {
    fn from(weights: Weights) -> Self {
        Params::Owned(weights)
    }
}
