//! Layers.
//!
//! A [`Layer`] is one stage of a network. Element-wise kinds ([`LayerKind::Direct`] and the
//! normalizations) map an input to an output of the same shape; [`LayerKind::Dense`] is a
//! fully connected layer with a row-major `(out_len, in_len)` weight matrix and a bias vector.
//!
//! A layer owns its output buffer. After `forward` it holds the activated outputs; `backward`
//! reuses it as scratch for the local error signal, so `backward` for one sample must finish
//! before `forward` runs on the next one.
//!
//! Once a forward or backward pass fails the layer keeps the error and returns it from every
//! later call.

use std::fmt;

use log::{debug, warn};
use rand::RngCore;

use crate::activation::{Activation, ActivationState};
use crate::bit_mask::BitMask;
use crate::optim::Optimizer;
use crate::random::Mt19937;
use crate::weights::Params;
use crate::{EPSILON, Error, Result, dropout, matmul};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Three-dimensional shape, stored channel-last: index = `(row * cols + col) * depth + channel`.
pub struct Shape {
    pub rows: usize,
    pub cols: usize,
    pub depth: usize,
}

impl Shape {
    pub const fn new(rows: usize, cols: usize, depth: usize) -> Self {
        Self { rows, cols, depth }
    }

    /// A `1 x len x 1` vector.
    pub const fn flat(len: usize) -> Self {
        Self::new(1, len, 1)
    }

    /// Total number of elements.
    ///
    /// Saturates on overflow; [`Shape::checked_len`] reports it.
    pub fn len(&self) -> usize {
        self.checked_len().unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0 || self.depth == 0
    }

    /// Total number of elements, validated.
    pub fn checked_len(&self) -> Result<usize> {
        if self.is_empty() {
            return Err(Error::ShapeZero);
        }
        self.rows
            .checked_mul(self.cols)
            .and_then(|n| n.checked_mul(self.depth))
            .ok_or(Error::ShapeTooBig)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.rows, self.cols, self.depth)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// What a layer computes.
pub enum LayerKind {
    /// Copies the input.
    Direct,
    /// Rescales the whole input from `[min, max]` into `[center - deviation, center + deviation]`.
    NormalizeAll,
    /// Same as `NormalizeAll`, independently for every row.
    NormalizeInRows,
    /// Same as `NormalizeAll`, independently for every channel.
    NormalizeInChannels,
    /// Fully connected: `W x + b`.
    Dense,
}

impl LayerKind {
    pub fn id(self) -> u8 {
        match self {
            LayerKind::Direct => 0,
            LayerKind::NormalizeAll => 1,
            LayerKind::NormalizeInRows => 2,
            LayerKind::NormalizeInChannels => 3,
            LayerKind::Dense => 4,
        }
    }

    /// True for kinds whose output shape must equal the input shape.
    pub fn preserves_shape(self) -> bool {
        self != LayerKind::Dense
    }
}

impl TryFrom<u8> for LayerKind {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        Ok(match id {
            0 => LayerKind::Direct,
            1 => LayerKind::NormalizeAll,
            2 => LayerKind::NormalizeInRows,
            3 => LayerKind::NormalizeInChannels,
            4 => LayerKind::Dense,
            other => return Err(Error::UnsupportedLayerKind(other)),
        })
    }
}

#[derive(Debug, Clone)]
/// Builder for a [`Layer`].
///
/// ```rust
/// use petalflow::{Activation, Init, Layer, Weights};
///
/// # fn main() -> petalflow::Result<()> {
/// let layer = Layer::dense(4, 2)
///     .first(true)
///     .weights(Weights::new(Init::XavierGaussian, 0.0, 1.0))
///     .bias(Weights::constant(0.0))
///     .activation(Activation::Softmax)
///     .dropout(0.1)
///     .build_with_seed(0)?;
/// assert_eq!(layer.output().len(), 2);
/// # Ok(())
/// # }
/// ```
pub struct LayerBuilder {
    kind: LayerKind,
    input_shape: Shape,
    output_shape: Shape,
    first: bool,
    weights: Option<Params>,
    bias: Option<Params>,
    activation: Option<Activation>,
    dropout: f32,
    center: f32,
    deviation: f32,
}

impl LayerBuilder {
    pub fn new(kind: LayerKind, input_shape: Shape, output_shape: Shape) -> Self {
        Self {
            kind,
            input_shape,
            output_shape,
            first: false,
            weights: None,
            bias: None,
            activation: None,
            dropout: 0.0,
            center: 0.0,
            deviation: 1.0,
        }
    }

    /// Mark the layer as the first of its network (no input error is produced).
    pub fn first(mut self, first: bool) -> Self {
        self.first = first;
        self
    }

    /// Weight matrix for a dense layer.
    pub fn weights(mut self, weights: impl Into<Params>) -> Self {
        self.weights = Some(weights.into());
        self
    }

    /// Bias vector for a dense layer.
    pub fn bias(mut self, bias: impl Into<Params>) -> Self {
        self.bias = Some(bias.into());
        self
    }

    pub fn activation(mut self, activation: Activation) -> Self {
        self.activation = Some(activation);
        self
    }

    /// Fraction of outputs dropped on every training forward pass.
    pub fn dropout(mut self, ratio: f32) -> Self {
        self.dropout = ratio;
        self
    }

    /// Target range of the normalization kinds: `[center - deviation, center + deviation]`.
    pub fn normalize_range(mut self, center: f32, deviation: f32) -> Self {
        self.center = center;
        self.deviation = deviation;
        self
    }

    /// Build using a deterministic seed for weight initialization.
    pub fn build_with_seed(self, seed: u32) -> Result<Layer> {
        self.build_with_rng(&mut Mt19937::new(seed))
    }

    /// Validate the configuration, size the weight stores and allocate buffers.
    pub fn build_with_rng<R: RngCore + ?Sized>(mut self, rng: &mut R) -> Result<Layer> {
        let in_len = self.input_shape.checked_len()?;
        let out_len = self.output_shape.checked_len()?;

        if self.kind.preserves_shape() {
            if self.input_shape != self.output_shape {
                return Err(Error::ShapeMismatch {
                    input: self.input_shape,
                    output: self.output_shape,
                });
            }
            if self.weights.is_some() || self.bias.is_some() {
                return Err(Error::InvalidConfig(format!(
                    "{:?} layers take no weights",
                    self.kind
                )));
            }
        }
        if let Some(activation) = self.activation {
            activation.validate()?;
        }
        dropout::validate_ratio(self.dropout)?;
        if !(self.center.is_finite() && self.deviation.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "normalization center/deviation must be finite, got {}/{}",
                self.center, self.deviation
            )));
        }

        let weights_len = in_len.checked_mul(out_len).ok_or(Error::ShapeTooBig)?;
        if let Some(weights) = self.weights.as_mut() {
            weights.with_mut(|w| w.check_init(weights_len, rng))?;
        }
        if let Some(bias) = self.bias.as_mut() {
            bias.with_mut(|w| w.check_init(out_len, rng))?;
        }

        let buffer_len = self
            .activation
            .map_or(out_len, |activation| activation.buffer_len(out_len));

        debug!(
            "built {:?} layer {} -> {} (activation {:?}, dropout {})",
            self.kind, self.input_shape, self.output_shape, self.activation, self.dropout
        );

        Ok(Layer {
            kind: self.kind,
            first: self.first,
            input_shape: self.input_shape,
            output_shape: self.output_shape,
            weights: self.weights,
            bias: self.bias,
            activation: self.activation.map(ActivationState::new),
            dropout: self.dropout,
            center: self.center,
            deviation: self.deviation,
            mask: (self.dropout > 0.0).then(|| BitMask::new(out_len)),
            dropout_scale: None,
            output: vec![0.0; buffer_len],
            error_on_input: (!self.first).then(|| vec![0.0; in_len]),
            failure: None,
        })
    }
}

/// One stage of a network.
#[derive(Debug, Clone)]
pub struct Layer {
    kind: LayerKind,
    first: bool,
    input_shape: Shape,
    output_shape: Shape,
    weights: Option<Params>,
    bias: Option<Params>,
    activation: Option<ActivationState>,
    dropout: f32,
    center: f32,
    deviation: f32,
    mask: Option<BitMask>,
    /// Inverted-dropout factor applied by the last forward pass, if dropout was active.
    dropout_scale: Option<f32>,
    output: Vec<f32>,
    error_on_input: Option<Vec<f32>>,
    failure: Option<Error>,
}

impl Layer {
    pub fn builder(kind: LayerKind, input_shape: Shape, output_shape: Shape) -> LayerBuilder {
        LayerBuilder::new(kind, input_shape, output_shape)
    }

    /// Dense layer mapping `in_len` values to `out_len` values.
    pub fn dense(in_len: usize, out_len: usize) -> LayerBuilder {
        LayerBuilder::new(LayerKind::Dense, Shape::flat(in_len), Shape::flat(out_len))
    }

    pub fn direct(shape: Shape) -> LayerBuilder {
        LayerBuilder::new(LayerKind::Direct, shape, shape)
    }

    pub fn normalize_all(shape: Shape) -> LayerBuilder {
        LayerBuilder::new(LayerKind::NormalizeAll, shape, shape)
    }

    pub fn normalize_in_rows(shape: Shape) -> LayerBuilder {
        LayerBuilder::new(LayerKind::NormalizeInRows, shape, shape)
    }

    pub fn normalize_in_channels(shape: Shape) -> LayerBuilder {
        LayerBuilder::new(LayerKind::NormalizeInChannels, shape, shape)
    }

    #[inline]
    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    #[inline]
    pub fn is_first(&self) -> bool {
        self.first
    }

    #[inline]
    pub fn input_shape(&self) -> Shape {
        self.input_shape
    }

    #[inline]
    pub fn output_shape(&self) -> Shape {
        self.output_shape
    }

    #[inline]
    pub fn input_len(&self) -> usize {
        self.input_shape.len()
    }

    #[inline]
    pub fn output_len(&self) -> usize {
        self.output_shape.len()
    }

    pub fn activation(&self) -> Option<Activation> {
        self.activation.as_ref().map(ActivationState::activation)
    }

    #[inline]
    pub fn dropout(&self) -> f32 {
        self.dropout
    }

    pub fn weights(&self) -> Option<&Params> {
        self.weights.as_ref()
    }

    pub fn weights_mut(&mut self) -> Option<&mut Params> {
        self.weights.as_mut()
    }

    pub fn bias(&self) -> Option<&Params> {
        self.bias.as_ref()
    }

    pub fn bias_mut(&mut self) -> Option<&mut Params> {
        self.bias.as_mut()
    }

    /// Dropout mask of the last training forward pass.
    pub fn mask(&self) -> Option<&BitMask> {
        self.mask.as_ref()
    }

    /// Output of the last forward pass.
    ///
    /// After `backward` this holds the local error signal instead.
    #[inline]
    pub fn output(&self) -> &[f32] {
        &self.output[..self.output_len()]
    }

    /// Error with respect to the layer input, computed by the last `backward`.
    ///
    /// `None` for the first layer.
    pub fn error_on_input(&self) -> Option<&[f32]> {
        self.error_on_input.as_deref()
    }

    /// The error that put this layer into the failed state.
    pub fn failure(&self) -> Option<&Error> {
        self.failure.as_ref()
    }

    fn ensure_ready(&self) -> Result<()> {
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Caller-side length errors are returned without entering the failed state.
    fn check_len(what: &str, got: usize, expected: usize) -> Result<()> {
        if got == expected {
            Ok(())
        } else {
            Err(Error::InvalidData(format!("{what} has len {got}, expected {expected}")))
        }
    }

    fn record<T>(&mut self, res: Result<T>) -> Result<T> {
        if let Err(err) = &res {
            warn!("{:?} layer failed: {err}", self.kind);
            self.failure = Some(err.clone());
        }
        res
    }

    /// Compute the layer output for `input`.
    ///
    /// With `training` set and a non-zero dropout ratio a fresh dropout mask is drawn from
    /// `rng`; inference never touches the mask.
    pub fn forward<R: RngCore + ?Sized>(
        &mut self,
        input: &[f32],
        training: bool,
        rng: &mut R,
    ) -> Result<&[f32]> {
        self.ensure_ready()?;
        Self::check_len("layer input", input.len(), self.input_len())?;
        let res = self.forward_inner(input, training, rng);
        self.record(res)?;
        Ok(self.output())
    }

    fn forward_inner<R: RngCore + ?Sized>(
        &mut self,
        input: &[f32],
        training: bool,
        rng: &mut R,
    ) -> Result<()> {
        let in_len = self.input_len();
        let out_len = self.output_len();

        self.dropout_scale = None;
        let mask = match self.mask.as_mut() {
            Some(mask) if training && self.dropout > 0.0 => {
                dropout::generate(mask, self.dropout, rng)?;
                Some(&*mask)
            }
            _ => None,
        };
        let dropped = |i: usize| mask.is_some_and(|m| m.contains(i));
        let out = &mut self.output[..out_len];

        match self.kind {
            LayerKind::Direct => {
                for (i, (o, &x)) in out.iter_mut().zip(input).enumerate() {
                    *o = if dropped(i) { 0.0 } else { x };
                }
            }
            LayerKind::NormalizeAll => {
                rescale(input, out, 0..in_len, self.center, self.deviation, dropped);
            }
            LayerKind::NormalizeInRows => {
                let row_len = self.input_shape.cols * self.input_shape.depth;
                for row in 0..self.input_shape.rows {
                    let start = row * row_len;
                    rescale(
                        input,
                        out,
                        start..start + row_len,
                        self.center,
                        self.deviation,
                        dropped,
                    );
                }
            }
            LayerKind::NormalizeInChannels => {
                let depth = self.input_shape.depth;
                for channel in 0..depth {
                    rescale(
                        input,
                        out,
                        (channel..in_len).step_by(depth),
                        self.center,
                        self.deviation,
                        dropped,
                    );
                }
            }
            LayerKind::Dense => {
                match &self.weights {
                    Some(weights) => weights.with(|w| {
                        let w = w.values();
                        if mask.is_none() {
                            matmul::matvec(out_len, in_len, w, input, out);
                        } else {
                            for (o, y) in out.iter_mut().enumerate() {
                                *y = if dropped(o) {
                                    0.0
                                } else {
                                    dot(&w[o * in_len..(o + 1) * in_len], input)
                                };
                            }
                        }
                    }),
                    None => {
                        let sum: f32 = input.iter().sum();
                        for (o, y) in out.iter_mut().enumerate() {
                            *y = if dropped(o) { 0.0 } else { sum };
                        }
                    }
                }
                if let Some(bias) = &self.bias {
                    bias.with(|b| {
                        for (o, (y, &b)) in out.iter_mut().zip(b.values()).enumerate() {
                            if !dropped(o) {
                                *y += b;
                            }
                        }
                    });
                }
            }
        }

        if let Some(activation) = self.activation.as_mut() {
            activation.forward(&mut self.output[..out_len], mask)?;
        }

        if mask.is_some() {
            let scale = 1.0 / (1.0 - self.dropout + EPSILON);
            for y in &mut self.output[..out_len] {
                if *y != 0.0 {
                    *y *= scale;
                }
            }
            self.dropout_scale = Some(scale);
        }
        Ok(())
    }

    /// Back-propagate `error_right` (the error on this layer's output) through the layer.
    ///
    /// `output_left` is the input the layer saw in the matching forward pass. Dense layers
    /// add their weight and bias gradients to the stores' accumulators; nothing is reset
    /// here.
    pub fn backward(&mut self, error_right: &[f32], output_left: &[f32]) -> Result<()> {
        self.ensure_ready()?;
        if error_right.len() < self.output_len() {
            return Err(Error::InvalidData(format!(
                "layer output error has len {}, expected {}",
                error_right.len(),
                self.output_len()
            )));
        }
        if !self.kind.preserves_shape() {
            Self::check_len("previous output", output_left.len(), self.input_len())?;
        }
        let res = self.backward_inner(error_right, output_left);
        self.record(res)
    }

    fn backward_inner(&mut self, error_right: &[f32], output_left: &[f32]) -> Result<()> {
        let in_len = self.input_len();
        let out_len = self.output_len();
        let error_right = &error_right[..out_len];

        if self.kind.preserves_shape() {
            if let Some(err_in) = self.error_on_input.as_mut() {
                err_in.copy_from_slice(error_right);
            }
            return Ok(());
        }

        let mask = self.dropout_scale.and(self.mask.as_ref());
        if let Some(scale) = self.dropout_scale {
            for y in &mut self.output[..out_len] {
                *y /= scale;
            }
        }

        match self.activation.as_mut() {
            Some(activation) => {
                activation.backward(&mut self.output, out_len, mask)?;
                if matches!(activation.activation(), Activation::Softmax) {
                    // Column c of the Jacobian only feeds local[c], so it can be written in place.
                    let jacobian = &mut self.output;
                    for c in 0..out_len {
                        let mut acc = 0.0_f32;
                        for (r, &e) in error_right.iter().enumerate() {
                            acc += jacobian[r * out_len + c] * e;
                        }
                        jacobian[c] = acc;
                    }
                } else {
                    for (y, &e) in self.output[..out_len].iter_mut().zip(error_right) {
                        *y *= e;
                    }
                }
            }
            None => {
                for (i, (y, &e)) in self.output[..out_len].iter_mut().zip(error_right).enumerate() {
                    *y = if mask.is_some_and(|m| m.contains(i)) { 0.0 } else { e };
                }
            }
        }

        if let Some(scale) = self.dropout_scale {
            for y in &mut self.output[..out_len] {
                *y *= scale;
            }
        }

        let local = &self.output[..out_len];

        if let Some(err_in) = self.error_on_input.as_mut() {
            match &self.weights {
                Some(weights) => {
                    weights.with(|w| {
                        matmul::matvec_transposed(out_len, in_len, w.values(), local, err_in)
                    });
                }
                None => err_in.fill(local.iter().sum()),
            }
        }

        if let Some(weights) = self.weights.as_mut() {
            weights.with_mut(|w| {
                let (_, grads) = w.values_and_grads_mut();
                if !grads.is_empty() {
                    matmul::outer_add(local, output_left, grads);
                }
            });
        }

        if let Some(bias) = self.bias.as_mut() {
            bias.with_mut(|b| {
                for (g, &l) in b.grads_mut().iter_mut().zip(local) {
                    *g += l;
                }
            });
        }

        Ok(())
    }

    /// Apply `optimizer` to the weight and bias stores, then clear their gradients.
    pub fn update(&mut self, optimizer: Optimizer, lr: f32) -> Result<()> {
        if let Some(weights) = self.weights.as_mut() {
            weights.with_mut(|w| w.update(optimizer, lr))?;
        }
        if let Some(bias) = self.bias.as_mut() {
            bias.with_mut(|b| b.update(optimizer, lr))?;
        }
        Ok(())
    }

    /// Detach and return the weight store, e.g. to reuse it in another layer.
    pub fn take_weights(&mut self) -> Option<Params> {
        self.weights.take()
    }

    pub fn estimate_size(&self) -> usize {
        let f = std::mem::size_of::<f32>();
        std::mem::size_of::<Self>()
            + self.output.capacity() * f
            + self.error_on_input.as_ref().map_or(0, |e| e.capacity() * f)
            + self.weights.as_ref().map_or(0, Params::estimate_size)
            + self.bias.as_ref().map_or(0, Params::estimate_size)
            + self
                .activation
                .as_ref()
                .map_or(0, ActivationState::estimate_size)
            + self.mask.as_ref().map_or(0, BitMask::estimate_size)
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).fold(0.0, |acc, (&x, &y)| x.mul_add(y, acc))
}

/// Min/max rescale of `input[indices]` into `out[indices]`; dropped indices become 0.
fn rescale<I, D>(
    input: &[f32],
    out: &mut [f32],
    indices: I,
    center: f32,
    deviation: f32,
    dropped: D,
) where
    I: Iterator<Item = usize> + Clone,
    D: Fn(usize) -> bool,
{
    let (min, max) = indices
        .clone()
        .map(|i| input[i])
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), x| (lo.min(x), hi.max(x)));
    let range = max - min + EPSILON;
    for i in indices {
        out[i] = if dropped(i) {
            0.0
        } else {
            (input[i] - min) / range * 2.0 * deviation + center - deviation
        };
    }
}
