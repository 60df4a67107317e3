//! A small feed-forward neural network engine.
//!
//! `petalflow` chains [`Layer`]s into a [`Network`] and trains it with hand-derived
//! back-propagation. Every layer owns its buffers, so the per-sample forward/backward path
//! reuses memory instead of allocating.
//!
//! # Building blocks
//!
//! - [`Layer`]: one stage of the chain. A layer has a [`LayerKind`] (pass-through, one of
//!   three min/max normalizations, or dense), optional weights and bias, an optional
//!   [`Activation`] and an optional dropout ratio.
//! - [`Weights`]: a trainable parameter store with its gradient accumulator and optimizer
//!   state. Layers hold stores through [`Params`], either owned or shared between layers.
//! - [`Loss`] / [`Optimizer`]: closed sets of loss functions and update rules.
//! - [`Network`]: forward, predict and mini-batch training with per-batch metrics
//!   reported to a [`MetricsSink`].
//!
//! # Errors vs panics
//!
//! Construction and training return [`Result`]. A layer that fails during `forward` or
//! `backward` records the error and returns it from every later call.
//!
//! # Data layout
//!
//! - Scalars are `f32`.
//! - Layer shapes are `rows x cols x depth`, flattened row-major with depth innermost.
//! - Dense weights are row-major with shape `(out_len, in_len)`.
//!
//! # Quick start
//!
//! ```rust
//! use petalflow::{
//!     Activation, Dataset, Init, Layer, Loss, Network, NullSink, Optimizer, TrainConfig,
//!     Weights,
//! };
//!
//! # fn main() -> petalflow::Result<()> {
//! let hidden = Layer::dense(2, 8)
//!     .first(true)
//!     .weights(Weights::new(Init::XavierGaussian, 0.0, 1.0))
//!     .bias(Weights::constant(0.0))
//!     .activation(Activation::RELU)
//!     .build_with_seed(1)?;
//! let output = Layer::dense(8, 2)
//!     .weights(Weights::new(Init::XavierGaussian, 0.0, 1.0))
//!     .bias(Weights::constant(0.0))
//!     .activation(Activation::Softmax)
//!     .build_with_seed(2)?;
//! let mut network = Network::new(vec![hidden, output])?;
//!
//! let xs = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![2.0, 1.0], vec![1.0, 2.0]];
//! let ys = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0], vec![0.0, 1.0]];
//! let mut train = Dataset::from_rows(&xs, &ys)?;
//!
//! let cfg = TrainConfig {
//!     loss: Loss::CategoricalCrossEntropy,
//!     optimizer: Optimizer::Adam { beta1: 0.9, beta2: 0.999 },
//!     lr: 1e-2,
//!     batch_size: 2,
//!     epochs: 5,
//! };
//! let report = network.train(&cfg, &mut train, None, &mut NullSink)?;
//! assert_eq!(report.epochs, 5);
//!
//! let probabilities = network.predict(&[3.0, 0.0])?;
//! assert_eq!(probabilities.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! # Custom training loops
//!
//! [`Network::forward`], [`Network::backward`] and [`Network::update`] expose the
//! accumulate/update cycle directly:
//!
//! ```rust
//! use petalflow::{Activation, Layer, Loss, LossState, Network, Optimizer, Weights};
//!
//! # fn main() -> petalflow::Result<()> {
//! let layer = Layer::dense(3, 2)
//!     .first(true)
//!     .weights(Weights::constant(0.1))
//!     .activation(Activation::Tanh)
//!     .build_with_seed(0)?;
//! let mut network = Network::new(vec![layer])?;
//! let mut loss = LossState::new(Loss::Mse);
//!
//! let x = [0.1_f32, -0.2, 0.3];
//! let t = [0.0_f32, 1.0];
//! let y = network.forward(&x, true)?;
//! let _value = loss.forward(y, &t)?;
//! let output_error = loss.backward(t.len())?;
//! network.backward(&x, output_error)?;
//! network.update(Optimizer::default(), 1e-2)?;
//! # Ok(())
//! # }
//! ```

/// Guard added to denominators and logarithm arguments.
pub const EPSILON: f32 = 1e-15;

pub mod activation;
pub mod bit_mask;
pub mod config;
pub mod data;
pub mod dropout;
pub mod error;
pub mod labels;
pub mod layer;
pub mod loss;
pub(crate) mod matmul;
pub mod metrics;
pub mod network;
pub mod optim;
pub mod random;
pub mod shuffle;
pub mod weights;

pub use activation::{Activation, ActivationState};
pub use bit_mask::BitMask;
pub use config::TrainConfig;
pub use data::{Dataset, Targets};
pub use error::{Error, Result};
pub use layer::{Layer, LayerBuilder, LayerKind, Shape};
pub use loss::{Loss, LossState};
pub use metrics::{BatchReport, History, LogSink, MetricsSink, NullSink};
pub use network::{EvalReport, Network, TrainReport};
pub use optim::{Optimizer, OptimizerState};
pub use random::{Mt19937, UnitFloat};
pub use weights::{Init, Params, Weights};
