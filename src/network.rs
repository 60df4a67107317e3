//! Networks: a linear chain of layers plus the loss used to train them.
//!
//! Forward passes run layer 0 to layer n-1, each layer reading the previous layer's output
//! buffer. Backward passes run the other way: the loss gradient feeds the last layer, each
//! layer's input error feeds its predecessor, and the first layer sees the sample itself as
//! its "previous output".
//!
//! [`Network::train`] accumulates gradients over every sample of a batch and applies one
//! optimizer update per batch.

use log::{debug, info, trace};

use crate::config::TrainConfig;
use crate::data::Dataset;
use crate::layer::Layer;
use crate::loss::{Loss, LossState};
use crate::metrics::{BatchReport, MetricsSink};
use crate::optim::Optimizer;
use crate::random::Mt19937;
use crate::{Error, Result, labels};

/// Outcome of [`Network::train`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainReport {
    pub epochs: usize,
    /// Metrics of the final batch.
    pub last: BatchReport,
}

/// Mean loss and accuracy over a dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalReport {
    pub loss: f32,
    pub accuracy: f32,
}

#[derive(Debug, Clone)]
pub struct Network {
    layers: Vec<Layer>,
    loss: Option<LossState>,
    rng: Mt19937,
}

impl Network {
    /// Chain `layers`, using seed 0 for dropout masks and shuffling.
    pub fn new(layers: Vec<Layer>) -> Result<Self> {
        Self::with_seed(layers, 0)
    }

    /// Chain `layers`, using `seed` for dropout masks and shuffling.
    ///
    /// Every layer after the first must accept the previous layer's output length and must
    /// not be marked as first.
    pub fn with_seed(layers: Vec<Layer>, seed: u32) -> Result<Self> {
        if layers.is_empty() {
            return Err(Error::EmptyNetwork);
        }
        for (idx, pair) in layers.windows(2).enumerate() {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.input_len() != prev.output_len() {
                return Err(Error::InvalidConfig(format!(
                    "layer {} expects {} inputs but layer {idx} produces {}",
                    idx + 1,
                    next.input_len(),
                    prev.output_len()
                )));
            }
            if next.is_first() {
                return Err(Error::InvalidConfig(format!(
                    "layer {} is marked first but is not at the front",
                    idx + 1
                )));
            }
        }
        debug!(
            "built network with {} layers ({} -> {})",
            layers.len(),
            layers[0].input_len(),
            layers[layers.len() - 1].output_len()
        );
        Ok(Self {
            layers,
            loss: None,
            rng: Mt19937::new(seed),
        })
    }

    #[inline]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    #[inline]
    pub fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    /// Give the layers back to the caller.
    pub fn into_layers(self) -> Vec<Layer> {
        self.layers
    }

    #[inline]
    pub fn input_len(&self) -> usize {
        self.layers[0].input_len()
    }

    #[inline]
    pub fn output_len(&self) -> usize {
        self.layers[self.layers.len() - 1].output_len()
    }

    /// Loss bound by the last `train` call.
    pub fn loss_state(&self) -> Option<&LossState> {
        self.loss.as_ref()
    }

    /// Generator used for dropout masks and shuffling.
    pub fn rng_mut(&mut self) -> &mut Mt19937 {
        &mut self.rng
    }

    /// Run `input` through every layer and return the last layer's output.
    ///
    /// The returned buffer is overwritten by the next forward or backward pass.
    pub fn forward(&mut self, input: &[f32], training: bool) -> Result<&[f32]> {
        forward_layers(&mut self.layers, input, training, &mut self.rng)?;
        Ok(last_output(&self.layers))
    }

    /// Inference forward pass (no dropout).
    pub fn predict(&mut self, input: &[f32]) -> Result<&[f32]> {
        self.forward(input, false)
    }

    /// Back-propagate `output_error` (the loss gradient) for the sample `input`.
    ///
    /// Must follow a forward pass on the same `input`. Gradients accumulate in the weight
    /// stores until [`Network::update`].
    pub fn backward(&mut self, input: &[f32], output_error: &[f32]) -> Result<()> {
        backward_layers(&mut self.layers, input, output_error)
    }

    /// Apply one optimizer step to every layer and clear the accumulated gradients.
    pub fn update(&mut self, optimizer: Optimizer, lr: f32) -> Result<()> {
        for layer in &mut self.layers {
            layer.update(optimizer, lr)?;
        }
        Ok(())
    }

    /// Mean `loss` and accuracy over `data`, without dropout.
    pub fn evaluate(&mut self, data: &Dataset, loss: Loss) -> Result<EvalReport> {
        self.check_dataset(data, "evaluation")?;
        let mut state = LossState::new(loss);
        let mut target = vec![0.0; self.output_len()];
        evaluate_layers(&mut self.layers, &mut state, &mut self.rng, data, &mut target)
    }

    /// Train on `train` for `cfg.epochs` epochs.
    ///
    /// Every epoch shuffles `train` in place, then walks it in batches of `cfg.batch_size`
    /// samples (the last batch may be shorter). After each batch the optimizer is applied
    /// once and, if `validation` is given, the network is evaluated on it. Every batch is
    /// reported to `sink`.
    ///
    /// An error stops training immediately; updates already applied are kept.
    pub fn train(
        &mut self,
        cfg: &TrainConfig,
        train: &mut Dataset,
        validation: Option<&Dataset>,
        sink: &mut dyn MetricsSink,
    ) -> Result<TrainReport> {
        cfg.validate()?;
        if train.is_empty() || cfg.batch_size == 0 || cfg.batch_size > train.len() {
            return Err(Error::InvalidBatch {
                batch_size: cfg.batch_size,
                len: train.len(),
            });
        }
        self.check_dataset(train, "train")?;
        if let Some(validation) = validation {
            self.check_dataset(validation, "validation")?;
        }

        let out_len = self.output_len();
        let batches = train.len().div_ceil(cfg.batch_size);
        let mut target = vec![0.0_f32; out_len];

        let Network { layers, loss, rng } = self;
        if loss.as_ref().is_none_or(|state| state.loss() != cfg.loss) {
            debug!("binding loss {:?}", cfg.loss);
            *loss = None;
        }
        let loss = loss.get_or_insert_with(|| LossState::new(cfg.loss));

        info!(
            "training {} samples for {} epochs ({} batches of {}, {:?}, lr {})",
            train.len(),
            cfg.epochs,
            batches,
            cfg.batch_size,
            cfg.optimizer,
            cfg.lr
        );

        let mut last = BatchReport::default();
        for epoch in 0..cfg.epochs {
            train.shuffle(rng)?;

            for batch in 0..batches {
                let start = batch * cfg.batch_size;
                let end = (start + cfg.batch_size).min(train.len());
                let mut loss_sum = 0.0_f32;
                let mut accuracy_sum = 0.0_f32;

                for idx in start..end {
                    let input = train.input(idx);
                    train.target_into(idx, &mut target)?;

                    forward_layers(layers, input, true, rng)?;
                    let predicted = last_output(layers);
                    loss_sum += loss.forward(predicted, &target)?;
                    accuracy_sum += labels::accuracy(predicted, &target);

                    let output_error = loss.backward(out_len)?;
                    backward_layers(layers, input, output_error)?;
                }

                for layer in layers.iter_mut() {
                    layer.update(cfg.optimizer, cfg.lr)?;
                }

                let samples = (end - start) as f32;
                let eval = match validation {
                    Some(data) => Some(evaluate_layers(layers, loss, rng, data, &mut target)?),
                    None => None,
                };
                last = BatchReport {
                    epoch,
                    epochs: cfg.epochs,
                    batch,
                    batches,
                    train_loss: loss_sum / samples,
                    validation_loss: eval.map(|e| e.loss),
                    train_accuracy: accuracy_sum / samples,
                    validation_accuracy: eval.map(|e| e.accuracy),
                };
                trace!("{last:?}");
                sink.on_batch(&last);
            }
            info!(
                "epoch {}/{} done: train_loss={} train_acc={}",
                epoch + 1,
                cfg.epochs,
                last.train_loss,
                last.train_accuracy
            );
        }

        info!(
            "training done: train_loss={} validation_loss={:?}",
            last.train_loss, last.validation_loss
        );
        Ok(TrainReport {
            epochs: cfg.epochs,
            last,
        })
    }

    fn check_dataset(&self, data: &Dataset, what: &str) -> Result<()> {
        if data.is_empty() {
            return Err(Error::InvalidData(format!("{what} dataset must not be empty")));
        }
        if data.input_dim() != self.input_len() {
            return Err(Error::InvalidData(format!(
                "{what} input_dim {} does not match network input length {}",
                data.input_dim(),
                self.input_len()
            )));
        }
        if data.target_dim() != self.output_len() {
            return Err(Error::InvalidData(format!(
                "{what} target_dim {} does not match network output length {}",
                data.target_dim(),
                self.output_len()
            )));
        }
        Ok(())
    }

    /// Approximate heap and inline footprint in bytes.
    pub fn estimate_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.layers.iter().map(Layer::estimate_size).sum::<usize>()
            + self.loss.as_ref().map_or(0, LossState::estimate_size)
    }
}

#[inline]
fn last_output(layers: &[Layer]) -> &[f32] {
    layers.last().map_or(&[][..], Layer::output)
}

fn forward_layers(
    layers: &mut [Layer],
    input: &[f32],
    training: bool,
    rng: &mut Mt19937,
) -> Result<()> {
    for idx in 0..layers.len() {
        // Borrow the previous output immutably and the current layer mutably.
        let (left, right) = layers.split_at_mut(idx);
        let layer_input = left.last().map_or(input, Layer::output);
        right[0].forward(layer_input, training, rng)?;
    }
    Ok(())
}

fn backward_layers(layers: &mut [Layer], input: &[f32], output_error: &[f32]) -> Result<()> {
    for idx in (0..layers.len()).rev() {
        let (left, right) = layers.split_at_mut(idx);
        let [current, after @ ..] = right else {
            continue;
        };
        let error_right = match after.first() {
            Some(next) => next.error_on_input().ok_or_else(|| {
                Error::InvalidConfig(format!("layer {} produced no input error", idx + 1))
            })?,
            None => output_error,
        };
        let output_left = left.last().map_or(input, Layer::output);
        current.backward(error_right, output_left)?;
    }
    Ok(())
}

fn evaluate_layers(
    layers: &mut [Layer],
    loss: &mut LossState,
    rng: &mut Mt19937,
    data: &Dataset,
    target: &mut [f32],
) -> Result<EvalReport> {
    let mut loss_sum = 0.0_f32;
    let mut accuracy_sum = 0.0_f32;
    for idx in 0..data.len() {
        data.target_into(idx, target)?;
        forward_layers(layers, data.input(idx), false, rng)?;
        let predicted = last_output(layers);
        loss_sum += loss.forward(predicted, target)?;
        accuracy_sum += labels::accuracy(predicted, target);
    }
    let n = data.len() as f32;
    Ok(EvalReport {
        loss: loss_sum / n,
        accuracy: accuracy_sum / n,
    })
}
