//! Training configuration.
//!
//! With the `serde` feature enabled a [`TrainConfig`] can also be read from JSON:
//!
//! ```json
//! {
//!   "loss": "CategoricalCrossEntropy",
//!   "optimizer": { "Adam": { "beta1": 0.89, "beta2": 0.99 } },
//!   "lr": 0.01,
//!   "batch_size": 40,
//!   "epochs": 10
//! }
//! ```

use crate::{Error, Loss, Optimizer, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrainConfig {
    pub loss: Loss,
    pub optimizer: Optimizer,
    pub lr: f32,
    /// Samples per optimizer step.
    pub batch_size: usize,
    pub epochs: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            loss: Loss::Mse,
            optimizer: Optimizer::default(),
            lr: 1e-2,
            batch_size: 1,
            epochs: 10,
        }
    }
}

impl TrainConfig {
    /// Validate hyperparameters that do not depend on the dataset.
    pub fn validate(&self) -> Result<()> {
        self.optimizer.validate()?;
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "lr must be finite and > 0, got {}",
                self.lr
            )));
        }
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be > 0".to_owned()));
        }
        Ok(())
    }

    /// Parse and validate a JSON config.
    #[cfg(feature = "serde")]
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(format!("config parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON config file.
    #[cfg(feature = "serde")]
    pub fn load_json(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    #[cfg(feature = "serde")]
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfig(format!("config serialize error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(TrainConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let bad_lr = TrainConfig {
            lr: 0.0,
            ..TrainConfig::default()
        };
        assert!(bad_lr.validate().is_err());

        let no_epochs = TrainConfig {
            epochs: 0,
            ..TrainConfig::default()
        };
        assert!(no_epochs.validate().is_err());

        let bad_opt = TrainConfig {
            optimizer: Optimizer::RmsProp { beta: 2.0 },
            ..TrainConfig::default()
        };
        assert!(bad_opt.validate().is_err());
    }
}
