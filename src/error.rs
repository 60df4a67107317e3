use thiserror::Error;

use crate::layer::Shape;

/// Errors reported by layers, losses, optimizers and the training loop.
///
/// Errors are propagated unchanged from the component that raised them up to the caller.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("unsupported layer kind id {0}")]
    UnsupportedLayerKind(u8),

    #[error("unsupported weights initializer id {0}")]
    UnsupportedInitializer(u8),

    #[error("unsupported activation id {0}")]
    UnsupportedActivation(u8),

    #[error("unsupported loss id {0}")]
    UnsupportedLoss(u8),

    #[error("unsupported optimizer id {0}")]
    UnsupportedOptimizer(u8),

    #[error("shape has a zero dimension")]
    ShapeZero,

    #[error("shape is too big")]
    ShapeTooBig,

    #[error("input shape {input} does not match output shape {output}")]
    ShapeMismatch { input: Shape, output: Shape },

    #[error("activation backward called before forward (no derivative cache)")]
    MissingActivationCache,

    #[error("loss backward called before forward (no derivative scratch)")]
    MissingLossScratch,

    #[error("mask index {index} out of bounds for length {len}")]
    MaskOutOfBounds { index: usize, len: usize },

    #[error("network has no layers")]
    EmptyNetwork,

    #[error("invalid batch size {batch_size} for dataset of length {len}")]
    InvalidBatch { batch_size: usize, len: usize },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, Error>;
