//! Error types for the soft Dice losses.

use dice_extra_ops::OneHotError;
use thiserror::Error;

/// Errors that can occur during soft Dice loss computation.
///
/// Numerical degeneracies (for example `smooth = 0` with empty masks) are not
/// errors: they propagate as NaN or infinity in the returned tensor.
#[derive(Debug, Error)]
pub enum DiceLossError {
    /// Logits and labels do not describe the same pixels
    #[error("incompatible tensor shapes: logits shape {logits:?} does not match labels shape {labels:?}")]
    ShapeMismatch {
        logits: Vec<usize>,
        labels: Vec<usize>,
    },

    /// The per-class weight vector does not have one entry per class
    #[error("weight vector has {actual} entries but logits have {expected} classes")]
    WeightLengthMismatch { expected: usize, actual: usize },

    /// The label map could not be one-hot encoded
    #[error(transparent)]
    OneHot(#[from] OneHotError),
}

/// A specialized `Result` type for soft Dice loss operations.
pub type DiceLossResult<T> = Result<T, DiceLossError>;
