//! Additional tensor operations for the soft Dice losses
//!
//! This crate provides operations that the Dice losses need but that are not
//! available in the core Burn framework: ignore-aware one-hot encoding of class
//! maps and the sigmoid derivative expressed in terms of probabilities.

use burn::prelude::*;

mod one_hot;
mod sigmoid;

// Convenient re-exports
pub use one_hot::{one_hot_with_ignore, OneHotError, OneHotIgnore, OneHotResult};
pub use sigmoid::sigmoid_derivative;

/// Additional operations for Burn float tensors
pub trait TensorExtraOps<B: Backend, const D: usize> {
    /// Derivative of the sigmoid, given the sigmoid output `s`: `s * (1 - s)`.
    fn sigmoid_derivative(self) -> Self;
}

impl<B: Backend, const D: usize> TensorExtraOps<B, D> for Tensor<B, D> {
    fn sigmoid_derivative(self) -> Self {
        sigmoid_derivative(self)
    }
}
