//! Sigmoid derivative in probability space.

use burn::prelude::*;

/// Computes `s * (1 - s)` element-wise, where `s = sigmoid(x)`.
///
/// This is `d sigmoid(x) / dx` written in terms of the already computed
/// probabilities, so callers holding the forward output never re-evaluate
/// the exponential.
pub fn sigmoid_derivative<B: Backend, const D: usize>(probs: Tensor<B, D>) -> Tensor<B, D> {
    probs.clone() * probs.neg().add_scalar(1.0)
}
