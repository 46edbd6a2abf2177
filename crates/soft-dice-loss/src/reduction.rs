//! Reduction policies for per-sample losses.
//!
//! Burn's own [`Reduction`](burn::nn::loss::Reduction) has no "keep every sample"
//! policy, which the Dice losses need, so they carry their own enum.

use burn::prelude::*;

/// How a vector of per-sample losses is aggregated.
#[derive(Config, Debug, PartialEq, Eq, Copy, Hash)]
pub enum DiceReduction {
    /// Arithmetic mean over the batch.
    Mean,
    /// Sum over the batch.
    Sum,
    /// Per-sample losses are returned unchanged.
    None,
}

impl Default for DiceReduction {
    fn default() -> Self {
        Self::Mean
    }
}

impl From<&str> for DiceReduction {
    /// Parses a policy name. Unknown names fall back to [`DiceReduction::None`]
    /// instead of failing.
    fn from(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "mean" => Self::Mean,
            "sum" => Self::Sum,
            "none" => Self::None,
            other => {
                tracing::debug!(reduction = other, "unknown reduction, losses are not reduced");
                Self::None
            }
        }
    }
}

impl DiceReduction {
    /// Applies the policy to a loss vector.
    ///
    /// # Shapes
    ///
    /// - loss: `[batch_size]`
    /// - output: `[1]` for `Mean` and `Sum`, `[batch_size]` for `None`
    pub fn apply<B: Backend>(&self, loss: Tensor<B, 1>) -> Tensor<B, 1> {
        match self {
            Self::Mean => loss.mean(),
            Self::Sum => loss.sum(),
            Self::None => loss,
        }
    }
}
