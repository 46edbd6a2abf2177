//! Batch soft Dice loss for multi-class segmentation.
//!
//! Same class statistics as the [generalized loss](crate::GeneralizedSoftDiceLoss),
//! but numerator and denominator are summed over the whole batch and all
//! classes before a single Dice ratio is taken:
//! ```text
//! loss = 1 - (2 * sum_nc numer[n, c] + smooth) / (sum_nc denom[n, c] + smooth)
//! ```

use core::fmt;

use burn::{
    config::Config,
    tensor::{backend::Backend, Int, Tensor},
};

use crate::{
    generalized::{assert_parameters, class_terms, dice_ratio_loss},
    DiceLossResult,
};

/// Configuration for creating a [batch soft Dice loss](BatchSoftDiceLoss).
#[derive(Config, Debug)]
pub struct BatchSoftDiceLossConfig {
    /// Exponent applied to probabilities and one-hot targets. Default: 1.0
    #[config(default = 1.0)]
    pub p: f64,
    /// Smoothing constant. Default: 1.0
    #[config(default = 1.0)]
    pub smooth: f64,
    /// Optional per-class weights, one entry per class.
    #[config(default = "None")]
    pub weight: Option<Vec<f64>>,
    /// Label value excluded from the loss. Default: 255
    #[config(default = 255)]
    pub ignore_index: i64,
}

impl BatchSoftDiceLossConfig {
    /// Initialize [batch soft Dice loss](BatchSoftDiceLoss).
    pub fn init(&self) -> BatchSoftDiceLoss {
        assert_parameters("BatchSoftDiceLoss", self.p, self.smooth, self.weight.as_deref());
        BatchSoftDiceLoss {
            p: self.p,
            smooth: self.smooth,
            weight: self.weight.clone(),
            ignore_index: self.ignore_index,
        }
    }
}

/// Soft Dice loss computed once over the whole batch.
#[derive(Clone, Debug)]
pub struct BatchSoftDiceLoss {
    /// Exponent applied to probabilities and one-hot targets.
    pub p: f64,
    /// Smoothing constant.
    pub smooth: f64,
    /// Optional per-class weights.
    pub weight: Option<Vec<f64>>,
    /// Label value excluded from the loss.
    pub ignore_index: i64,
}

impl Default for BatchSoftDiceLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchSoftDiceLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BatchSoftDiceLoss {{p: {}, smooth: {}, weight: {:?}, ignore_index: {}}}",
            self.p, self.smooth, self.weight, self.ignore_index
        )
    }
}

impl BatchSoftDiceLoss {
    /// Create a new batch soft Dice loss with default configuration.
    pub fn new() -> Self {
        BatchSoftDiceLossConfig::new().init()
    }

    /// Compute the criterion.
    ///
    /// # Shapes
    ///
    /// - logits: `[batch_size, num_classes, height, width]`
    /// - labels: `[batch_size, height, width]`, class ids or `ignore_index`
    /// - output: `[1]`
    ///
    /// # Errors
    ///
    /// Returns an error if the shapes disagree, the weight vector length differs from
    /// the number of classes, or a label is outside `[0, num_classes)`.
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 4>,
        labels: Tensor<B, 3, Int>,
    ) -> DiceLossResult<Tensor<B, 1>> {
        let (numer, denom) = class_terms(
            logits,
            labels,
            self.p,
            self.weight.as_deref(),
            self.ignore_index,
        )?;

        Ok(dice_ratio_loss(numer.sum(), denom.sum(), self.smooth))
    }
}
