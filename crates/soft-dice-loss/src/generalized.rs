//! Generalized soft Dice loss for multi-class segmentation.
//!
//! Class statistics are computed against an ignore-aware one-hot encoding of the
//! label map, optionally weighted per class, then summed over classes before the
//! Dice ratio is taken for each sample:
//! ```text
//! numer[n, c] = w[c] * sum_hw(probs * one_hot)
//! denom[n, c] = w[c] * sum_hw(probs^p + one_hot^p)
//! loss[n]     = 1 - (2 * sum_c numer[n, c] + smooth) / (sum_c denom[n, c] + smooth)
//! ```
//!
//! The gradient comes from autodiff.

use core::fmt;

use burn::{
    config::Config,
    tensor::{activation::sigmoid, backend::Backend, Int, Tensor},
};
use dice_extra_ops::OneHotIgnore;

use crate::{DiceLossError, DiceLossResult, DiceReduction};

/// Configuration for creating a [generalized soft Dice loss](GeneralizedSoftDiceLoss).
#[derive(Config, Debug)]
pub struct GeneralizedSoftDiceLossConfig {
    /// Exponent applied to probabilities and one-hot targets. Default: 1.0
    #[config(default = 1.0)]
    pub p: f64,
    /// Smoothing constant. Default: 1.0
    #[config(default = 1.0)]
    pub smooth: f64,
    /// Aggregation of the per-sample losses. Default: mean
    #[config(default = "DiceReduction::Mean")]
    pub reduction: DiceReduction,
    /// Optional per-class weights, one entry per class.
    #[config(default = "None")]
    pub weight: Option<Vec<f64>>,
    /// Label value excluded from the loss. Default: 255
    #[config(default = 255)]
    pub ignore_index: i64,
}

impl GeneralizedSoftDiceLossConfig {
    /// Initialize [generalized soft Dice loss](GeneralizedSoftDiceLoss).
    pub fn init(&self) -> GeneralizedSoftDiceLoss {
        self.assertions();
        GeneralizedSoftDiceLoss {
            p: self.p,
            smooth: self.smooth,
            reduction: self.reduction,
            weight: self.weight.clone(),
            ignore_index: self.ignore_index,
        }
    }

    fn assertions(&self) {
        assert_parameters("GeneralizedSoftDiceLoss", self.p, self.smooth, self.weight.as_deref());
    }
}

/// Generalized soft Dice loss over `C` classes with an ignore label.
#[derive(Clone, Debug)]
pub struct GeneralizedSoftDiceLoss {
    /// Exponent applied to probabilities and one-hot targets.
    pub p: f64,
    /// Smoothing constant.
    pub smooth: f64,
    /// Aggregation of the per-sample losses.
    pub reduction: DiceReduction,
    /// Optional per-class weights.
    pub weight: Option<Vec<f64>>,
    /// Label value excluded from the loss.
    pub ignore_index: i64,
}

impl Default for GeneralizedSoftDiceLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GeneralizedSoftDiceLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GeneralizedSoftDiceLoss {{p: {}, smooth: {}, reduction: {:?}, weight: {:?}, ignore_index: {}}}",
            self.p, self.smooth, self.reduction, self.weight, self.ignore_index
        )
    }
}

impl GeneralizedSoftDiceLoss {
    /// Create a new generalized soft Dice loss with default configuration.
    pub fn new() -> Self {
        GeneralizedSoftDiceLossConfig::new().init()
    }

    /// Compute the criterion with the configured reduction.
    ///
    /// # Shapes
    ///
    /// - logits: `[batch_size, num_classes, height, width]`
    /// - labels: `[batch_size, height, width]`, class ids or `ignore_index`
    /// - output: `[1]`, or `[batch_size]` without reduction
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
        let loss = self.forward_no_reduction(logits, labels)?;
        Ok(self.reduction.apply(loss))
    }

    /// Compute the per-sample criterion.
    ///
    /// # Shapes
    ///
    /// - logits: `[batch_size, num_classes, height, width]`
    /// - labels: `[batch_size, height, width]`
    /// - output: `[batch_size]`
    pub fn forward_no_reduction<B: Backend>(
        &self,
        logits: Tensor<B, 4>,
        labels: Tensor<B, 3, Int>,
    ) -> DiceLossResult<Tensor<B, 1>> {
        let [batch_size, ..] = logits.dims();
        let (numer, denom) = class_terms(
            logits,
            labels,
            self.p,
            self.weight.as_deref(),
            self.ignore_index,
        )?;

        let numer = numer.sum_dim(1).reshape([batch_size]);
        let denom = denom.sum_dim(1).reshape([batch_size]);

        Ok(dice_ratio_loss(numer, denom, self.smooth))
    }
}

/// `1 - (2 * numer + smooth) / (denom + smooth)`, element-wise.
pub(crate) fn dice_ratio_loss<B: Backend>(
    numer: Tensor<B, 1>,
    denom: Tensor<B, 1>,
    smooth: f64,
) -> Tensor<B, 1> {
    numer
        .mul_scalar(2.0)
        .add_scalar(smooth)
        .div(denom.add_scalar(smooth))
        .neg()
        .add_scalar(1.0)
}

/// Weighted per-sample, per-class overlap terms `(numer, denom)`, both `[batch_size, num_classes]`.
pub(crate) fn class_terms<B: Backend>(
    logits: Tensor<B, 4>,
    labels: Tensor<B, 3, Int>,
    p: f64,
    weight: Option<&[f64]>,
    ignore_index: i64,
) -> DiceLossResult<(Tensor<B, 2>, Tensor<B, 2>)> {
    let [batch_size, num_classes, height, width] = logits.dims();
    let labels_dims = labels.dims();
    if labels_dims != [batch_size, height, width] {
        return Err(DiceLossError::ShapeMismatch {
            logits: logits.dims().to_vec(),
            labels: labels_dims.to_vec(),
        });
    }
    if let Some(weight) = weight {
        if weight.len() != num_classes {
            return Err(DiceLossError::WeightLengthMismatch {
                expected: num_classes,
                actual: weight.len(),
            });
        }
    }

    let device = logits.device();
    let one_hot = labels.one_hot_ignore(num_classes, ignore_index)?;
    let probs = sigmoid(logits);

    let numer = (probs.clone() * one_hot.clone())
        .sum_dim(3)
        .sum_dim(2)
        .reshape([batch_size, num_classes]);
    let denom = (probs.powf_scalar(p) + one_hot.powf_scalar(p))
        .sum_dim(3)
        .sum_dim(2)
        .reshape([batch_size, num_classes]);

    match weight {
        Some(weight) => {
            let weight = Tensor::<B, 1>::from_floats(weight, &device)
                .reshape([1, num_classes])
                .expand([batch_size, num_classes]);
            Ok((numer * weight.clone(), denom * weight))
        }
        None => Ok((numer, denom)),
    }
}

pub(crate) fn assert_parameters(name: &str, p: f64, smooth: f64, weight: Option<&[f64]>) {
    assert!(
        p.is_finite() && p >= 1.0,
        "Exponent p for {name} must be at least 1, got {p}"
    );
    assert!(
        smooth.is_finite() && smooth >= 0.0,
        "Smooth for {name} must be non-negative, got {smooth}"
    );
    if let Some(weight) = weight {
        assert!(
            weight.iter().all(|w| w.is_finite()),
            "Class weights for {name} must be finite, got {weight:?}"
        );
    }
}
