//! Binary soft Dice loss with a hand-derived gradient.
//!
//! The loss of one sample is `1 - U / D` with `U = 2 Σ s·y + smooth` and
//! `D = Σ (s^p + y) + smooth`, where `s = sigmoid(x)`. Writing, per pixel,
//! `M = U - 2·s·y` and `N = D - s^p` (the parts of `U` and `D` that do not
//! depend on that pixel), the derivative of the ratio with respect to `s` is
//!
//! ```text
//! y = 1:  (2(1 - p)·s^p - p·s^(p-1)·M + 2N) / (s^p + N)^2
//! y = 0:  (-p·s^(p-1)·M) / (s^p + N)^2
//! ```
//!
//! Multiplying by `s(1 - s)` gives the derivative with respect to the logit,
//! and the sign flips because the loss is `1 - U / D`. Evaluating this closed
//! form avoids chaining autodiff through `pow` and `sigmoid`, which loses
//! precision at large logit magnitudes.

use burn::tensor::{activation::sigmoid, backend::Backend, Int, Tensor};
use dice_extra_ops::TensorExtraOps;

use crate::{
    binary::{check_shapes, dice_terms},
    DiceLossResult,
};

/// A computation with an explicitly paired forward and backward pass.
///
/// `forward` returns the output together with everything `backward` needs.
/// The cache is handed back to `backward` by value, so each forward result can
/// be differentiated at most once, and never without having run forward.
pub trait CustomGradient<B: Backend> {
    /// Inputs of the forward pass.
    type Input;
    /// Output of the forward pass, also the shape of the upstream gradient.
    type Output;
    /// Intermediates retained between forward and backward.
    type Cache;
    /// Gradient with respect to the differentiable input.
    type Gradient;

    /// Runs the forward pass.
    fn forward(&self, input: Self::Input) -> DiceLossResult<(Self::Output, Self::Cache)>;

    /// Maps the upstream gradient to the gradient of the differentiable input.
    fn backward(&self, cache: Self::Cache, grad_output: Self::Output) -> Self::Gradient;
}

/// Intermediates of one [`SoftDiceFunction`] forward pass.
///
/// Deliberately not `Clone`: it is consumed by exactly one backward pass.
#[derive(Debug)]
pub struct SoftDiceCache<B: Backend> {
    pub(crate) probs: Tensor<B, 3>,
    pub(crate) labels: Tensor<B, 3>,
    pub(crate) numer: Tensor<B, 1>,
    pub(crate) denom: Tensor<B, 1>,
    pub(crate) p: f64,
    pub(crate) smooth: f64,
}

impl<B: Backend> SoftDiceCache<B> {
    /// Smoothed numerator `2 Σ s·y + smooth`, one entry per sample.
    pub fn numer(&self) -> &Tensor<B, 1> {
        &self.numer
    }

    /// Smoothed denominator `Σ (s^p + y) + smooth`, one entry per sample.
    pub fn denom(&self) -> &Tensor<B, 1> {
        &self.denom
    }

    /// Smoothing constant used in the forward pass.
    pub const fn smooth(&self) -> f64 {
        self.smooth
    }
}

/// Per-sample binary soft Dice loss with an analytic gradient w.r.t. the logits.
///
/// `p` and `smooth` are constants of the function: no gradient flows to them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SoftDiceFunction {
    /// Exponent applied to the probabilities in the denominator.
    pub p: f64,
    /// Smoothing constant.
    pub smooth: f64,
}

impl SoftDiceFunction {
    /// Create a function with the given exponent and smoothing constant.
    pub const fn new(p: f64, smooth: f64) -> Self {
        Self { p, smooth }
    }
}

impl Default for SoftDiceFunction {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

impl<B: Backend> CustomGradient<B> for SoftDiceFunction {
    type Input = (Tensor<B, 3>, Tensor<B, 3, Int>);
    type Output = Tensor<B, 1>;
    type Cache = SoftDiceCache<B>;
    type Gradient = Tensor<B, 3>;

    /// # Shapes
    ///
    /// - logits: `[batch_size, height, width]`
    /// - labels: `[batch_size, height, width]`, values in `{0, 1}`
    /// - output: `[batch_size]`
    fn forward(
        &self,
        (logits, labels): Self::Input,
    ) -> DiceLossResult<(Tensor<B, 1>, Self::Cache)> {
        check_shapes(&logits, &labels)?;

        let probs = sigmoid(logits);
        let labels = labels.float();
        let (numer, denom) = dice_terms(probs.clone(), labels.clone(), self.p, self.smooth);
        let loss = numer.clone().div(denom.clone()).neg().add_scalar(1.0);

        let cache = SoftDiceCache {
            probs,
            labels,
            numer,
            denom,
            p: self.p,
            smooth: self.smooth,
        };
        Ok((loss, cache))
    }

    /// # Shapes
    ///
    /// - grad_output: `[batch_size]`
    /// - output: `[batch_size, height, width]`
    fn backward(&self, cache: Self::Cache, grad_output: Tensor<B, 1>) -> Tensor<B, 3> {
        let SoftDiceCache {
            probs,
            labels,
            numer,
            denom,
            p,
            ..
        } = cache;
        let shape = probs.dims();
        let [batch_size, ..] = shape;
        let per_pixel = |t: Tensor<B, 1>| t.reshape([batch_size, 1, 1]).expand(shape);

        let probs_pow = probs.clone().powf_scalar(p);
        let m = per_pixel(numer) - (probs.clone() * labels.clone()).mul_scalar(2.0);
        let n = per_pixel(denom) - probs_pow.clone();

        let term = probs.clone().powf_scalar(p - 1.0).mul_scalar(p) * m;
        let positive = probs_pow.clone().mul_scalar(2.0 * (1.0 - p)) - term.clone()
            + n.clone().mul_scalar(2.0);
        let grad = term.neg().mask_where(labels.equal_elem(1.0), positive);

        let grad = grad / (probs_pow + n).powf_scalar(2.0) * probs.sigmoid_derivative();
        (grad * per_pixel(grad_output)).neg()
    }
}
