//! Soft Dice loss for binary segmentation, differentiated by autodiff.
//!
//! For every sample `n` of the batch:
//! ```text
//! probs    = sigmoid(logits)
//! numer[n] = 2 * sum_hw(probs * labels) + smooth
//! denom[n] = sum_hw(probs^p + labels) + smooth
//! loss[n]  = 1 - numer[n] / denom[n]
//! ```
//!
//! [`SoftDiceLossV1`] lets Burn differentiate this expression. The analytic
//! counterpart is [`SoftDiceLossV2`](crate::SoftDiceLossV2).

use core::fmt;

use burn::{
    config::Config,
    tensor::{activation::sigmoid, backend::Backend, Int, Tensor},
};

use crate::{DiceLossError, DiceLossResult, DiceReduction};

/// Configuration for creating a binary soft Dice loss, shared by
/// [`SoftDiceLossV1`] and [`SoftDiceLossV2`](crate::SoftDiceLossV2).
#[derive(Config, Debug)]
pub struct SoftDiceLossConfig {
    /// Exponent applied to the probabilities in the denominator. Default: 1.0
    #[config(default = 1.0)]
    pub p: f64,
    /// Smoothing constant added to numerator and denominator. Default: 1.0
    #[config(default = 1.0)]
    pub smooth: f64,
    /// Aggregation of the per-sample losses. Default: mean
    #[config(default = "DiceReduction::Mean")]
    pub reduction: DiceReduction,
}

impl SoftDiceLossConfig {
    /// Initialize [soft Dice loss](SoftDiceLossV1) differentiated by autodiff.
    pub fn init(&self) -> SoftDiceLossV1 {
        self.assertions();
        SoftDiceLossV1 {
            p: self.p,
            smooth: self.smooth,
            reduction: self.reduction,
        }
    }

    pub(crate) fn assertions(&self) {
        assert!(
            self.p.is_finite() && self.p >= 1.0,
            "Exponent p for SoftDiceLoss must be at least 1, got {}",
            self.p
        );
        assert!(
            self.smooth.is_finite() && self.smooth >= 0.0,
            "Smooth for SoftDiceLoss must be non-negative, got {}",
            self.smooth
        );
    }
}

/// Soft Dice loss for binary segmentation whose gradient comes from autodiff.
#[derive(Clone, Debug)]
pub struct SoftDiceLossV1 {
    /// Exponent applied to the probabilities in the denominator.
    pub p: f64,
    /// Smoothing constant.
    pub smooth: f64,
    /// Aggregation of the per-sample losses.
    pub reduction: DiceReduction,
}

impl Default for SoftDiceLossV1 {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SoftDiceLossV1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SoftDiceLossV1 {{p: {}, smooth: {}, reduction: {:?}}}",
            self.p, self.smooth, self.reduction
        )
    }
}

impl SoftDiceLossV1 {
    /// Create a new soft Dice loss with default configuration.
    pub fn new() -> Self {
        SoftDiceLossConfig::new().init()
    }

    /// Compute the criterion with the configured reduction.
    ///
    /// # Shapes
    ///
    /// - logits: `[batch_size, height, width]`
    /// - labels: `[batch_size, height, width]`, values in `{0, 1}`
    /// - output: `[1]`, or `[batch_size]` without reduction
    ///
    /// # Errors
    ///
    /// Returns [`DiceLossError::ShapeMismatch`] if logits and labels differ in shape.
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 3>,
        labels: Tensor<B, 3, Int>,
    ) -> DiceLossResult<Tensor<B, 1>> {
        let loss = self.forward_no_reduction(logits, labels)?;
        Ok(self.reduction.apply(loss))
    }

    /// Compute the per-sample criterion.
    ///
    /// # Shapes
    ///
    /// - logits: `[batch_size, height, width]`
    /// - labels: `[batch_size, height, width]`
    /// - output: `[batch_size]`
    pub fn forward_no_reduction<B: Backend>(
        &self,
        logits: Tensor<B, 3>,
        labels: Tensor<B, 3, Int>,
    ) -> DiceLossResult<Tensor<B, 1>> {
        check_shapes(&logits, &labels)?;

        let probs = sigmoid(logits);
        let (numer, denom) = dice_terms(probs, labels.float(), self.p, self.smooth);

        Ok(numer.div(denom).neg().add_scalar(1.0))
    }
}

/// Smoothed numerator and denominator of the binary soft Dice ratio, one entry per sample.
pub(crate) fn dice_terms<B: Backend>(
    probs: Tensor<B, 3>,
    labels: Tensor<B, 3>,
    p: f64,
    smooth: f64,
) -> (Tensor<B, 1>, Tensor<B, 1>) {
    let [batch_size, ..] = probs.dims();

    let numer = (probs.clone() * labels.clone())
        .sum_dim(2)
        .sum_dim(1)
        .reshape([batch_size])
        .mul_scalar(2.0)
        .add_scalar(smooth);
    let denom = (probs.powf_scalar(p) + labels)
        .sum_dim(2)
        .sum_dim(1)
        .reshape([batch_size])
        .add_scalar(smooth);

    (numer, denom)
}

pub(crate) fn check_shapes<B: Backend>(
    logits: &Tensor<B, 3>,
    labels: &Tensor<B, 3, Int>,
) -> DiceLossResult<()> {
    let logits_dims = logits.dims();
    let labels_dims = labels.dims();
    if logits_dims != labels_dims {
        return Err(DiceLossError::ShapeMismatch {
            logits: logits_dims.to_vec(),
            labels: labels_dims.to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use burn::tensor::{Distribution, TensorData, Tolerance, Transaction};

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn soft_dice_v1_zero_logits_all_positive_labels() {
        let device = Default::default();
        let loss = SoftDiceLossV1::new();

        // probs = 0.5, numer = 2 * 2 + 1 = 5, denom = (2 + 4) + 1 = 7
        let logits = Tensor::<TestBackend, 3>::zeros([1, 2, 2], &device);
        let labels = Tensor::<TestBackend, 3, Int>::ones([1, 2, 2], &device);

        let result = loss.forward(logits, labels).expect("shapes match");

        let expected = TensorData::from([1.0 - 5.0 / 7.0]);
        result
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::relative(1e-6));
    }

    #[test]
    fn soft_dice_v1_matches_closed_form_per_sample() {
        let device = Default::default();
        let loss = SoftDiceLossConfig::new()
            .with_p(2.0)
            .with_smooth(0.5)
            .init();

        let logits = Tensor::<TestBackend, 3>::from_data(
            TensorData::from([[[0.0, 1.0], [-1.0, 2.0]], [[3.0, -2.0], [0.5, -0.5]]]),
            &device,
        );
        let labels = Tensor::<TestBackend, 3, Int>::from_data(
            TensorData::from([[[1, 0], [0, 1]], [[1, 1], [0, 0]]]),
            &device,
        );

        let sig = |x: f64| 1.0 / (1.0 + (-x).exp());
        let expected = |xs: [f64; 4], ys: [f64; 4]| {
            let numer: f64 = 2.0 * xs.iter().zip(ys).map(|(x, y)| sig(*x) * y).sum::<f64>() + 0.5;
            let denom: f64 = xs.iter().zip(ys).map(|(x, y)| sig(*x).powi(2) + y).sum::<f64>() + 0.5;
            1.0 - numer / denom
        };
        let expected = TensorData::from([
            expected([0.0, 1.0, -1.0, 2.0], [1.0, 0.0, 0.0, 1.0]) as f32,
            expected([3.0, -2.0, 0.5, -0.5], [1.0, 1.0, 0.0, 0.0]) as f32,
        ]);

        let result = loss
            .forward_no_reduction(logits, labels)
            .expect("shapes match");
        result
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::absolute(1e-6));
    }

    #[test]
    fn soft_dice_v1_reductions_aggregate_per_sample_losses() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 3>::random(
            [3, 4, 4],
            Distribution::Normal(0.0, 2.0),
            &device,
        );
        let labels = Tensor::<TestBackend, 3>::random(
            [3, 4, 4],
            Distribution::Uniform(0.0, 1.0),
            &device,
        )
        .round()
        .int();

        let per_sample = SoftDiceLossV1::new()
            .forward_no_reduction(logits.clone(), labels.clone())
            .expect("shapes match");
        let mean = SoftDiceLossV1::new()
            .forward(logits.clone(), labels.clone())
            .expect("shapes match");
        let sum = SoftDiceLossConfig::new()
            .with_reduction(DiceReduction::Sum)
            .init()
            .forward(logits, labels)
            .expect("shapes match");

        let [per_sample_data, per_sample_mean, per_sample_sum, mean_data, sum_data] =
            Transaction::default()
                .register(per_sample.clone())
                .register(per_sample.clone().mean())
                .register(per_sample.sum())
                .register(mean)
                .register(sum)
                .execute()
                .try_into()
                .expect("Correct amount of tensor data");

        assert_eq!(per_sample_data.shape, vec![3]);
        mean_data.assert_approx_eq::<f32>(&per_sample_mean, Tolerance::relative(1e-6));
        sum_data.assert_approx_eq::<f32>(&per_sample_sum, Tolerance::relative(1e-6));
    }

    #[test]
    fn soft_dice_v1_forward_is_idempotent() {
        let device = Default::default();
        let loss = SoftDiceLossV1::new();
        let logits = Tensor::<TestBackend, 3>::random(
            [2, 8, 8],
            Distribution::Normal(0.0, 3.0),
            &device,
        );
        let labels = Tensor::<TestBackend, 3, Int>::ones([2, 8, 8], &device);

        let first = loss
            .forward_no_reduction(logits.clone(), labels.clone())
            .expect("shapes match");
        let second = loss
            .forward_no_reduction(logits, labels)
            .expect("shapes match");

        first.into_data().assert_eq(&second.into_data(), true);
    }

    #[test]
    fn soft_dice_v1_zero_smooth_on_empty_masks_yields_nan() {
        let device = Default::default();
        let loss = SoftDiceLossConfig::new().with_smooth(0.0).init();

        // probs underflow to 0 in f32, labels are empty: 0 / 0
        let logits = Tensor::<TestBackend, 3>::full([1, 2, 2], -200.0, &device);
        let labels = Tensor::<TestBackend, 3, Int>::zeros([1, 2, 2], &device);

        let result = loss.forward(logits, labels).expect("shapes match");

        let value = result.into_data().iter::<f32>().next().expect("one value");
        assert!(value.is_nan());
    }

    #[test]
    fn soft_dice_v1_mismatched_shapes_returns_error() {
        let device = Default::default();
        let loss = SoftDiceLossV1::new();

        let logits = Tensor::<TestBackend, 3>::zeros([1, 2, 2], &device);
        let labels = Tensor::<TestBackend, 3, Int>::zeros([1, 2, 3], &device);

        match loss.forward(logits, labels) {
            Err(DiceLossError::ShapeMismatch { logits, labels }) => {
                assert_eq!(logits, vec![1, 2, 2]);
                assert_eq!(labels, vec![1, 2, 3]);
            }
            other => panic!("Expected ShapeMismatch error, got: {other:?}"),
        }
    }

    #[test]
    #[should_panic = "Exponent p for SoftDiceLoss must be at least 1"]
    fn soft_dice_config_small_exponent_panics() {
        let _loss = SoftDiceLossConfig::new().with_p(0.5).init();
    }

    #[test]
    #[should_panic = "Smooth for SoftDiceLoss must be non-negative"]
    fn soft_dice_config_negative_smooth_panics() {
        let _loss = SoftDiceLossConfig::new().with_smooth(-1.0).init();
    }

    #[test]
    fn soft_dice_v1_display_shows_parameters() {
        let loss = SoftDiceLossConfig::new().with_p(2.0).init();

        assert_eq!(
            format!("{loss}"),
            "SoftDiceLossV1 {p: 2, smooth: 1, reduction: Mean}"
        );
    }
}
