//! Agreement check between the autodiff and the analytic soft Dice gradients.
//!
//! Each iteration draws a seeded random batch of logits and binary labels,
//! evaluates [`SoftDiceLossV1`] and [`SoftDiceLossV2`] on identical leaves, and
//! compares losses and logit gradients.

use anyhow::{bail, Result};
use burn::{
    backend::Autodiff,
    config::Config,
    tensor::{backend::Backend, Int, Tensor, TensorData},
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use soft_dice_loss::{SoftDiceLossConfig, SoftDiceLossV1, SoftDiceLossV2};

/// Configuration of a gradient agreement run.
#[derive(Config, Debug)]
pub struct GradientCheckConfig {
    /// Loss parameters shared by both variants.
    pub loss: SoftDiceLossConfig,
    #[config(default = 100)]
    pub iterations: usize,
    #[config(default = 2)]
    pub batch_size: usize,
    #[config(default = 64)]
    pub height: usize,
    #[config(default = 64)]
    pub width: usize,
    /// Logits are drawn uniformly from `[-logit_range, logit_range)`.
    #[config(default = 6.0)]
    pub logit_range: f64,
    #[config(default = 15)]
    pub seed: u64,
    /// Maximum accepted element-wise relative gradient difference.
    #[config(default = 1e-4)]
    pub tolerance: f64,
    /// Fraction of the largest gradient magnitude below which elements are
    /// compared against that fraction instead of their own magnitude.
    #[config(default = 1e-2)]
    pub relative_floor: f64,
}

impl GradientCheckConfig {
    /// Rejects parameters the losses or the batch generator cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid parameter.
    pub fn validate(&self) -> Result<()> {
        validate_loss(&self.loss)?;
        validate_shape([self.batch_size, self.height, self.width])?;
        if !(self.logit_range.is_finite() && self.logit_range > 0.0) {
            bail!("logit range must be positive and finite, got {}", self.logit_range);
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            bail!("tolerance must be non-negative and finite, got {}", self.tolerance);
        }
        if !(0.0..=1.0).contains(&self.relative_floor) {
            bail!("relative floor must lie in [0, 1], got {}", self.relative_floor);
        }
        Ok(())
    }
}

/// Checks the loss parameters that `init` and `init_v2` would otherwise assert on.
///
/// # Errors
///
/// Returns an error if `p < 1` or `smooth` is negative or either is not finite.
pub fn validate_loss(config: &SoftDiceLossConfig) -> Result<()> {
    if !(config.p.is_finite() && config.p >= 1.0) {
        bail!("exponent p must be at least 1, got {}", config.p);
    }
    if !(config.smooth.is_finite() && config.smooth >= 0.0) {
        bail!("smooth must be non-negative and finite, got {}", config.smooth);
    }
    Ok(())
}

/// Checks that a `[batch_size, height, width]` batch shape has no empty axis.
///
/// # Errors
///
/// Returns an error naming the empty axis.
pub fn validate_shape(shape: [usize; 3]) -> Result<()> {
    for (axis, size) in ["batch size", "height", "width"].into_iter().zip(shape) {
        if size == 0 {
            bail!("{axis} must be positive");
        }
    }
    Ok(())
}

/// Worst differences observed over a gradient agreement run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradientReport {
    pub iterations: usize,
    pub max_loss_diff: f64,
    pub max_abs_grad_diff: f64,
    pub max_rel_grad_diff: f64,
}

/// A seeded batch of logits and binary labels.
pub struct RandomBatch {
    rng: StdRng,
    shape: [usize; 3],
    logit_range: f64,
}

impl RandomBatch {
    pub fn new(seed: u64, shape: [usize; 3], logit_range: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            shape,
            logit_range,
        }
    }

    /// Draws the next `(logits, labels)` pair.
    pub fn draw(&mut self) -> (TensorData, TensorData) {
        let size = self.shape.iter().product::<usize>();
        let range = self.logit_range;
        let logits: Vec<f32> = (0..size)
            .map(|_| self.rng.random_range(-range..range) as f32)
            .collect();
        let labels: Vec<i64> = (0..size)
            .map(|_| i64::from(self.rng.random_bool(0.5)))
            .collect();
        (
            TensorData::new(logits, self.shape),
            TensorData::new(labels, self.shape),
        )
    }
}

/// Runs the agreement check on `device`.
///
/// # Errors
///
/// Returns an error if either loss rejects its inputs or if some gradient element
/// differs by more than the configured relative tolerance.
pub fn run_gradient_check<B: Backend>(
    config: &GradientCheckConfig,
    device: &B::Device,
) -> Result<GradientReport> {
    config.validate()?;

    let loss_v1 = config.loss.init();
    let loss_v2 = config.loss.init_v2();
    let shape = [config.batch_size, config.height, config.width];
    let mut batches = RandomBatch::new(config.seed, shape, config.logit_range);
    let mut report = GradientReport::default();

    tracing::info!(
        iterations = config.iterations,
        ?shape,
        p = config.loss.p,
        smooth = config.loss.smooth,
        reduction = ?config.loss.reduction,
        "starting gradient check"
    );

    for iteration in 0..config.iterations {
        let (logits, labels) = batches.draw();
        let step = compare_once::<B>(
            &loss_v1,
            &loss_v2,
            logits,
            labels,
            config.relative_floor,
            device,
        )?;

        tracing::debug!(
            iteration,
            loss_diff = step.loss_diff,
            abs_grad_diff = step.abs_grad_diff,
            rel_grad_diff = step.rel_grad_diff,
            "iteration compared"
        );
        if step.rel_grad_diff > config.tolerance {
            bail!(
                "gradient mismatch at iteration {iteration}: relative difference {} exceeds {}",
                step.rel_grad_diff,
                config.tolerance
            );
        }

        report.iterations += 1;
        report.max_loss_diff = report.max_loss_diff.max(step.loss_diff);
        report.max_abs_grad_diff = report.max_abs_grad_diff.max(step.abs_grad_diff);
        report.max_rel_grad_diff = report.max_rel_grad_diff.max(step.rel_grad_diff);
    }

    tracing::info!(?report, "gradient check passed");
    Ok(report)
}

struct StepDiff {
    loss_diff: f64,
    abs_grad_diff: f64,
    rel_grad_diff: f64,
}

fn compare_once<B: Backend>(
    loss_v1: &SoftDiceLossV1,
    loss_v2: &SoftDiceLossV2,
    logits: TensorData,
    labels: TensorData,
    relative_floor: f64,
    device: &B::Device,
) -> Result<StepDiff> {
    let logits_v1 = Tensor::<Autodiff<B>, 3>::from_data(logits.clone(), device).require_grad();
    let logits_v2 = Tensor::<Autodiff<B>, 3>::from_data(logits, device).require_grad();
    let labels = Tensor::<Autodiff<B>, 3, Int>::from_data(labels, device);

    let value_v1 = loss_v1.forward(logits_v1.clone(), labels.clone())?;
    let value_v2 = loss_v2.forward(logits_v2.clone(), labels)?;
    let loss_diff = max_abs_diff(
        &to_f64(value_v1.clone().into_data())?,
        &to_f64(value_v2.clone().into_data())?,
    );

    let grads_v1 = value_v1.sum().backward();
    let grads_v2 = value_v2.sum().backward();
    let (Some(grad_v1), Some(grad_v2)) = (logits_v1.grad(&grads_v1), logits_v2.grad(&grads_v2))
    else {
        bail!("logits gradient missing from the autodiff graph");
    };

    let expected = to_f64(grad_v1.into_data())?;
    let actual = to_f64(grad_v2.into_data())?;

    Ok(StepDiff {
        loss_diff,
        abs_grad_diff: max_abs_diff(&expected, &actual),
        rel_grad_diff: max_rel_diff(&expected, &actual, relative_floor),
    })
}

fn to_f64(data: TensorData) -> Result<Vec<f64>> {
    data.convert::<f64>()
        .to_vec::<f64>()
        .map_err(|e| anyhow::anyhow!("failed to read tensor data: {e:?}"))
}

fn max_abs_diff(expected: &[f64], actual: &[f64]) -> f64 {
    expected
        .iter()
        .zip(actual)
        .map(|(e, a)| (e - a).abs())
        .fold(0.0, f64::max)
}

/// Largest `|a - e| / max(|a|, |e|)`. Elements smaller than `relative_floor`
/// times the largest gradient are measured against that floor instead, since
/// single precision cancellation dominates their relative error.
fn max_rel_diff(expected: &[f64], actual: &[f64], relative_floor: f64) -> f64 {
    let scale = expected.iter().fold(0.0_f64, |acc, e| acc.max(e.abs()));
    let floor = scale * relative_floor;
    expected
        .iter()
        .zip(actual)
        .map(|(e, a)| {
            let magnitude = e.abs().max(a.abs()).max(floor);
            if magnitude == 0.0 {
                0.0
            } else {
                (e - a).abs() / magnitude
            }
        })
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;
    use rstest::rstest;
    use soft_dice_loss::DiceReduction;

    use super::*;

    #[test]
    fn random_batch_is_reproducible_for_a_seed() {
        let mut first = RandomBatch::new(3, [2, 4, 4], 5.0);
        let mut second = RandomBatch::new(3, [2, 4, 4], 5.0);

        let (logits_a, labels_a) = first.draw();
        let (logits_b, labels_b) = second.draw();

        logits_a.assert_eq(&logits_b, true);
        labels_a.assert_eq(&labels_b, true);
        assert!(labels_a.iter::<i64>().all(|v| v == 0 || v == 1));
        assert!(logits_a.iter::<f32>().all(|v| (-5.0..5.0).contains(&v)));
    }

    #[test]
    fn gradient_check_passes_for_small_batches() {
        let device = Default::default();
        let config = GradientCheckConfig::new(
            SoftDiceLossConfig::new()
                .with_p(2.0)
                .with_reduction(DiceReduction::Mean),
        )
        .with_iterations(5)
        .with_height(8)
        .with_width(8);

        let report = run_gradient_check::<NdArray>(&config, &device).expect("gradients agree");

        assert_eq!(report.iterations, 5);
        assert!(report.max_loss_diff < 1e-6);
        assert!(report.max_rel_grad_diff <= 1e-4);
    }

    #[test]
    fn relative_difference_floors_negligible_elements() {
        let expected = [1.0, 1e-12, -0.5];
        let actual = [1.0 + 1e-6, 2e-9, -0.5];

        // The tiny element differs by 2e-9 against a floor of 1e-2
        let rel = max_rel_diff(&expected, &actual, 1e-2);

        assert!((rel - 1e-6 / (1.0 + 1e-6)).abs() < 1e-12);
        assert!((max_abs_diff(&expected, &actual) - 1e-6).abs() < 1e-12);
    }

    #[test]
    fn relative_difference_without_floor_measures_every_element() {
        let expected = [1.0, 1e-12, -0.5];
        let actual = [1.0 + 1e-6, 2e-9, -0.5];

        let rel = max_rel_diff(&expected, &actual, 0.0);

        assert!(rel > 0.99);
    }

    #[test]
    fn gradient_check_small_exponent_returns_error() {
        let device = Default::default();
        let config = GradientCheckConfig::new(SoftDiceLossConfig::new().with_p(0.5))
            .with_iterations(1)
            .with_height(4)
            .with_width(4);

        let result = run_gradient_check::<NdArray>(&config, &device);

        let message = result.expect_err("p below 1 is rejected").to_string();
        assert!(message.contains("exponent p"), "unexpected error: {message}");
    }

    #[rstest]
    #[case::empty_batch(0, 4, 4)]
    #[case::empty_height(2, 0, 4)]
    #[case::empty_width(2, 4, 0)]
    fn gradient_check_empty_shape_returns_error(
        #[case] batch_size: usize,
        #[case] height: usize,
        #[case] width: usize,
    ) {
        let device = Default::default();
        let config = GradientCheckConfig::new(SoftDiceLossConfig::new())
            .with_iterations(1)
            .with_batch_size(batch_size)
            .with_height(height)
            .with_width(width);

        assert!(run_gradient_check::<NdArray>(&config, &device).is_err());
    }

    #[rstest]
    #[case::negative_smooth(SoftDiceLossConfig::new().with_smooth(-1.0))]
    #[case::infinite_p(SoftDiceLossConfig::new().with_p(f64::INFINITY))]
    #[case::nan_smooth(SoftDiceLossConfig::new().with_smooth(f64::NAN))]
    fn validate_loss_rejects_invalid_parameters(#[case] config: SoftDiceLossConfig) {
        assert!(validate_loss(&config).is_err());
    }

    #[test]
    fn gradient_check_config_rejects_zero_logit_range() {
        let config = GradientCheckConfig::new(SoftDiceLossConfig::new()).with_logit_range(0.0);

        assert!(config.validate().is_err());
    }
}
