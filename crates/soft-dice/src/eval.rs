//! One-shot evaluation of the analytic soft Dice loss on a random batch.

use anyhow::{Context, Result};
use burn::{
    backend::Autodiff,
    tensor::{backend::Backend, cast::ToElement, Int, Tensor},
};
use soft_dice_loss::SoftDiceLossConfig;

use crate::check::{validate_loss, validate_shape, RandomBatch};

/// Loss value and logits gradient norm of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    pub grad_norm: f64,
}

/// Evaluates [`SoftDiceLossV2`](soft_dice_loss::SoftDiceLossV2) once on a seeded
/// random batch of `shape` and differentiates it.
///
/// # Errors
///
/// Returns an error if the loss parameters or the shape are invalid, the loss
/// rejects its inputs, or the gradient is missing.
pub fn run_evaluation<B: Backend>(
    config: &SoftDiceLossConfig,
    shape: [usize; 3],
    seed: u64,
    device: &B::Device,
) -> Result<Evaluation> {
    validate_loss(config)?;
    validate_shape(shape)?;

    let loss = config.init_v2();
    let (logits, labels) = RandomBatch::new(seed, shape, 6.0).draw();

    let logits = Tensor::<Autodiff<B>, 3>::from_data(logits, device).require_grad();
    let labels = Tensor::<Autodiff<B>, 3, Int>::from_data(labels, device);

    // Reduce to a scalar regardless of the configured policy
    let value = loss.forward(logits.clone(), labels)?.sum();
    let grads = value.backward();
    let grad = logits
        .grad(&grads)
        .context("logits gradient missing from the autodiff graph")?;

    let evaluation = Evaluation {
        loss: value.into_scalar().to_f64(),
        grad_norm: grad.powf_scalar(2.0).sum().sqrt().into_scalar().to_f64(),
    };
    tracing::info!(
        ?shape,
        loss = evaluation.loss,
        grad_norm = evaluation.grad_norm,
        "evaluated"
    );
    Ok(evaluation)
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    #[test]
    fn evaluation_reports_finite_values() {
        let device = Default::default();

        let evaluation =
            run_evaluation::<NdArray>(&SoftDiceLossConfig::new(), [2, 8, 8], 15, &device)
                .expect("valid inputs");

        assert!((0.0..=2.0).contains(&evaluation.loss));
        assert!(evaluation.grad_norm.is_finite());
        assert!(evaluation.grad_norm > 0.0);
    }

    #[test]
    fn evaluation_invalid_configuration_returns_error() {
        let device = Default::default();
        let config = SoftDiceLossConfig::new().with_p(0.5);

        assert!(run_evaluation::<NdArray>(&config, [2, 8, 8], 15, &device).is_err());
        assert!(
            run_evaluation::<NdArray>(&SoftDiceLossConfig::new(), [0, 8, 8], 15, &device).is_err()
        );
    }
}
