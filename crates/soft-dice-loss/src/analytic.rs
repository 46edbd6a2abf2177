//! Binary soft Dice loss whose backward pass is the closed-form gradient of
//! [`SoftDiceFunction`], registered as a custom node in Burn's autodiff graph.

use core::fmt;

use burn::{
    backend::{
        autodiff::{
            checkpoint::{base::Checkpointer, strategy::CheckpointStrategy},
            grads::Gradients,
            ops::{Backward, Ops, OpsKind},
        },
        Autodiff,
    },
    tensor::{backend::Backend, Int, Tensor, TensorPrimitive},
};

use crate::{
    binary::check_shapes, CustomGradient, DiceLossResult, DiceReduction, SoftDiceCache,
    SoftDiceFunction, SoftDiceLossConfig,
};

impl SoftDiceLossConfig {
    /// Initialize [soft Dice loss](SoftDiceLossV2) with the analytic backward pass.
    pub fn init_v2(&self) -> SoftDiceLossV2 {
        self.assertions();
        SoftDiceLossV2 {
            function: SoftDiceFunction::new(self.p, self.smooth),
            reduction: self.reduction,
        }
    }
}

/// Soft Dice loss for binary segmentation with a hand-derived gradient.
///
/// Produces the same values as [`SoftDiceLossV1`](crate::SoftDiceLossV1). During
/// `backward`, the gradient w.r.t. the logits is computed in one closed-form
/// expression instead of being chained through `sigmoid` and `pow`.
#[derive(Clone, Debug)]
pub struct SoftDiceLossV2 {
    function: SoftDiceFunction,
    /// Aggregation of the per-sample losses.
    pub reduction: DiceReduction,
}

impl Default for SoftDiceLossV2 {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SoftDiceLossV2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SoftDiceLossV2 {{p: {}, smooth: {}, reduction: {:?}}}",
            self.function.p, self.function.smooth, self.reduction
        )
    }
}

impl SoftDiceLossV2 {
    /// Create a new soft Dice loss with default configuration.
    pub fn new() -> Self {
        SoftDiceLossConfig::new().init_v2()
    }

    /// The underlying forward/backward pair.
    pub const fn function(&self) -> &SoftDiceFunction {
        &self.function
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
    /// Returns [`DiceLossError::ShapeMismatch`](crate::DiceLossError::ShapeMismatch)
    /// if logits and labels differ in shape.
    pub fn forward<B: Backend, C: CheckpointStrategy>(
        &self,
        logits: Tensor<Autodiff<B, C>, 3>,
        labels: Tensor<Autodiff<B, C>, 3, Int>,
    ) -> DiceLossResult<Tensor<Autodiff<B, C>, 1>> {
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
    pub fn forward_no_reduction<B: Backend, C: CheckpointStrategy>(
        &self,
        logits: Tensor<Autodiff<B, C>, 3>,
        labels: Tensor<Autodiff<B, C>, 3, Int>,
    ) -> DiceLossResult<Tensor<Autodiff<B, C>, 1>> {
        soft_dice_autodiff(&self.function, logits, labels)
    }
}

/// Evaluates `function` on autodiff tensors, attaching its analytic backward pass
/// to the graph.
///
/// Labels are treated as constants. When the logits are not tracked, no
/// intermediates are retained.
pub fn soft_dice_autodiff<B: Backend, C: CheckpointStrategy>(
    function: &SoftDiceFunction,
    logits: Tensor<Autodiff<B, C>, 3>,
    labels: Tensor<Autodiff<B, C>, 3, Int>,
) -> DiceLossResult<Tensor<Autodiff<B, C>, 1>> {
    check_shapes(&logits, &labels)?;

    let labels = labels.inner();
    let logits = logits.into_primitive().tensor();
    let inner_logits = Tensor::<B, 3>::from_primitive(TensorPrimitive::Float(
        logits.primitive.clone(),
    ));

    let output = match SoftDiceBackward
        .prepare::<C>([logits.node.clone()])
        .compute_bound()
        .stateful()
    {
        OpsKind::Tracked(prep) => {
            let (loss, cache) = function.forward((inner_logits, labels))?;
            prep.finish(SoftDiceState::from(cache), loss.into_primitive().tensor())
        }
        OpsKind::UnTracked(prep) => {
            let (loss, _) = function.forward((inner_logits, labels))?;
            prep.finish(loss.into_primitive().tensor())
        }
    };

    Ok(Tensor::from_primitive(TensorPrimitive::Float(output)))
}

/// Graph-side copy of a [`SoftDiceCache`]. Burn requires node state to be
/// `Clone`, the cache itself is not.
#[derive(Clone, Debug)]
struct SoftDiceState<B: Backend> {
    probs: Tensor<B, 3>,
    labels: Tensor<B, 3>,
    numer: Tensor<B, 1>,
    denom: Tensor<B, 1>,
    p: f64,
    smooth: f64,
}

impl<B: Backend> From<SoftDiceCache<B>> for SoftDiceState<B> {
    fn from(cache: SoftDiceCache<B>) -> Self {
        Self {
            probs: cache.probs,
            labels: cache.labels,
            numer: cache.numer,
            denom: cache.denom,
            p: cache.p,
            smooth: cache.smooth,
        }
    }
}

impl<B: Backend> From<SoftDiceState<B>> for SoftDiceCache<B> {
    fn from(state: SoftDiceState<B>) -> Self {
        Self {
            probs: state.probs,
            labels: state.labels,
            numer: state.numer,
            denom: state.denom,
            p: state.p,
            smooth: state.smooth,
        }
    }
}

#[derive(Debug)]
struct SoftDiceBackward;

impl<B: Backend> Backward<B, 1> for SoftDiceBackward {
    type State = SoftDiceState<B>;

    fn backward(
        self,
        ops: Ops<Self::State, 1>,
        grads: &mut Gradients,
        _checkpointer: &mut Checkpointer,
    ) {
        let [node_logits] = ops.parents;
        let grad_output = grads.consume::<B>(&ops.node);

        if let Some(node) = node_logits {
            let function = SoftDiceFunction::new(ops.state.p, ops.state.smooth);
            let grad_output = Tensor::<B, 1>::from_primitive(TensorPrimitive::Float(grad_output));
            let grad = function.backward(SoftDiceCache::from(ops.state), grad_output);
            grads.register::<B>(node.id, grad.into_primitive().tensor());
        }
    }
}
