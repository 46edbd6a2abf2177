//! Soft Dice losses for binary and multi-class segmentation.
//!
//! This crate provides differentiable relaxations of the Dice coefficient for
//! training segmentation networks with the Burn deep learning framework.
//!
//! ## Binary Losses
//!
//! - **[`SoftDiceLossV1`]**: the loss as a plain tensor expression, differentiated by
//!   Burn's autodiff. Works on every backend.
//! - **[`SoftDiceLossV2`]**: the same loss with a hand-derived backward pass,
//!   registered as a custom node of the [`Autodiff`](burn::backend::Autodiff)
//!   graph. More stable at large logit magnitudes.
//!
//! The analytic gradient is also available without the autodiff graph through
//! the [`CustomGradient`] contract implemented by [`SoftDiceFunction`]: `forward`
//! returns the loss and a [`SoftDiceCache`] that `backward` consumes.
//!
//! ## Multi-class Losses
//!
//! - **[`GeneralizedSoftDiceLoss`]**: per-sample Dice over all classes, with optional
//!   class weights and an ignore label.
//! - **[`BatchSoftDiceLoss`]**: a single Dice ratio pooled over batch and classes.
//!
//! ## Usage Example
//!
//! ```rust
//! use burn::backend::{Autodiff, NdArray};
//! use burn::tensor::{Int, Tensor};
//! use soft_dice_loss::{DiceReduction, SoftDiceLossConfig};
//!
//! type B = Autodiff<NdArray>;
//!
//! let device = Default::default();
//! let loss = SoftDiceLossConfig::new()
//!     .with_p(2.0)
//!     .with_reduction(DiceReduction::Mean)
//!     .init_v2();
//!
//! let logits = Tensor::<B, 3>::zeros([2, 4, 4], &device).require_grad();
//! let labels = Tensor::<B, 3, Int>::ones([2, 4, 4], &device);
//!
//! let value = loss.forward(logits.clone(), labels).unwrap();
//! let grads = value.backward();
//! assert_eq!(logits.grad(&grads).unwrap().dims(), [2, 4, 4]);
//! ```

mod analytic;
mod batch;
mod binary;
mod custom_grad;
mod error;
mod generalized;
mod reduction;

pub use analytic::{soft_dice_autodiff, SoftDiceLossV2};
pub use batch::{BatchSoftDiceLoss, BatchSoftDiceLossConfig};
pub use binary::{SoftDiceLossConfig, SoftDiceLossV1};
pub use custom_grad::{CustomGradient, SoftDiceCache, SoftDiceFunction};
pub use error::{DiceLossError, DiceLossResult};
pub use generalized::{GeneralizedSoftDiceLoss, GeneralizedSoftDiceLossConfig};
pub use reduction::DiceReduction;
