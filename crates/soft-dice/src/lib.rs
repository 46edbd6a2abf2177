//! Driver utilities for the soft Dice losses.
//!
//! Provides backend selection, a gradient agreement check between the
//! autodiff and analytic binary losses, and a one-shot evaluation helper used
//! by the `soft-dice` binary.

pub mod backend;
pub mod check;
pub mod eval;

#[doc(inline)]
pub use soft_dice_loss as loss;
