//! # Ignore-aware one-hot encoding
//!
//! Turns a class-id label map `[batch, height, width]` into a one-hot tensor
//! `[batch, classes, height, width]`. Pixels carrying the ignore sentinel are
//! encoded as an all-zero class vector, so they drop out of any overlap
//! statistic computed from the encoding.
//!
//! The ignored positions are removed with a boolean mask broadcast along the
//! class axis rather than by scattering into per-pixel indices, which keeps the
//! operation independent of the number of leading dimensions.

use burn::tensor::{backend::Backend, ElementConversion, Int, Tensor};
use thiserror::Error;

/// Errors raised while building a one-hot encoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OneHotError {
    /// A non-ignored label lies outside `[0, num_classes)`.
    #[error(
        "label values must lie in [0, {num_classes}) outside ignored pixels, found range [{min}, {max}]"
    )]
    LabelOutOfRange {
        min: i64,
        max: i64,
        num_classes: usize,
    },

    /// The encoding was requested with zero classes.
    #[error("number of classes must be positive")]
    NoClasses,
}

/// A specialized `Result` type for one-hot encoding.
pub type OneHotResult<T> = Result<T, OneHotError>;

/// A trait for one-hot encoding integer label maps with an ignore sentinel.
pub trait OneHotIgnore<B: Backend> {
    /// Encodes `self` over `num_classes` channels, zeroing pixels equal to `ignore_index`.
    fn one_hot_ignore(self, num_classes: usize, ignore_index: i64) -> OneHotResult<Tensor<B, 4>>;
}

impl<B: Backend> OneHotIgnore<B> for Tensor<B, 3, Int> {
    fn one_hot_ignore(self, num_classes: usize, ignore_index: i64) -> OneHotResult<Tensor<B, 4>> {
        one_hot_with_ignore(self, num_classes, ignore_index)
    }
}

/// One-hot encodes `labels` while masking out pixels labelled `ignore_index`.
///
/// # Shapes
///
/// - labels: `[batch_size, height, width]`
/// - output: `[batch_size, num_classes, height, width]`
///
/// The returned tensor is detached from any autodiff graph: it is a constant target.
///
/// # Errors
///
/// Returns [`OneHotError::LabelOutOfRange`] if a non-ignored label is negative or
/// not smaller than `num_classes`, and [`OneHotError::NoClasses`] if `num_classes` is zero.
pub fn one_hot_with_ignore<B: Backend>(
    labels: Tensor<B, 3, Int>,
    num_classes: usize,
    ignore_index: i64,
) -> OneHotResult<Tensor<B, 4>> {
    if num_classes == 0 {
        return Err(OneHotError::NoClasses);
    }

    let [batch_size, height, width] = labels.dims();
    let device = labels.device();
    let shape = [batch_size, num_classes, height, width];

    // Ignored pixels get class 0 as a placeholder, they are zeroed again below
    let ignore = labels.clone().equal_elem(ignore_index);
    let labels = labels.mask_fill(ignore.clone(), 0);

    if batch_size * height * width > 0 {
        let min = labels.clone().min().into_scalar().elem::<i64>();
        let max = labels.clone().max().into_scalar().elem::<i64>();
        tracing::debug!(min, max, num_classes, "validated label range");
        if min < 0 || max >= num_classes as i64 {
            return Err(OneHotError::LabelOutOfRange {
                min,
                max,
                num_classes,
            });
        }
    }

    let classes = Tensor::<B, 1, Int>::arange(0..num_classes as i64, &device)
        .reshape([1, num_classes, 1, 1])
        .expand(shape);
    let one_hot = labels
        .unsqueeze_dim::<4>(1)
        .expand(shape)
        .equal(classes)
        .float();

    let ignore = ignore.unsqueeze_dim::<4>(1).expand(shape);

    Ok(one_hot.mask_fill(ignore, 0.0).detach())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{ndarray::NdArray, Autodiff},
        tensor::{TensorData, Tolerance},
    };
    use rstest::rstest;

    type TestBackend = NdArray<f32>;

    #[test]
    fn one_hot_without_ignored_pixels_encodes_every_label() {
        let device = Default::default();
        let labels = Tensor::<TestBackend, 3, Int>::from_data(
            TensorData::from([[[0, 1], [2, 1]]]),
            &device,
        );

        let result = one_hot_with_ignore(labels, 3, 255).expect("labels are in range");

        let expected = TensorData::from([[
            [[1.0, 0.0], [0.0, 0.0]],
            [[0.0, 1.0], [0.0, 1.0]],
            [[0.0, 0.0], [1.0, 0.0]],
        ]]);
        result
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    fn one_hot_zeroes_all_channels_of_ignored_pixels() {
        let device = Default::default();
        let labels = Tensor::<TestBackend, 3, Int>::from_data(
            TensorData::from([[[255, 1], [0, 255]], [[2, 2], [255, 0]]]),
            &device,
        );

        let result = labels.one_hot_ignore(3, 255).expect("labels are in range");
        assert_eq!(result.dims(), [2, 3, 2, 2]);

        // Class axis sums: 0 where ignored, 1 elsewhere
        let expected = TensorData::from([
            [[[0.0, 1.0], [1.0, 0.0]]],
            [[[1.0, 1.0], [0.0, 1.0]]],
        ]);
        result
            .sum_dim(1)
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[rstest]
    #[case::above_range(TensorData::from([[[0, 3]]]), 3)]
    #[case::negative(TensorData::from([[[-1, 0]]]), 2)]
    #[case::ignore_only_masks_its_own_value(TensorData::from([[[254, 255]]]), 4)]
    fn one_hot_out_of_range_label_returns_error(
        #[case] data: TensorData,
        #[case] num_classes: usize,
    ) {
        let device = Default::default();
        let labels = Tensor::<TestBackend, 3, Int>::from_data(data, &device);

        let result = one_hot_with_ignore(labels, num_classes, 255);

        match result {
            Err(OneHotError::LabelOutOfRange { num_classes: n, .. }) => assert_eq!(n, num_classes),
            other => panic!("Expected LabelOutOfRange error, got: {other:?}"),
        }
    }

    #[test]
    fn one_hot_zero_classes_returns_error() {
        let device = Default::default();
        let labels = Tensor::<TestBackend, 3, Int>::zeros([1, 2, 2], &device);

        assert_eq!(
            one_hot_with_ignore(labels, 0, 255).unwrap_err(),
            OneHotError::NoClasses
        );
    }

    #[test]
    fn one_hot_custom_ignore_index_inside_class_range() {
        let device = Default::default();
        let labels = Tensor::<TestBackend, 3, Int>::from_data(
            TensorData::from([[[0, 1, 2]]]),
            &device,
        );

        let result = one_hot_with_ignore(labels, 3, 1).expect("labels are in range");

        let expected = TensorData::from([[[[1.0, 0.0, 1.0]]]]);
        result
            .sum_dim(1)
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    fn one_hot_is_detached_from_autodiff_graph() {
        let device = Default::default();
        let labels = Tensor::<Autodiff<TestBackend>, 3, Int>::from_data(
            TensorData::from([[[0, 1]]]),
            &device,
        );

        let result = one_hot_with_ignore(labels, 2, 255).expect("labels are in range");

        assert!(!result.is_require_grad());
    }
}
