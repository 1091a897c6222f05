//! Batch-axis concatenate, repeat, split and join
//!
//! These operate on axis 0 only. Any other axis is
//! [`TensorError::UnsupportedAxis`].

use burn::prelude::*;

use crate::error::TensorError;

/// The only axis the batch operations accept
pub const BATCH_AXIS: usize = 0;

fn ensure_batch_axis(axis: usize) -> Result<(), TensorError> {
    if axis == BATCH_AXIS {
        Ok(())
    } else {
        Err(TensorError::UnsupportedAxis { axis })
    }
}

/// Check that every tensor agrees on all dimensions except the batch axis
fn ensure_trailing_dims<B: Backend, const D: usize>(tensors: &[Tensor<B, D>]) -> Result<(), TensorError> {
    let Some(first) = tensors.first() else {
        return Err(TensorError::EmptyInput("no tensors to join"));
    };
    let expected = first.dims();
    for tensor in &tensors[1..] {
        let actual = tensor.dims();
        if expected[1..] != actual[1..] {
            return Err(TensorError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: actual.to_vec(),
            });
        }
    }
    Ok(())
}

/// Concatenate two tensors along the batch axis
pub fn concatenate<B: Backend, const D: usize>(
    first: Tensor<B, D>,
    second: Tensor<B, D>,
    axis: usize,
) -> Result<Tensor<B, D>, TensorError> {
    join(vec![first, second], axis)
}

/// Join any number of tensors along the batch axis
pub fn join<B: Backend, const D: usize>(
    tensors: Vec<Tensor<B, D>>,
    axis: usize,
) -> Result<Tensor<B, D>, TensorError> {
    ensure_batch_axis(axis)?;
    ensure_trailing_dims(&tensors)?;
    Ok(Tensor::cat(tensors, BATCH_AXIS))
}

/// Repeat the whole tensor `count` times along the batch axis
///
/// `[a, b]` repeated twice is `[a, b, a, b]`.
pub fn repeat<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    count: usize,
    axis: usize,
) -> Result<Tensor<B, D>, TensorError> {
    ensure_batch_axis(axis)?;
    if count == 0 {
        return Err(TensorError::EmptyInput("repeat count must be at least 1"));
    }
    Ok(tensor.repeat_dim(BATCH_AXIS, count))
}

/// Split a tensor into `parts` equally sized tensors along the batch axis
pub fn split<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    parts: usize,
    axis: usize,
) -> Result<Vec<Tensor<B, D>>, TensorError> {
    ensure_batch_axis(axis)?;
    if parts == 0 {
        return Err(TensorError::EmptyInput("split into zero parts"));
    }
    let dims = tensor.dims();
    if dims[BATCH_AXIS] % parts != 0 {
        let mut expected = dims;
        expected[BATCH_AXIS] = dims[BATCH_AXIS].div_ceil(parts) * parts;
        return Err(TensorError::shape_mismatch(&expected, &dims));
    }
    Ok(tensor.chunk(parts, BATCH_AXIS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_concatenate_and_split_batch() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 3>::ones([1, 2, 2], &device);
        let b = Tensor::<TestBackend, 3>::zeros([1, 2, 2], &device);

        let joined = concatenate(a, b, 0).unwrap();
        assert_eq!(joined.dims(), [2, 2, 2]);

        let parts = split(joined, 2, 0).unwrap();
        assert_eq!(parts.len(), 2);
        let first: Vec<f32> = parts[0].clone().into_data().to_vec().unwrap();
        let second: Vec<f32> = parts[1].clone().into_data().to_vec().unwrap();
        assert!(first.iter().all(|&v| v == 1.0));
        assert!(second.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_repeat_batch() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0], [3.0, 4.0]], &device);

        let repeated = repeat(a, 2, 0).unwrap();
        assert_eq!(repeated.dims(), [4, 2]);
        let data: Vec<f32> = repeated.into_data().to_vec().unwrap();
        assert_eq!(data, vec![1.0, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_non_batch_axis_is_rejected() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::zeros([2, 2], &device);

        assert_eq!(
            concatenate(a.clone(), a.clone(), 1).unwrap_err(),
            TensorError::UnsupportedAxis { axis: 1 }
        );
        assert!(repeat(a.clone(), 2, 1).is_err());
        assert!(split(a.clone(), 2, 1).is_err());
        assert!(join(vec![a], 2).is_err());
    }

    #[test]
    fn test_join_checks_trailing_dims() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::zeros([1, 2], &device);
        let b = Tensor::<TestBackend, 2>::zeros([1, 3], &device);

        assert!(matches!(join(vec![a, b], 0), Err(TensorError::ShapeMismatch { .. })));
        assert!(matches!(
            join(Vec::<Tensor<TestBackend, 2>>::new(), 0),
            Err(TensorError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_uneven_split_is_rejected() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::zeros([3, 2], &device);
        assert!(split(a, 2, 0).is_err());
    }
}
