//! Checked reshape and permute

use burn::prelude::*;

use crate::error::TensorError;

/// Reshape, failing if the element counts differ
pub fn reshape<B: Backend, const D: usize, const D2: usize>(
    tensor: Tensor<B, D>,
    shape: [usize; D2],
) -> Result<Tensor<B, D2>, TensorError> {
    let dims = tensor.dims();
    let from_len: usize = dims.iter().product();
    let to_len: usize = shape.iter().product();
    if from_len != to_len {
        return Err(TensorError::ElementCount {
            from: dims.to_vec(),
            from_len,
            to: shape.to_vec(),
            to_len,
        });
    }
    Ok(tensor.reshape(shape))
}

/// Permute axes; `axes` must name every axis exactly once
pub fn permute<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    axes: [usize; D],
) -> Result<Tensor<B, D>, TensorError> {
    let mut seen = [false; D];
    for &axis in &axes {
        if axis >= D || seen[axis] {
            return Err(TensorError::InvalidPermutation {
                axes: axes.to_vec(),
                rank: D,
            });
        }
        seen[axis] = true;
    }
    Ok(tensor.permute(axes.map(|axis| axis as isize)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_reshape() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::zeros([2, 6], &device);

        let b: Tensor<TestBackend, 3> = reshape(a.clone(), [2, 3, 2]).unwrap();
        assert_eq!(b.dims(), [2, 3, 2]);
        assert!(matches!(
            reshape::<_, 2, 2>(a, [5, 2]),
            Err(TensorError::ElementCount { from_len: 12, to_len: 10, .. })
        ));
    }

    #[test]
    fn test_permute() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 3>::from_floats([[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]], &device);

        let b = permute(a.clone(), [0, 2, 1]).unwrap();
        assert_eq!(b.dims(), [1, 3, 2]);
        let data: Vec<f32> = b.into_data().to_vec().unwrap();
        assert_eq!(data, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);

        assert!(permute(a.clone(), [0, 0, 1]).is_err());
        assert!(permute(a, [0, 1, 3]).is_err());
    }
}
