//! Host readback helpers

use burn::prelude::*;

use crate::error::TensorError;

/// Copy a tensor's elements to the host as `f32`, whatever the backend's
/// float element type
pub fn to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>, TensorError> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| TensorError::Data(format!("{err:?}")))
}

/// Build a tensor from host values, checking the length against `shape`
pub fn from_vec<B: Backend, const D: usize>(
    values: Vec<f32>,
    shape: [usize; D],
    device: &B::Device,
) -> Result<Tensor<B, D>, TensorError> {
    let expected: usize = shape.iter().product();
    if values.len() != expected {
        return Err(TensorError::ElementCount {
            from: vec![values.len()],
            from_len: values.len(),
            to: shape.to_vec(),
            to_len: expected,
        });
    }
    Ok(Tensor::from_data(TensorData::new(values, shape), device))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_round_trip() {
        let device = Default::default();
        let tensor: Tensor<TestBackend, 2> = from_vec(vec![1.0, 2.0, 3.0, 4.0], [2, 2], &device).unwrap();
        assert_eq!(to_vec(tensor).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_wrong_length() {
        let device = Default::default();
        let result: Result<Tensor<TestBackend, 2>, _> = from_vec(vec![1.0; 3], [2, 2], &device);
        assert!(result.is_err());
    }
}
