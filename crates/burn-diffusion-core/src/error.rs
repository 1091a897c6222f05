//! Errors raised by the tensor primitives

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Unsupported axis {axis}: only the batch axis (0) is supported")]
    UnsupportedAxis { axis: usize },

    #[error("Empty input: {0}")]
    EmptyInput(&'static str),

    #[error("Invalid permutation {axes:?} for rank {rank}")]
    InvalidPermutation { axes: Vec<usize>, rank: usize },

    #[error("Element count mismatch: {from:?} has {from_len} elements, {to:?} has {to_len}")]
    ElementCount {
        from: Vec<usize>,
        from_len: usize,
        to: Vec<usize>,
        to_len: usize,
    },

    #[error("Tensor data error: {0}")]
    Data(String),
}

impl TensorError {
    pub(crate) fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
