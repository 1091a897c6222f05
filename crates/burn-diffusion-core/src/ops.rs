//! Elementwise arithmetic over equal-shaped tensors
//!
//! Every binary operation checks that both operands share a shape and
//! comes in two forms: a copying form that takes references and returns a
//! new tensor, and a `_mut` form that updates the left operand in place.
//! No broadcasting: use burn's operators directly for that.
//!
//! Inner loops are the backend's kernels, so vector width and scalar tails
//! are the backend's concern.

use burn::prelude::*;

use crate::error::TensorError;

/// Fail with [`TensorError::ShapeMismatch`] unless both shapes are identical
pub fn ensure_same_shape<const D: usize>(
    expected: [usize; D],
    actual: [usize; D],
) -> Result<(), TensorError> {
    if expected == actual {
        Ok(())
    } else {
        Err(TensorError::shape_mismatch(&expected, &actual))
    }
}

// ============================================================================
// Binary operations
// ============================================================================

/// `lhs + rhs`
pub fn add<B: Backend, const D: usize>(
    lhs: &Tensor<B, D>,
    rhs: &Tensor<B, D>,
) -> Result<Tensor<B, D>, TensorError> {
    ensure_same_shape(lhs.dims(), rhs.dims())?;
    Ok(lhs.clone() + rhs.clone())
}

/// `lhs += rhs`
pub fn add_mut<B: Backend, const D: usize>(
    lhs: &mut Tensor<B, D>,
    rhs: &Tensor<B, D>,
) -> Result<(), TensorError> {
    *lhs = add(lhs, rhs)?;
    Ok(())
}

/// `lhs - rhs`
pub fn subtract<B: Backend, const D: usize>(
    lhs: &Tensor<B, D>,
    rhs: &Tensor<B, D>,
) -> Result<Tensor<B, D>, TensorError> {
    ensure_same_shape(lhs.dims(), rhs.dims())?;
    Ok(lhs.clone() - rhs.clone())
}

/// `lhs -= rhs`
pub fn subtract_mut<B: Backend, const D: usize>(
    lhs: &mut Tensor<B, D>,
    rhs: &Tensor<B, D>,
) -> Result<(), TensorError> {
    *lhs = subtract(lhs, rhs)?;
    Ok(())
}

/// `lhs * rhs`
pub fn multiply<B: Backend, const D: usize>(
    lhs: &Tensor<B, D>,
    rhs: &Tensor<B, D>,
) -> Result<Tensor<B, D>, TensorError> {
    ensure_same_shape(lhs.dims(), rhs.dims())?;
    Ok(lhs.clone() * rhs.clone())
}

/// `lhs *= rhs`
pub fn multiply_mut<B: Backend, const D: usize>(
    lhs: &mut Tensor<B, D>,
    rhs: &Tensor<B, D>,
) -> Result<(), TensorError> {
    *lhs = multiply(lhs, rhs)?;
    Ok(())
}

/// `lhs / rhs`
pub fn divide<B: Backend, const D: usize>(
    lhs: &Tensor<B, D>,
    rhs: &Tensor<B, D>,
) -> Result<Tensor<B, D>, TensorError> {
    ensure_same_shape(lhs.dims(), rhs.dims())?;
    Ok(lhs.clone() / rhs.clone())
}

/// `lhs /= rhs`
pub fn divide_mut<B: Backend, const D: usize>(
    lhs: &mut Tensor<B, D>,
    rhs: &Tensor<B, D>,
) -> Result<(), TensorError> {
    *lhs = divide(lhs, rhs)?;
    Ok(())
}

// ============================================================================
// Unary operations
// ============================================================================

/// Clamp every element to `[min, max]`
pub fn clip<B: Backend, const D: usize>(tensor: &Tensor<B, D>, min: f32, max: f32) -> Tensor<B, D> {
    tensor.clone().clamp(min, max)
}

pub fn clip_mut<B: Backend, const D: usize>(tensor: &mut Tensor<B, D>, min: f32, max: f32) {
    *tensor = clip(tensor, min, max);
}

pub fn abs<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> Tensor<B, D> {
    tensor.clone().abs()
}

pub fn abs_mut<B: Backend, const D: usize>(tensor: &mut Tensor<B, D>) {
    *tensor = abs(tensor);
}

// ============================================================================
// Scalar operations
// ============================================================================

pub fn multiply_by_scalar<B: Backend, const D: usize>(tensor: &Tensor<B, D>, scalar: f32) -> Tensor<B, D> {
    tensor.clone() * scalar
}

/// Divide by a scalar; division by exactly zero yields a zero tensor
pub fn divide_by_scalar<B: Backend, const D: usize>(tensor: &Tensor<B, D>, scalar: f32) -> Tensor<B, D> {
    if scalar == 0.0 {
        tensor.zeros_like()
    } else {
        tensor.clone() / scalar
    }
}

/// Linear interpolation between two tensors
///
/// `weight = 0` returns `a`, `weight = 1` returns `b`.
pub fn lerp<B: Backend, const D: usize>(
    a: &Tensor<B, D>,
    b: &Tensor<B, D>,
    weight: f32,
) -> Result<Tensor<B, D>, TensorError> {
    ensure_same_shape(a.dims(), b.dims())?;
    Ok(a.clone() + (b.clone() - a.clone()) * weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn values(tensor: Tensor<TestBackend, 2>) -> Vec<f32> {
        tensor.into_data().to_vec().unwrap()
    }

    #[test]
    fn test_binary_ops() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0], [3.0, 4.0]], &device);
        let b = Tensor::<TestBackend, 2>::from_floats([[2.0, 2.0], [2.0, 2.0]], &device);

        assert_eq!(values(add(&a, &b).unwrap()), vec![3.0, 4.0, 5.0, 6.0]);
        assert_eq!(values(subtract(&a, &b).unwrap()), vec![-1.0, 0.0, 1.0, 2.0]);
        assert_eq!(values(multiply(&a, &b).unwrap()), vec![2.0, 4.0, 6.0, 8.0]);
        assert_eq!(values(divide(&a, &b).unwrap()), vec![0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn test_mutating_forms_match_copying_forms() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_floats([[1.0, -2.0], [3.0, -4.0]], &device);
        let b = Tensor::<TestBackend, 2>::from_floats([[0.5, 0.5], [0.5, 0.5]], &device);

        let mut m = a.clone();
        add_mut(&mut m, &b).unwrap();
        multiply_mut(&mut m, &b).unwrap();
        subtract_mut(&mut m, &b).unwrap();
        divide_mut(&mut m, &b).unwrap();

        let c = add(&a, &b).unwrap();
        let c = multiply(&c, &b).unwrap();
        let c = subtract(&c, &b).unwrap();
        let c = divide(&c, &b).unwrap();
        assert_eq!(values(m), values(c));
    }

    #[test]
    fn test_shape_mismatch_is_an_error() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::zeros([2, 3], &device);
        let b = Tensor::<TestBackend, 2>::zeros([3, 2], &device);

        let err = add(&a, &b).unwrap_err();
        assert_eq!(
            err,
            TensorError::ShapeMismatch {
                expected: vec![2, 3],
                actual: vec![3, 2]
            }
        );
        let mut m = a.clone();
        assert!(subtract_mut(&mut m, &b).is_err());
        assert_eq!(m.dims(), [2, 3]);
    }

    #[test]
    fn test_clip_and_abs() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_floats([[-3.0, -0.5], [0.5, 3.0]], &device);

        assert_eq!(values(clip(&a, -1.0, 1.0)), vec![-1.0, -0.5, 0.5, 1.0]);
        let mut m = a.clone();
        abs_mut(&mut m);
        assert_eq!(values(m), vec![3.0, 0.5, 0.5, 3.0]);
        let mut m = a;
        clip_mut(&mut m, 0.0, 1.0);
        assert_eq!(values(m), vec![0.0, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_scalar_ops() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0]], &device);

        assert_eq!(values(multiply_by_scalar(&a, 3.0)), vec![3.0, 6.0]);
        assert_eq!(values(divide_by_scalar(&a, 2.0)), vec![0.5, 1.0]);
        assert_eq!(values(divide_by_scalar(&a, 0.0)), vec![0.0, 0.0]);
    }

    #[test]
    fn test_lerp() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0]], &device);
        let b = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0]], &device);

        assert_eq!(values(lerp(&a, &b, 0.5).unwrap()), vec![0.5, 1.0]);
        assert_eq!(values(lerp(&a, &b, 0.0).unwrap()), vec![0.0, 0.0]);
        assert_eq!(values(lerp(&a, &b, 1.0).unwrap()), vec![1.0, 2.0]);
    }
}
