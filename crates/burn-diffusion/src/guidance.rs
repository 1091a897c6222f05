//! Classifier-free guidance

use burn::prelude::*;
use burn_diffusion_core::{data, TensorError};

/// Guidance runs the unconditional pass only above a scale of 1
pub fn guidance_enabled(guidance_scale: f32) -> bool {
    guidance_scale > 1.0
}

/// `uncond + scale·(cond - uncond)`
pub fn apply_guidance<B: Backend, const D: usize>(
    noise_pred_uncond: Tensor<B, D>,
    noise_pred_cond: Tensor<B, D>,
    guidance_scale: f32,
) -> Tensor<B, D> {
    noise_pred_uncond.clone() + (noise_pred_cond - noise_pred_uncond) * guidance_scale
}

/// Sample standard deviation over every element
pub fn compute_tensor_std<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> Result<f32, TensorError> {
    let flattened = tensor.clone().flatten::<1>(0, D - 1);
    let std = flattened.var(0).sqrt();
    let values = data::to_vec(std)?;
    Ok(values.first().copied().unwrap_or(0.0))
}

/// Pull the guided prediction's spread back toward the conditional one
///
/// ```text
/// rescaled = guided · std(cond) / std(guided)
/// result   = rescale · rescaled + (1 - rescale) · guided
/// ```
pub fn rescale_guidance<B: Backend, const D: usize>(
    guided: Tensor<B, D>,
    noise_pred_cond: &Tensor<B, D>,
    guidance_rescale: f32,
) -> Result<Tensor<B, D>, TensorError> {
    if guidance_rescale <= 0.0 {
        return Ok(guided);
    }
    let std_cond = compute_tensor_std(noise_pred_cond)?;
    let std_guided = compute_tensor_std(&guided)?;
    if std_guided <= 1e-6 {
        return Ok(guided);
    }
    let factor = std_cond / std_guided * guidance_rescale + (1.0 - guidance_rescale);
    Ok(guided * factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn pair() -> (Tensor<TestBackend, 4>, Tensor<TestBackend, 4>) {
        let device = Default::default();
        let uncond = Tensor::<TestBackend, 4>::from_floats([[[[1.0, 2.0], [3.0, 4.0]]]], &device);
        let cond = Tensor::<TestBackend, 4>::from_floats([[[[3.0, 2.0], [1.0, 8.0]]]], &device);
        (uncond, cond)
    }

    #[test]
    fn test_scale_zero_returns_uncond() {
        let (uncond, cond) = pair();
        let out = apply_guidance(uncond.clone(), cond, 0.0);
        assert_eq!(data::to_vec(out).unwrap(), data::to_vec(uncond).unwrap());
    }

    #[test]
    fn test_scale_one_returns_cond() {
        let (uncond, cond) = pair();
        let out = apply_guidance(uncond, cond.clone(), 1.0);
        assert_eq!(data::to_vec(out).unwrap(), data::to_vec(cond).unwrap());
    }

    #[test]
    fn test_scale_half_is_midpoint() {
        let (uncond, cond) = pair();
        let out = apply_guidance(uncond, cond, 0.5);
        assert_eq!(data::to_vec(out).unwrap(), vec![2.0, 2.0, 2.0, 6.0]);
    }

    #[test]
    fn test_guidance_enabled_threshold() {
        assert!(!guidance_enabled(0.0));
        assert!(!guidance_enabled(1.0));
        assert!(guidance_enabled(1.01));
        assert!(guidance_enabled(7.5));
    }

    #[test]
    fn test_tensor_std() {
        let device = Default::default();
        let t = Tensor::<TestBackend, 4>::from_floats([[[[1.0, 2.0], [3.0, 4.0]]]], &device);
        // Sample variance of 1..4 is 5/3
        assert!((compute_tensor_std(&t).unwrap() - (5.0f32 / 3.0).sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_full_rescale_matches_cond_std() {
        let (uncond, cond) = pair();
        let guided = apply_guidance(uncond, cond.clone(), 7.5);
        let rescaled = rescale_guidance(guided, &cond, 1.0).unwrap();

        let expected = compute_tensor_std(&cond).unwrap();
        assert!((compute_tensor_std(&rescaled).unwrap() - expected).abs() < 1e-4);
    }

    #[test]
    fn test_zero_rescale_is_identity() {
        let (uncond, cond) = pair();
        let guided = apply_guidance(uncond, cond.clone(), 7.5);
        let out = rescale_guidance(guided.clone(), &cond, 0.0).unwrap();
        assert_eq!(data::to_vec(out).unwrap(), data::to_vec(guided).unwrap());
    }
}
