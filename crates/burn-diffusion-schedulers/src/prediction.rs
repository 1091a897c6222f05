//! Predicted-x₀ conversions and x₀ post-processing

use burn::prelude::*;
use burn_diffusion_core::{data, ops, TensorError};

use crate::config::{PredictionType, SchedulerConfig};

// ============================================================================
// Sigma parameterization
// ============================================================================

/// Predicted x₀ for sigma-parameterized schedulers
///
/// - ε: `x - σ·out`
/// - v: `x / (σ² + 1) - out · σ / sqrt(σ² + 1)`
/// - x₀: `out`
pub fn sigma_predicted_original<B: Backend, const D: usize>(
    prediction_type: PredictionType,
    model_output: Tensor<B, D>,
    sample: Tensor<B, D>,
    sigma: f32,
) -> Tensor<B, D> {
    match prediction_type {
        PredictionType::Epsilon => sample - model_output * sigma,
        PredictionType::VariablePrediction => {
            let c = sigma * sigma + 1.0;
            sample / c + model_output * (-sigma / c.sqrt())
        }
        PredictionType::Sample => model_output,
    }
}

// ============================================================================
// Alpha parameterization
// ============================================================================

/// Predicted x₀ and ε at one alpha-parameterized step
pub struct AlphaPrediction<B: Backend, const D: usize> {
    pub original: Tensor<B, D>,
    pub epsilon: Tensor<B, D>,
}

/// Predicted x₀ and ε from the model output at cumulative alpha `alpha_prod`
pub fn alpha_prediction<B: Backend, const D: usize>(
    prediction_type: PredictionType,
    model_output: Tensor<B, D>,
    sample: Tensor<B, D>,
    alpha_prod: f32,
) -> AlphaPrediction<B, D> {
    let sqrt_alpha = alpha_prod.sqrt();
    let sqrt_beta = (1.0 - alpha_prod).max(0.0).sqrt();

    match prediction_type {
        PredictionType::Epsilon => AlphaPrediction {
            original: ops::divide_by_scalar(&(sample - model_output.clone() * sqrt_beta), sqrt_alpha),
            epsilon: model_output,
        },
        PredictionType::Sample => AlphaPrediction {
            epsilon: ops::divide_by_scalar(&(sample - model_output.clone() * sqrt_alpha), sqrt_beta),
            original: model_output,
        },
        PredictionType::VariablePrediction => AlphaPrediction {
            original: sample.clone() * sqrt_alpha - model_output.clone() * sqrt_beta,
            epsilon: model_output * sqrt_alpha + sample * sqrt_beta,
        },
    }
}

// ============================================================================
// Clipping and thresholding
// ============================================================================

/// Apply the configured clip or dynamic threshold to a predicted x₀
pub fn clip_or_threshold<B: Backend, const D: usize>(
    original: Tensor<B, D>,
    config: &SchedulerConfig,
) -> Result<Tensor<B, D>, TensorError> {
    if config.thresholding {
        dynamic_threshold(original, config.dynamic_thresholding_ratio, config.sample_max_value)
    } else if config.clip_sample {
        let range = config.clip_sample_range;
        Ok(ops::clip(&original, -range, range))
    } else {
        Ok(original)
    }
}

/// Dynamic thresholding (Imagen, Saharia et al. 2022)
///
/// For each batch item, `s` is the `ratio` quantile of `|x|`, clamped to
/// `[1, max_value]`; the item is then clamped to `[-s, s]` and divided by `s`.
pub fn dynamic_threshold<B: Backend, const D: usize>(
    sample: Tensor<B, D>,
    ratio: f32,
    max_value: f32,
) -> Result<Tensor<B, D>, TensorError> {
    let dims = sample.dims();
    let device = sample.device();
    let batch = dims[0].max(1);
    let mut values = data::to_vec(sample)?;
    let per_item = values.len() / batch;
    if per_item == 0 {
        return data::from_vec(values, dims, &device);
    }

    for item in values.chunks_mut(per_item) {
        let mut magnitudes: Vec<f32> = item.iter().map(|v| v.abs()).collect();
        magnitudes.sort_by(f32::total_cmp);
        let s = quantile_sorted(&magnitudes, ratio).clamp(1.0, max_value.max(1.0));
        for v in item.iter_mut() {
            *v = v.clamp(-s, s) / s;
        }
    }

    data::from_vec(values, dims, &device)
}

/// Linearly interpolated quantile of ascending `values`
fn quantile_sorted(values: &[f32], q: f32) -> f32 {
    let Some(&last) = values.last() else {
        return 0.0;
    };
    let pos = q.clamp(0.0, 1.0) * (values.len() - 1) as f32;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(values.len() - 1);
    if lo >= values.len() - 1 {
        return last;
    }
    values[lo] + (values[hi] - values[lo]) * (pos - lo as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn values<const D: usize>(t: Tensor<TestBackend, D>) -> Vec<f32> {
        data::to_vec(t).unwrap()
    }

    #[test]
    fn test_sigma_predicted_original() {
        let device = Default::default();
        let sample = Tensor::<TestBackend, 1>::from_floats([2.0, 4.0], &device);
        let out = Tensor::<TestBackend, 1>::from_floats([1.0, -1.0], &device);

        let eps = values(sigma_predicted_original(PredictionType::Epsilon, out.clone(), sample.clone(), 0.5));
        assert_eq!(eps, vec![1.5, 4.5]);

        let x0 = values(sigma_predicted_original(PredictionType::Sample, out.clone(), sample.clone(), 0.5));
        assert_eq!(x0, vec![1.0, -1.0]);

        // σ = 1: x / 2 - out / √2
        let v = values(sigma_predicted_original(PredictionType::VariablePrediction, out, sample, 1.0));
        let r = 1.0 / 2.0f32.sqrt();
        assert!((v[0] - (1.0 - r)).abs() < 1e-6);
        assert!((v[1] - (2.0 + r)).abs() < 1e-6);
    }

    #[test]
    fn test_alpha_prediction_types_agree() {
        let device = Default::default();
        let alpha = 0.64f32;
        let x0 = Tensor::<TestBackend, 1>::from_floats([0.5, -0.25], &device);
        let eps = Tensor::<TestBackend, 1>::from_floats([1.0, 2.0], &device);
        let sample = x0.clone() * 0.8 + eps.clone() * 0.6;
        let v = eps.clone() * 0.8 - x0.clone() * 0.6;

        for (kind, out) in [
            (PredictionType::Epsilon, eps.clone()),
            (PredictionType::Sample, x0.clone()),
            (PredictionType::VariablePrediction, v),
        ] {
            let p = alpha_prediction(kind, out, sample.clone(), alpha);
            for (a, b) in values(p.original).iter().zip(values(x0.clone())) {
                assert!((a - b).abs() < 1e-5, "{kind}: x0 {a} vs {b}");
            }
            for (a, b) in values(p.epsilon).iter().zip(values(eps.clone())) {
                assert!((a - b).abs() < 1e-5, "{kind}: eps {a} vs {b}");
            }
        }
    }

    #[test]
    fn test_clip() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([-3.0, 0.5, 3.0], &device);
        let config = SchedulerConfig {
            clip_sample: true,
            clip_sample_range: 2.0,
            ..Default::default()
        };
        assert_eq!(values(clip_or_threshold(x.clone(), &config).unwrap()), vec![-2.0, 0.5, 2.0]);
        assert_eq!(
            values(clip_or_threshold(x, &SchedulerConfig::default()).unwrap()),
            vec![-3.0, 0.5, 3.0]
        );
    }

    #[test]
    fn test_dynamic_threshold_per_batch_item() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::from_floats([[4.0, -4.0, 2.0, 0.0], [0.5, -0.5, 0.25, 0.0]], &device);
        let out = values(dynamic_threshold(x, 1.0, 3.0).unwrap());

        // First item: quantile 4 clamped to 3
        assert_eq!(&out[..4], &[1.0, -1.0, 2.0 / 3.0, 0.0]);
        // Second item: quantile 0.5 clamped up to 1, so unchanged
        assert_eq!(&out[4..], &[0.5, -0.5, 0.25, 0.0]);
    }

    #[test]
    fn test_quantile_interpolates() {
        assert_eq!(quantile_sorted(&[0.0, 1.0, 2.0, 3.0], 0.5), 1.5);
        assert_eq!(quantile_sorted(&[0.0, 1.0], 1.0), 1.0);
        assert_eq!(quantile_sorted(&[], 0.5), 0.0);
    }
}
