//! DDPM (Denoising Diffusion Probabilistic Models) scheduler
//!
//! Ho et al. 2020. The posterior mean is formula (7):
//!
//! ```text
//! μ̃ = sqrt(ā_prev)·β_t/(1 - ā_t) · x̂₀ + sqrt(α_t)·(1 - ā_prev)/(1 - ā_t) · x_t
//! ```
//!
//! and noise scaled by the posterior variance is added on every step but
//! the last.

use burn::prelude::*;
use burn_diffusion_core::numeric::safe_div;
use burn_diffusion_core::GaussianSampler;

use crate::config::{SchedulerConfig, SchedulerKind, VarianceType};
use crate::error::SchedulerError;
use crate::prediction::{alpha_prediction, clip_or_threshold};
use crate::schedule::{round_timesteps, spaced_timesteps, NoiseSchedule};
use crate::scheduler::{
    alpha_add_noise, ensure_same_shape, first_timestep, index_of, noise_like, Scheduler, StepResult,
};

/// Scale applied to unit noise: a constant, or per element for learned variances
enum NoiseScale<B: Backend, const D: usize> {
    Scalar(f32),
    Tensor(Tensor<B, D>),
}

impl<B: Backend, const D: usize> NoiseScale<B, D> {
    fn apply(self, noise: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            NoiseScale::Scalar(scale) => noise * scale,
            NoiseScale::Tensor(scale) => noise * scale,
        }
    }
}

/// DDPM scheduler
#[derive(Debug, Clone)]
pub struct DdpmScheduler {
    config: SchedulerConfig,
    schedule: NoiseSchedule,
    timesteps: Vec<usize>,
    noise: GaussianSampler,
}

impl DdpmScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let schedule = NoiseSchedule::from_config(&config);
        let timesteps = round_timesteps(&spaced_timesteps(&config));
        let noise = GaussianSampler::new(config.seed);

        Ok(Self {
            config,
            schedule,
            timesteps,
            noise,
        })
    }

    pub fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    fn previous_timestep(&self, timestep: usize) -> i64 {
        let ratio = self.config.train_timesteps / self.config.inference_steps;
        timestep as i64 - ratio as i64
    }

    fn alpha_at(&self, timestep: usize) -> Result<f32, SchedulerError> {
        self.schedule
            .alpha_cumprod(timestep)
            .ok_or(SchedulerError::UnknownTimestep(timestep))
    }

    /// Split off the predicted variance when the model doubles the channel axis
    fn split_variance<B: Backend, const D: usize>(
        &self,
        model_output: Tensor<B, D>,
        sample: &Tensor<B, D>,
    ) -> Result<(Tensor<B, D>, Option<Tensor<B, D>>), SchedulerError> {
        let out_dims = model_output.dims();
        let sample_dims = sample.dims();
        if D > 1 && self.config.variance_type.is_learned() && out_dims[1] == sample_dims[1] * 2 {
            let mut halves = model_output.chunk(2, 1).into_iter();
            if let (Some(output), Some(variance)) = (halves.next(), halves.next()) {
                return Ok((output, Some(variance)));
            }
            return Err(SchedulerError::config("could not split learned variance"));
        }
        ensure_same_shape(&model_output, sample)?;
        Ok((model_output, None))
    }

    /// Noise scale for the configured variance type
    ///
    /// `variance` is the clamped posterior variance; `current_beta` is
    /// `1 - ā_t/ā_prev`.
    fn noise_scale<B: Backend, const D: usize>(
        &self,
        variance: f32,
        current_beta: f32,
        predicted: Option<Tensor<B, D>>,
    ) -> NoiseScale<B, D> {
        match self.config.variance_type {
            VarianceType::FixedSmall => NoiseScale::Scalar(variance.sqrt()),
            VarianceType::FixedSmallLog => NoiseScale::Scalar((0.5 * variance.ln()).exp()),
            VarianceType::FixedLarge => NoiseScale::Scalar(current_beta.sqrt()),
            VarianceType::FixedLargeLog => NoiseScale::Scalar((0.5 * current_beta.ln()).exp()),
            VarianceType::Learned => match predicted {
                Some(predicted) => NoiseScale::Tensor(predicted.clamp_min(0.0).sqrt()),
                None => NoiseScale::Scalar(variance.sqrt()),
            },
            VarianceType::LearnedRange => {
                let min_log = variance.ln();
                let max_log = current_beta.max(1e-20).ln();
                match predicted {
                    Some(predicted) => {
                        let frac = (predicted + 1.0) / 2.0;
                        let log_variance = frac.clone() * max_log + (frac.neg() + 1.0) * min_log;
                        NoiseScale::Tensor((log_variance * 0.5).exp())
                    }
                    None => NoiseScale::Scalar((0.25 * (max_log + min_log)).exp()),
                }
            }
        }
    }
}

impl<B: Backend, const D: usize> Scheduler<B, D> for DdpmScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Ddpm
    }

    fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    fn init_noise_sigma(&self) -> f32 {
        1.0
    }

    fn scale_input(&self, sample: Tensor<B, D>, _timestep: usize) -> Result<Tensor<B, D>, SchedulerError> {
        Ok(sample)
    }

    fn step(
        &mut self,
        model_output: Tensor<B, D>,
        timestep: usize,
        sample: Tensor<B, D>,
    ) -> Result<StepResult<B, D>, SchedulerError> {
        index_of(&self.timesteps, timestep)?;
        let (model_output, predicted_variance) = self.split_variance(model_output, &sample)?;

        let alpha_prod = self.alpha_at(timestep)?;
        let alpha_prod_prev = self.schedule.alpha_cumprod_or(self.previous_timestep(timestep), 1.0);
        let beta_prod = 1.0 - alpha_prod;
        let beta_prod_prev = 1.0 - alpha_prod_prev;
        let current_alpha = safe_div(alpha_prod, alpha_prod_prev);
        let current_beta = 1.0 - current_alpha;

        let prediction = alpha_prediction(self.config.prediction_type, model_output, sample.clone(), alpha_prod);
        let original = clip_or_threshold(prediction.original, &self.config)?;

        let original_coeff = safe_div(alpha_prod_prev.sqrt() * current_beta, beta_prod);
        let sample_coeff = safe_div(current_alpha.sqrt() * beta_prod_prev, beta_prod);
        let mut prev_sample = original.clone() * original_coeff + sample * sample_coeff;

        if timestep > 0 {
            let variance = (safe_div(beta_prod_prev, beta_prod) * current_beta).max(1e-20);
            let noise = noise_like(&mut self.noise, &prev_sample);
            let scaled = self.noise_scale(variance, current_beta, predicted_variance).apply(noise);
            prev_sample = prev_sample + scaled;
        }

        Ok(StepResult::with_original(prev_sample, original))
    }

    fn add_noise(
        &self,
        original: Tensor<B, D>,
        noise: Tensor<B, D>,
        timesteps: &[usize],
    ) -> Result<Tensor<B, D>, SchedulerError> {
        let alpha_prod = self.alpha_at(first_timestep(timesteps)?)?;
        alpha_add_noise(original, noise, alpha_prod)
    }

    fn create_random_sample(&mut self, shape: [usize; D], init_sigma: f32, device: &B::Device) -> Tensor<B, D> {
        self.noise.sample(shape, init_sigma, device)
    }
}
