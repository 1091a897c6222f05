//! DDIM (Denoising Diffusion Implicit Models) scheduler
//!
//! Song et al. 2020, formula (12):
//!
//! ```text
//! x_prev = sqrt(ā_prev)·x̂₀ + sqrt(1 - ā_prev - σ_t²)·ε̂ + σ_t·z
//! σ_t    = η · sqrt((1 - ā_prev)/(1 - ā_t) · (1 - ā_t/ā_prev))
//! ```
//!
//! With η = 0 (the default) sampling is deterministic.

use burn::prelude::*;
use burn_diffusion_core::numeric::safe_div;
use burn_diffusion_core::GaussianSampler;

use crate::config::{SchedulerConfig, SchedulerKind};
use crate::error::SchedulerError;
use crate::prediction::{alpha_prediction, clip_or_threshold};
use crate::schedule::{round_timesteps, spaced_timesteps, NoiseSchedule};
use crate::scheduler::{
    alpha_add_noise, ensure_same_shape, first_timestep, index_of, noise_like, Scheduler, StepResult,
};

/// DDIM scheduler
#[derive(Debug, Clone)]
pub struct DdimScheduler {
    config: SchedulerConfig,
    schedule: NoiseSchedule,
    timesteps: Vec<usize>,
    /// ā used once the previous timestep falls before the schedule
    final_alpha_cumprod: f32,
    noise: GaussianSampler,
}

impl DdimScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let schedule = NoiseSchedule::from_config(&config);
        let timesteps = round_timesteps(&spaced_timesteps(&config));
        let noise = GaussianSampler::new(config.seed);

        Ok(Self {
            config,
            schedule,
            timesteps,
            final_alpha_cumprod: 1.0,
            noise,
        })
    }

    pub fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    pub fn schedule(&self) -> &NoiseSchedule {
        &self.schedule
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
}

/// `(1 - ā_prev)/(1 - ā_t) · (1 - ā_t/ā_prev)`
pub fn ddim_variance(alpha_prod: f32, alpha_prod_prev: f32) -> f32 {
    let beta_prod = 1.0 - alpha_prod;
    let beta_prod_prev = 1.0 - alpha_prod_prev;
    (safe_div(beta_prod_prev, beta_prod) * (1.0 - safe_div(alpha_prod, alpha_prod_prev))).max(0.0)
}

impl<B: Backend, const D: usize> Scheduler<B, D> for DdimScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Ddim
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
        ensure_same_shape(&model_output, &sample)?;
        index_of(&self.timesteps, timestep)?;

        let alpha_prod = self.alpha_at(timestep)?;
        let alpha_prod_prev = self
            .schedule
            .alpha_cumprod_or(self.previous_timestep(timestep), self.final_alpha_cumprod);

        let prediction = alpha_prediction(self.config.prediction_type, model_output, sample, alpha_prod);
        let original = clip_or_threshold(prediction.original, &self.config)?;

        let std_dev = self.config.eta * ddim_variance(alpha_prod, alpha_prod_prev).sqrt();
        let direction = prediction.epsilon * (1.0 - alpha_prod_prev - std_dev * std_dev).max(0.0).sqrt();
        let mut prev_sample = original.clone() * alpha_prod_prev.sqrt() + direction;

        if self.config.eta > 0.0 {
            prev_sample = prev_sample.clone() + noise_like(&mut self.noise, &prev_sample) * std_dev;
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
