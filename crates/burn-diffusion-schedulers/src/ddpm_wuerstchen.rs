//! DDPM scheduler for Würstchen's continuous-time prior
//!
//! Timesteps are ratios in `(0, 1]` (reported ×1000 as integers) and ā is
//! the shifted cosine curve evaluated directly at the ratio:
//!
//! ```text
//! ā(r) = clamp(cos((r + s)/(1 + s) · π/2)² / ā(0), 1e-4, 0.9999),  s = 0.008
//! ```

use burn::prelude::*;
use burn_diffusion_core::GaussianSampler;

use crate::config::{SchedulerConfig, SchedulerKind};
use crate::error::SchedulerError;
use crate::schedule::linspace;
use crate::scheduler::{
    alpha_add_noise, ensure_same_shape, first_timestep, index_of, noise_like, Scheduler, StepResult,
};

/// Integer timesteps are ratios scaled by this
pub const TIMESTEP_RATIO: f32 = 1000.0;

const COSINE_OFFSET: f64 = 0.008;

/// DDPM-Würstchen scheduler
#[derive(Debug, Clone)]
pub struct DdpmWuerstchenScheduler {
    config: SchedulerConfig,
    timesteps: Vec<usize>,
    init_alpha_cumprod: f64,
    noise: GaussianSampler,
}

impl DdpmWuerstchenScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let n = config.inference_steps;
        let mut timesteps: Vec<usize> = linspace(0.0, TIMESTEP_RATIO as f64, n + 1)
            .into_iter()
            .skip(1)
            .map(|t| t as usize)
            .collect();
        timesteps.reverse();

        let init_alpha_cumprod = (COSINE_OFFSET / (1.0 + COSINE_OFFSET) * std::f64::consts::FRAC_PI_2)
            .cos()
            .powi(2);
        let noise = GaussianSampler::new(config.seed);

        Ok(Self {
            config,
            timesteps,
            init_alpha_cumprod,
            noise,
        })
    }

    pub fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    /// ā at an integer timestep
    pub fn alpha_cumprod(&self, timestep: usize) -> f32 {
        let ratio = timestep as f64 / TIMESTEP_RATIO as f64;
        let curve = ((ratio + COSINE_OFFSET) / (1.0 + COSINE_OFFSET) * std::f64::consts::FRAC_PI_2)
            .cos()
            .powi(2);
        (curve / self.init_alpha_cumprod).clamp(1e-4, 0.9999) as f32
    }

    fn previous_timestep(&self, index: usize) -> usize {
        self.timesteps.get(index + 1).copied().unwrap_or(0)
    }
}

impl<B: Backend, const D: usize> Scheduler<B, D> for DdpmWuerstchenScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::DdpmWuerstchen
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
        let index = index_of(&self.timesteps, timestep)?;
        let prev_timestep = self.previous_timestep(index);

        let alpha_prod = self.alpha_cumprod(timestep);
        let alpha_prod_prev = self.alpha_cumprod(prev_timestep);
        let alpha = alpha_prod / alpha_prod_prev;

        let mean = (sample - model_output * ((1.0 - alpha) / (1.0 - alpha_prod).sqrt())) * (1.0 / alpha).sqrt();

        let std_dev = ((1.0 - alpha) * (1.0 - alpha_prod_prev) / (1.0 - alpha_prod)).max(0.0).sqrt();
        let noise = noise_like(&mut self.noise, &mean);

        Ok(StepResult::new(mean + noise * std_dev))
    }

    fn add_noise(
        &self,
        original: Tensor<B, D>,
        noise: Tensor<B, D>,
        timesteps: &[usize],
    ) -> Result<Tensor<B, D>, SchedulerError> {
        let alpha_prod = self.alpha_cumprod(first_timestep(timesteps)?);
        alpha_add_noise(original, noise, alpha_prod)
    }

    fn create_random_sample(&mut self, shape: [usize; D], init_sigma: f32, device: &B::Device) -> Tensor<B, D> {
        self.noise.sample(shape, init_sigma, device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timesteps_skip_zero_and_descend() {
        let scheduler = DdpmWuerstchenScheduler::new(SchedulerConfig::with_steps(4)).unwrap();
        assert_eq!(scheduler.timesteps(), &[1000, 750, 500, 250]);
        assert_eq!(scheduler.previous_timestep(0), 750);
        assert_eq!(scheduler.previous_timestep(3), 0);
    }

    #[test]
    fn test_alpha_cumprod_is_clamped_and_decreasing() {
        let scheduler = DdpmWuerstchenScheduler::new(SchedulerConfig::with_steps(4)).unwrap();
        assert!((scheduler.alpha_cumprod(0) - 0.9999).abs() < 1e-6);
        assert!((scheduler.alpha_cumprod(1000) - 1e-4).abs() < 1e-7);
        let mid = scheduler.alpha_cumprod(500);
        assert!(mid > 0.4 && mid < 0.6, "{mid}");
        assert!(scheduler.alpha_cumprod(250) > mid);
    }
}
