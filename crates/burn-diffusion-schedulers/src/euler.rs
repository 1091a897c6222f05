//! Euler and Euler Ancestral schedulers
//!
//! First-order solvers for the probability-flow ODE in sigma space
//! (Karras et al. 2022, Algorithm 2 with γ = 0):
//!
//! ```text
//! d = (x - x̂₀) / σ
//! x_next = x + d·(σ_next - σ)
//! ```
//!
//! The ancestral variant steps down to `σ_down` and re-injects `σ_up` of
//! fresh noise.

use burn::prelude::*;
use burn_diffusion_core::{ops, GaussianSampler};

use crate::config::{SchedulerConfig, SchedulerKind};
use crate::error::SchedulerError;
use crate::prediction::sigma_predicted_original;
use crate::schedule::{ancestral_step, SigmaSchedule};
use crate::scheduler::{
    ensure_same_shape, max_sigma_at, noise_like, sigma_scale_input, Scheduler, StepCursor, StepResult,
};

/// `(x - x̂₀) / σ`
pub(crate) fn derivative<B: Backend, const D: usize>(
    sample: Tensor<B, D>,
    original: Tensor<B, D>,
    sigma: f32,
) -> Tensor<B, D> {
    ops::divide_by_scalar(&(sample - original), sigma)
}

// ============================================================================
// Euler
// ============================================================================

/// Euler scheduler
#[derive(Debug, Clone)]
pub struct EulerScheduler {
    config: SchedulerConfig,
    steps: SigmaSchedule,
    cursor: StepCursor,
    noise: GaussianSampler,
}

impl EulerScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let steps = SigmaSchedule::new(&config);
        let noise = GaussianSampler::new(config.seed);

        Ok(Self {
            config,
            steps,
            cursor: StepCursor::default(),
            noise,
        })
    }

    pub fn timesteps(&self) -> &[usize] {
        &self.steps.timesteps
    }

    /// Sigmas, one per timestep plus a trailing zero
    pub fn sigmas(&self) -> &[f32] {
        &self.steps.sigmas
    }
}

impl<B: Backend, const D: usize> Scheduler<B, D> for EulerScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Euler
    }

    fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn timesteps(&self) -> &[usize] {
        &self.steps.timesteps
    }

    fn init_noise_sigma(&self) -> f32 {
        self.steps.init_noise_sigma
    }

    fn scale_input(&self, sample: Tensor<B, D>, timestep: usize) -> Result<Tensor<B, D>, SchedulerError> {
        let index = self.cursor.resolve(&self.steps.timesteps, timestep)?;
        Ok(sigma_scale_input(sample, self.steps.sigmas[index]))
    }

    fn step(
        &mut self,
        model_output: Tensor<B, D>,
        timestep: usize,
        sample: Tensor<B, D>,
    ) -> Result<StepResult<B, D>, SchedulerError> {
        ensure_same_shape(&model_output, &sample)?;
        let index = self.cursor.resolve(&self.steps.timesteps, timestep)?;
        let sigma = self.steps.sigmas[index];
        let sigma_next = self.steps.sigmas[index + 1];

        let original = sigma_predicted_original(self.config.prediction_type, model_output, sample.clone(), sigma);
        let d = derivative(sample.clone(), original.clone(), sigma);
        let prev_sample = sample + d * (sigma_next - sigma);

        self.cursor.advance(index);
        Ok(StepResult::with_original(prev_sample, original))
    }

    fn add_noise(
        &self,
        original: Tensor<B, D>,
        noise: Tensor<B, D>,
        timesteps: &[usize],
    ) -> Result<Tensor<B, D>, SchedulerError> {
        let sigma = max_sigma_at(&self.steps.timesteps, &self.steps.sigmas, timesteps)?;
        ops::ensure_same_shape(original.dims(), noise.dims())?;
        Ok(original + noise * sigma)
    }

    fn create_random_sample(&mut self, shape: [usize; D], init_sigma: f32, device: &B::Device) -> Tensor<B, D> {
        self.noise.sample(shape, init_sigma, device)
    }
}

// ============================================================================
// Euler Ancestral
// ============================================================================

/// Euler Ancestral scheduler
#[derive(Debug, Clone)]
pub struct EulerAncestralScheduler {
    config: SchedulerConfig,
    steps: SigmaSchedule,
    cursor: StepCursor,
    noise: GaussianSampler,
}

impl EulerAncestralScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let steps = SigmaSchedule::new(&config);
        let noise = GaussianSampler::new(config.seed);

        Ok(Self {
            config,
            steps,
            cursor: StepCursor::default(),
            noise,
        })
    }

    pub fn timesteps(&self) -> &[usize] {
        &self.steps.timesteps
    }

    pub fn sigmas(&self) -> &[f32] {
        &self.steps.sigmas
    }
}

impl<B: Backend, const D: usize> Scheduler<B, D> for EulerAncestralScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::EulerAncestral
    }

    fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn timesteps(&self) -> &[usize] {
        &self.steps.timesteps
    }

    fn init_noise_sigma(&self) -> f32 {
        self.steps.init_noise_sigma
    }

    fn scale_input(&self, sample: Tensor<B, D>, timestep: usize) -> Result<Tensor<B, D>, SchedulerError> {
        let index = self.cursor.resolve(&self.steps.timesteps, timestep)?;
        Ok(sigma_scale_input(sample, self.steps.sigmas[index]))
    }

    fn step(
        &mut self,
        model_output: Tensor<B, D>,
        timestep: usize,
        sample: Tensor<B, D>,
    ) -> Result<StepResult<B, D>, SchedulerError> {
        ensure_same_shape(&model_output, &sample)?;
        let index = self.cursor.resolve(&self.steps.timesteps, timestep)?;
        let sigma = self.steps.sigmas[index];
        let (sigma_down, sigma_up) = ancestral_step(sigma, self.steps.sigmas[index + 1]);

        let original = sigma_predicted_original(self.config.prediction_type, model_output, sample.clone(), sigma);
        let d = derivative(sample.clone(), original.clone(), sigma);
        let mut prev_sample = sample + d * (sigma_down - sigma);
        if sigma_up != 0.0 {
            prev_sample = prev_sample.clone() + noise_like(&mut self.noise, &prev_sample) * sigma_up;
        }

        self.cursor.advance(index);
        Ok(StepResult::with_original(prev_sample, original))
    }

    fn add_noise(
        &self,
        original: Tensor<B, D>,
        noise: Tensor<B, D>,
        timesteps: &[usize],
    ) -> Result<Tensor<B, D>, SchedulerError> {
        let sigma = max_sigma_at(&self.steps.timesteps, &self.steps.sigmas, timesteps)?;
        ops::ensure_same_shape(original.dims(), noise.dims())?;
        Ok(original + noise * sigma)
    }

    fn create_random_sample(&mut self, shape: [usize; D], init_sigma: f32, device: &B::Device) -> Tensor<B, D> {
        self.noise.sample(shape, init_sigma, device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_diffusion_core::data;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_exact_noise_prediction_recovers_clean_sample() {
        let device = Default::default();
        let mut scheduler = EulerScheduler::new(SchedulerConfig::with_steps(12)).unwrap();
        let x0 = Tensor::<TestBackend, 4>::from_floats([[[[0.2, -0.4], [0.6, 1.0]]]], &device);
        let eps = Tensor::<TestBackend, 4>::from_floats([[[[1.0, 0.5], [-1.0, 0.0]]]], &device);

        let first = scheduler.timesteps()[0];
        let mut latent = scheduler.add_noise(x0.clone(), eps.clone(), &[first]).unwrap();
        for t in scheduler.timesteps().to_vec() {
            latent = scheduler.step(eps.clone(), t, latent).unwrap().prev_sample;
        }

        let expected = data::to_vec(x0).unwrap();
        for (a, b) in data::to_vec(latent).unwrap().iter().zip(expected) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn test_scale_input() {
        let device = Default::default();
        let scheduler = EulerScheduler::new(SchedulerConfig::with_steps(10)).unwrap();
        let sigma = scheduler.sigmas()[0];
        let sample = Tensor::<TestBackend, 1>::from_floats([2.0], &device);
        let scaled = data::to_vec(scheduler.scale_input(sample, 999).unwrap()).unwrap();
        assert!((scaled[0] - 2.0 / (sigma * sigma + 1.0).sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_ancestral_noise_depends_on_seed() {
        let device = Default::default();
        let sample = Tensor::<TestBackend, 4>::ones([1, 1, 2, 2], &device);
        let out = Tensor::<TestBackend, 4>::zeros([1, 1, 2, 2], &device);

        let run = |seed: u64| {
            let mut scheduler = EulerAncestralScheduler::new(SchedulerConfig {
                seed,
                ..SchedulerConfig::with_steps(10)
            })
            .unwrap();
            let t = scheduler.timesteps()[0];
            data::to_vec(scheduler.step(out.clone(), t, sample.clone()).unwrap().prev_sample).unwrap()
        };

        assert_eq!(run(3), run(3));
        assert_ne!(run(3), run(4));
    }

    #[test]
    fn test_ancestral_last_step_is_deterministic() {
        let device = Default::default();
        let mut scheduler = EulerAncestralScheduler::new(SchedulerConfig::with_steps(4)).unwrap();
        let sample = Tensor::<TestBackend, 4>::ones([1, 1, 2, 2], &device);
        let out = Tensor::<TestBackend, 4>::ones([1, 1, 2, 2], &device) * 0.5;

        let last = *scheduler.timesteps().last().unwrap();
        let sigma = scheduler.sigmas()[3];
        let prev = scheduler.step(out, last, sample).unwrap().prev_sample;
        for v in data::to_vec(prev).unwrap() {
            assert!((v - (1.0 - 0.5 * sigma)).abs() < 1e-5);
        }
    }
}
