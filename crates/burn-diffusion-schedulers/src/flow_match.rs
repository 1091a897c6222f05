//! Flow-matching Euler schedulers (SD3, Flux)
//!
//! The model predicts the velocity `v = noise - x₀` along the straight path
//! `x_σ = σ·noise + (1 - σ)·x₀`, with shifted sigmas
//!
//! ```text
//! σ(t) = shift·t / (1 + (shift - 1)·t)
//! ```
//!
//! [`FlowMatchMode::Discrete`] integrates the ODE with Euler steps;
//! [`FlowMatchMode::Dynamic`] re-noises the x₀ estimate with fresh noise at
//! every step.

use burn::prelude::*;
use burn_diffusion_core::{ops, GaussianSampler};

use crate::config::{SchedulerConfig, SchedulerKind};
use crate::error::SchedulerError;
use crate::schedule::linspace;
use crate::scheduler::{ensure_same_shape, max_sigma_at, noise_like, Scheduler, StepCursor, StepResult};

/// Update rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMatchMode {
    Discrete,
    Dynamic,
}

/// `shift·t / (1 + (shift - 1)·t)`
pub fn shift_sigma(t: f64, shift: f64) -> f64 {
    shift * t / (1.0 + (shift - 1.0) * t)
}

/// Flow-match Euler scheduler
#[derive(Debug, Clone)]
pub struct FlowMatchEulerScheduler {
    config: SchedulerConfig,
    mode: FlowMatchMode,
    timesteps: Vec<usize>,
    /// Descending, with a trailing zero
    sigmas: Vec<f32>,
    cursor: StepCursor,
    noise: GaussianSampler,
}

impl FlowMatchEulerScheduler {
    pub fn new(config: SchedulerConfig, mode: FlowMatchMode) -> Result<Self, SchedulerError> {
        config.validate()?;
        let t = config.train_timesteps as f64;
        let shift = config.shift as f64;
        let n = config.inference_steps;

        // Shifted training sigmas bound the inference range
        let training: Vec<f64> = (1..=config.train_timesteps)
            .map(|i| shift_sigma(i as f64 / t, shift))
            .collect();
        let sigma_min = training.iter().copied().fold(f64::INFINITY, f64::min);
        let sigma_max = training.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let raw = if n == 1 {
            vec![t]
        } else {
            linspace(sigma_min * t, sigma_max * t, n)
        };

        let mut sigmas: Vec<f32> = raw
            .iter()
            .map(|&ts| shift_sigma(ts / t, shift) as f32)
            .collect();
        sigmas.sort_by(|a, b| b.total_cmp(a));

        let timesteps = sigmas
            .iter()
            .map(|&s| (s as f64 * t).round() as usize)
            .collect();
        sigmas.push(0.0);
        let noise = GaussianSampler::new(config.seed);

        Ok(Self {
            config,
            mode,
            timesteps,
            sigmas,
            cursor: StepCursor::default(),
            noise,
        })
    }

    pub fn mode(&self) -> FlowMatchMode {
        self.mode
    }

    pub fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    pub fn sigmas(&self) -> &[f32] {
        &self.sigmas
    }
}

impl<B: Backend, const D: usize> Scheduler<B, D> for FlowMatchEulerScheduler {
    fn kind(&self) -> SchedulerKind {
        match self.mode {
            FlowMatchMode::Discrete => SchedulerKind::FlowMatchEulerDiscrete,
            FlowMatchMode::Dynamic => SchedulerKind::FlowMatchEulerDynamic,
        }
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
        let index = self.cursor.resolve(&self.timesteps, timestep)?;
        let sigma = self.sigmas[index];
        let sigma_next = self.sigmas[index + 1];
        let original = sample.clone() - model_output.clone() * sigma;

        let prev_sample = match self.mode {
            FlowMatchMode::Discrete => sample + model_output * (sigma_next - sigma),
            FlowMatchMode::Dynamic => {
                let noise = noise_like(&mut self.noise, &sample);
                noise * sigma_next + original.clone() * (1.0 - sigma_next)
            }
        };

        self.cursor.advance(index);
        Ok(StepResult::with_original(prev_sample, original))
    }

    fn add_noise(
        &self,
        original: Tensor<B, D>,
        noise: Tensor<B, D>,
        timesteps: &[usize],
    ) -> Result<Tensor<B, D>, SchedulerError> {
        let sigma = max_sigma_at(&self.timesteps, &self.sigmas, timesteps)?;
        ops::ensure_same_shape(original.dims(), noise.dims())?;
        Ok(noise * sigma + original * (1.0 - sigma))
    }

    fn create_random_sample(&mut self, shape: [usize; D], init_sigma: f32, device: &B::Device) -> Tensor<B, D> {
        self.noise.sample(shape, init_sigma, device)
    }
}
