//! The scheduler contract shared by every algorithm
//!
//! A scheduler owns the timestep sequence and noise schedule for one
//! generation. The sampling loop drives it as:
//!
//! ```ignore
//! let mut latents = scheduler.create_random_sample(shape, scheduler.init_noise_sigma(), &device);
//! for &t in scheduler.timesteps().to_vec().iter() {
//!     let input = scheduler.scale_input(latents.clone(), t)?;
//!     let noise_pred = model.predict(input, t);
//!     latents = scheduler.step(noise_pred, t, latents)?.prev_sample;
//! }
//! ```

use burn::prelude::*;
use burn_diffusion_core::{ops, GaussianSampler};

use crate::config::{SchedulerConfig, SchedulerKind};
use crate::error::SchedulerError;

/// Output of one scheduler step
#[derive(Debug, Clone)]
pub struct StepResult<B: Backend, const D: usize> {
    /// Latent for the next timestep, same shape as the input sample
    pub prev_sample: Tensor<B, D>,
    /// The scheduler's estimate of the clean sample, where it computes one
    pub pred_original_sample: Option<Tensor<B, D>>,
}

impl<B: Backend, const D: usize> StepResult<B, D> {
    pub fn new(prev_sample: Tensor<B, D>) -> Self {
        Self {
            prev_sample,
            pred_original_sample: None,
        }
    }

    pub fn with_original(prev_sample: Tensor<B, D>, original: Tensor<B, D>) -> Self {
        Self {
            prev_sample,
            pred_original_sample: Some(original),
        }
    }
}

/// A diffusion scheduler over rank-`D` latents
pub trait Scheduler<B: Backend, const D: usize> {
    fn kind(&self) -> SchedulerKind;

    fn config(&self) -> &SchedulerConfig;

    /// Descending timesteps, `order()` entries per inference step
    fn timesteps(&self) -> &[usize];

    /// Scale of the initial random latent
    fn init_noise_sigma(&self) -> f32;

    /// Timesteps consumed per inference step
    fn order(&self) -> usize {
        1
    }

    /// Scale the latent before it is fed to the model
    fn scale_input(&self, sample: Tensor<B, D>, timestep: usize) -> Result<Tensor<B, D>, SchedulerError>;

    /// Advance the latent by one timestep from the model's prediction
    fn step(
        &mut self,
        model_output: Tensor<B, D>,
        timestep: usize,
        sample: Tensor<B, D>,
    ) -> Result<StepResult<B, D>, SchedulerError>;

    /// Forward-noise `original` to the noise level of `timesteps`
    fn add_noise(
        &self,
        original: Tensor<B, D>,
        noise: Tensor<B, D>,
        timesteps: &[usize],
    ) -> Result<Tensor<B, D>, SchedulerError>;

    /// Draw a Gaussian latent scaled by `init_sigma` from the scheduler's seeded generator
    fn create_random_sample(&mut self, shape: [usize; D], init_sigma: f32, device: &B::Device) -> Tensor<B, D>;
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Position of `timestep` in a schedule
pub(crate) fn index_of(timesteps: &[usize], timestep: usize) -> Result<usize, SchedulerError> {
    timesteps
        .iter()
        .position(|&t| t == timestep)
        .ok_or(SchedulerError::UnknownTimestep(timestep))
}

/// Step cursor for schedules whose timesteps may repeat
///
/// Sequential calls advance past duplicates; the first call (or a jump)
/// resolves by first occurrence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StepCursor {
    next: Option<usize>,
}

impl StepCursor {
    pub fn resolve(&self, timesteps: &[usize], timestep: usize) -> Result<usize, SchedulerError> {
        match self.next {
            Some(i) if timesteps.get(i) == Some(&timestep) => Ok(i),
            _ => index_of(timesteps, timestep),
        }
    }

    pub fn advance(&mut self, index: usize) {
        self.next = Some(index + 1);
    }

    pub fn current(&self) -> Option<usize> {
        self.next
    }
}

pub(crate) fn ensure_same_shape<B: Backend, const D: usize>(
    model_output: &Tensor<B, D>,
    sample: &Tensor<B, D>,
) -> Result<(), SchedulerError> {
    ops::ensure_same_shape(sample.dims(), model_output.dims())?;
    Ok(())
}

/// Largest sigma among the requested timesteps
pub(crate) fn max_sigma_at(
    timesteps: &[usize],
    sigmas: &[f32],
    requested: &[usize],
) -> Result<f32, SchedulerError> {
    if requested.is_empty() {
        return Err(SchedulerError::config("add_noise needs at least one timestep"));
    }
    requested.iter().try_fold(0.0f32, |max, &t| {
        let i = index_of(timesteps, t)?;
        Ok(max.max(sigmas[i]))
    })
}

/// First requested timestep, for alpha-parameterized forward noising
pub(crate) fn first_timestep(requested: &[usize]) -> Result<usize, SchedulerError> {
    requested
        .first()
        .copied()
        .ok_or_else(|| SchedulerError::config("add_noise needs at least one timestep"))
}

/// `sqrt(ā)·original + sqrt(1 - ā)·noise`
pub(crate) fn alpha_add_noise<B: Backend, const D: usize>(
    original: Tensor<B, D>,
    noise: Tensor<B, D>,
    alpha_prod: f32,
) -> Result<Tensor<B, D>, SchedulerError> {
    ops::ensure_same_shape(original.dims(), noise.dims())?;
    Ok(original * alpha_prod.sqrt() + noise * (1.0 - alpha_prod).max(0.0).sqrt())
}

/// `sample / sqrt(σ² + 1)`
pub(crate) fn sigma_scale_input<B: Backend, const D: usize>(sample: Tensor<B, D>, sigma: f32) -> Tensor<B, D> {
    sample / (sigma * sigma + 1.0).sqrt()
}

pub(crate) fn noise_like<B: Backend, const D: usize>(
    noise: &mut GaussianSampler,
    like: &Tensor<B, D>,
) -> Tensor<B, D> {
    noise.sample(like.dims(), 1.0, &like.device())
}
