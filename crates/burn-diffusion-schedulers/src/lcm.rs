//! LCM (Latent Consistency Model) scheduler, and its Locomotion video variant
//!
//! Consistency models map any point on the trajectory straight to x₀. Each
//! step combines the sample and the predicted x₀ with the boundary
//! scalings, then re-noises to the next timestep:
//!
//! ```text
//! c_skip = σ_d² / ((10t)² + σ_d²)
//! c_out  = 10t / sqrt((10t)² + σ_d²)
//! denoised = c_skip·x + c_out·x̂₀
//! ```
//!
//! Locomotion draws video noise in blocks of `motion_noise_context` frames
//! and tiles them along the frame axis so overlapping context windows see
//! the same motion noise.

use burn::prelude::*;
use burn_diffusion_core::GaussianSampler;

use crate::config::{SchedulerConfig, SchedulerKind};
use crate::error::SchedulerError;
use crate::prediction::{alpha_prediction, clip_or_threshold};
use crate::schedule::{linspace, NoiseSchedule};
use crate::scheduler::{
    alpha_add_noise, ensure_same_shape, first_timestep, index_of, noise_like, Scheduler, StepResult,
};

const SIGMA_DATA: f32 = 0.5;
const TIMESTEP_SCALING: f32 = 10.0;

/// `(c_skip, c_out)` at a timestep
pub fn boundary_scalings(timestep: usize) -> (f32, f32) {
    let scaled = TIMESTEP_SCALING * timestep as f32;
    let c = scaled * scaled + SIGMA_DATA * SIGMA_DATA;
    (SIGMA_DATA * SIGMA_DATA / c, scaled / c.sqrt())
}

/// LCM scheduler
#[derive(Debug, Clone)]
pub struct LcmScheduler {
    config: SchedulerConfig,
    schedule: NoiseSchedule,
    timesteps: Vec<usize>,
    /// Frames per noise block for rank-5 latents (Locomotion only)
    motion_context: Option<usize>,
    noise: GaussianSampler,
}

impl LcmScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::build(config, None)
    }

    /// LCM with context-tiled video noise
    pub fn locomotion(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        if config.motion_noise_context == 0 {
            return Err(SchedulerError::config("motion_noise_context must be at least 1"));
        }
        let context = config.motion_noise_context;
        Self::build(config, Some(context))
    }

    fn build(config: SchedulerConfig, motion_context: Option<usize>) -> Result<Self, SchedulerError> {
        config.validate()?;
        let original_steps = config.original_inference_steps;
        if original_steps == 0 || original_steps > config.train_timesteps {
            return Err(SchedulerError::config(format!(
                "original_inference_steps ({original_steps}) must be within 1..={}",
                config.train_timesteps
            )));
        }
        if config.inference_steps > original_steps {
            return Err(SchedulerError::config(format!(
                "inference_steps ({}) exceeds original_inference_steps ({original_steps})",
                config.inference_steps
            )));
        }

        let schedule = NoiseSchedule::from_config(&config);
        let timesteps = lcm_timesteps(config.train_timesteps, original_steps, config.inference_steps);
        let noise = GaussianSampler::new(config.seed);

        Ok(Self {
            config,
            schedule,
            timesteps,
            motion_context,
            noise,
        })
    }

    pub fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    pub fn motion_context(&self) -> Option<usize> {
        self.motion_context
    }

    fn alpha_at(&self, timestep: usize) -> Result<f32, SchedulerError> {
        self.schedule
            .alpha_cumprod(timestep)
            .ok_or(SchedulerError::UnknownTimestep(timestep))
    }

    /// Gaussian video latent `[B, C, F, H, W]` built from `context`-frame noise
    /// blocks repeated along the frame axis
    fn motion_noise<B: Backend>(
        &mut self,
        shape: [usize; 5],
        context: usize,
        init_sigma: f32,
        device: &B::Device,
    ) -> Tensor<B, 5> {
        let [batch, channels, frames, height, width] = shape;
        let repeats = frames.div_ceil(context);
        let block: Tensor<B, 5> = self
            .noise
            .sample([batch, context, channels, height, width], init_sigma, device);
        block
            .repeat_dim(1, repeats)
            .narrow(1, 0, frames)
            .permute([0, 2, 1, 3, 4])
    }
}

/// Distillation-schedule timesteps `k·(T/original) - 1`, subsampled to `steps`
pub fn lcm_timesteps(train_timesteps: usize, original_steps: usize, steps: usize) -> Vec<usize> {
    let increment = train_timesteps / original_steps;
    let origin: Vec<usize> = (1..=original_steps)
        .map(|k| (k * increment).saturating_sub(1))
        .collect();
    if steps == 1 {
        return origin.last().copied().into_iter().collect();
    }
    let mut timesteps: Vec<usize> = linspace(0.0, (origin.len() - 1) as f64, steps)
        .into_iter()
        .map(|i| origin[(i.floor() as usize).min(origin.len() - 1)])
        .collect();
    timesteps.sort_by(|a, b| b.cmp(a));
    timesteps
}

impl<B: Backend, const D: usize> Scheduler<B, D> for LcmScheduler {
    fn kind(&self) -> SchedulerKind {
        if self.motion_context.is_some() {
            SchedulerKind::Locomotion
        } else {
            SchedulerKind::Lcm
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
        let index = index_of(&self.timesteps, timestep)?;
        let is_last = index + 1 == self.timesteps.len();
        let prev_timestep = self.timesteps.get(index + 1).copied().unwrap_or(timestep);

        let alpha_prod = self.alpha_at(timestep)?;
        let alpha_prod_prev = self.alpha_at(prev_timestep)?;
        let (c_skip, c_out) = boundary_scalings(timestep);

        let prediction = alpha_prediction(self.config.prediction_type, model_output, sample.clone(), alpha_prod);
        let original = clip_or_threshold(prediction.original, &self.config)?;
        let denoised = sample * c_skip + original * c_out;

        let prev_sample = if is_last {
            denoised.clone()
        } else {
            let noise = noise_like(&mut self.noise, &denoised);
            denoised.clone() * alpha_prod_prev.sqrt() + noise * (1.0 - alpha_prod_prev).sqrt()
        };

        Ok(StepResult::with_original(prev_sample, denoised))
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
        if let (Some(context), 5) = (self.motion_context, D) {
            let video = [shape[0], shape[1], shape[2], shape[3], shape[4]];
            if video[2] != context {
                return self
                    .motion_noise::<B>(video, context, init_sigma, device)
                    .reshape(shape);
            }
        }
        self.noise.sample(shape, init_sigma, device)
    }
}
