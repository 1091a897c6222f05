//! LMS (Linear Multi-Step) scheduler
//!
//! Adams-style multistep solver from k-diffusion: the next sample is the
//! current one plus a weighted sum of up to `order` past derivatives. The
//! weights integrate the Lagrange basis through the recent sigmas over the
//! step interval:
//!
//! ```text
//! c_k = ∫[σ_i, σ_{i+1}] Π_{j≠k} (τ - σ_{i-j}) / (σ_{i-k} - σ_{i-j}) dτ
//! ```

use std::collections::VecDeque;

use burn::prelude::*;
use burn_diffusion_core::{ops, GaussianSampler};

use crate::config::{SchedulerConfig, SchedulerKind};
use crate::error::SchedulerError;
use crate::euler::derivative;
use crate::integrate::integrate;
use crate::prediction::sigma_predicted_original;
use crate::schedule::SigmaSchedule;
use crate::scheduler::{
    ensure_same_shape, max_sigma_at, sigma_scale_input, Scheduler, StepCursor, StepResult,
};

/// Maximum number of past derivatives combined per step
pub const LMS_ORDER: usize = 4;

const INTEGRATION_EPSILON: f64 = 1e-4;

/// Weight of the `current`-th newest derivative at step `index`
pub fn lms_coefficient(sigmas: &[f32], order: usize, index: usize, current: usize) -> f32 {
    let anchor = sigmas[index - current] as f64;
    let lagrange = |tau: f64| {
        (0..order).filter(|&k| k != current).fold(1.0, |product, k| {
            let sigma_k = sigmas[index - k] as f64;
            product * (tau - sigma_k) / (anchor - sigma_k)
        })
    };
    integrate(
        lagrange,
        sigmas[index] as f64,
        sigmas[index + 1] as f64,
        INTEGRATION_EPSILON,
    ) as f32
}

/// LMS scheduler
#[derive(Debug, Clone)]
pub struct LmsScheduler<B: Backend, const D: usize> {
    config: SchedulerConfig,
    steps: SigmaSchedule,
    order: usize,
    /// Newest first
    derivatives: VecDeque<Tensor<B, D>>,
    cursor: StepCursor,
    noise: GaussianSampler,
}

impl<B: Backend, const D: usize> LmsScheduler<B, D> {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let steps = SigmaSchedule::new(&config);
        let noise = GaussianSampler::new(config.seed);

        Ok(Self {
            config,
            steps,
            order: LMS_ORDER,
            derivatives: VecDeque::with_capacity(LMS_ORDER),
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

    /// Number of derivatives currently held
    pub fn history_len(&self) -> usize {
        self.derivatives.len()
    }

    /// Forget past derivatives
    pub fn reset(&mut self) {
        self.derivatives.clear();
        self.cursor = StepCursor::default();
    }
}

impl<B: Backend, const D: usize> Scheduler<B, D> for LmsScheduler<B, D> {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Lms
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

        let original = sigma_predicted_original(self.config.prediction_type, model_output, sample.clone(), sigma);
        self.derivatives
            .push_front(derivative(sample.clone(), original.clone(), sigma));
        self.derivatives.truncate(self.order);

        let order = (index + 1).min(self.order).min(self.derivatives.len());
        let mut prev_sample = sample;
        for (current, d) in self.derivatives.iter().take(order).enumerate() {
            let coeff = lms_coefficient(&self.steps.sigmas, order, index, current);
            prev_sample = prev_sample + d.clone() * coeff;
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
