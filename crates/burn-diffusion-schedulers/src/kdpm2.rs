//! KDPM2 and KDPM2 Ancestral schedulers
//!
//! Second-order solvers from k-diffusion (Karras et al. 2022, Algorithm 2).
//! Each inference step takes two model evaluations: the first pass moves
//! to the log-midpoint sigma, the second pass evaluates there and completes
//! the step from the cached sample. The schedule interleaves both, so
//! [`Scheduler::order`] is 2 and `timesteps()` has `2N - 1` entries:
//!
//! ```text
//! timesteps = [t0, ti1, t1, ti2, t2, …, t(N-1)]
//! ```

use burn::prelude::*;
use burn_diffusion_core::{ops, GaussianSampler};

use crate::config::{SchedulerConfig, SchedulerKind, TimestepSpacing};
use crate::error::SchedulerError;
use crate::euler::derivative;
use crate::prediction::sigma_predicted_original;
use crate::schedule::{
    ancestral_step, inference_sigmas, init_noise_sigma, log_midpoint, repeat_interleave_tail, round_timesteps,
    sigma_to_timestep, NoiseSchedule,
};
use crate::scheduler::{
    ensure_same_shape, max_sigma_at, noise_like, sigma_scale_input, Scheduler, StepCursor, StepResult,
};

/// Which half of a two-pass step comes next
#[derive(Debug, Clone)]
pub enum PassState<B: Backend, const D: usize> {
    AwaitingFirstPass,
    /// First pass done; holds the sample it started from
    AwaitingSecondPass { sample: Tensor<B, D> },
}

impl<B: Backend, const D: usize> PassState<B, D> {
    pub fn is_first_pass(&self) -> bool {
        matches!(self, PassState::AwaitingFirstPass)
    }
}

/// `[t0] + interleave(midpoints, rest)`, rounded
fn interleave_timesteps(base: &[f32], midpoints: &[f32]) -> Vec<usize> {
    let mut out = Vec::with_capacity(base.len() * 2);
    if let Some(&first) = base.first() {
        out.push(first);
    }
    for (mid, t) in midpoints.iter().zip(base.iter().skip(1)) {
        out.push(*mid);
        out.push(*t);
    }
    round_timesteps(&out)
}

fn second_pass_index(index: usize) -> Result<usize, SchedulerError> {
    index
        .checked_sub(1)
        .ok_or_else(|| SchedulerError::config("second pass requested at the first timestep"))
}

// ============================================================================
// KDPM2
// ============================================================================

/// KDPM2 scheduler
#[derive(Debug, Clone)]
pub struct Kdpm2Scheduler<B: Backend, const D: usize> {
    config: SchedulerConfig,
    timesteps: Vec<usize>,
    sigmas: Vec<f32>,
    /// Log-midpoints between consecutive sigmas
    sigmas_interpol: Vec<f32>,
    init_noise_sigma: f32,
    state: PassState<B, D>,
    cursor: StepCursor,
    noise: GaussianSampler,
}

impl<B: Backend, const D: usize> Kdpm2Scheduler<B, D> {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let schedule = NoiseSchedule::from_config(&config);
        let log_sigmas = schedule.log_sigmas();
        let (mut sigmas, base_timesteps) = inference_sigmas(&schedule, &config);
        let init_noise_sigma = init_noise_sigma(&sigmas, config.timestep_spacing);
        sigmas.push(0.0);

        // Each sigma paired with its predecessor; the first wraps to the trailing zero
        let len = sigmas.len();
        let interpol: Vec<f32> = (0..len)
            .map(|i| log_midpoint(sigmas[i], sigmas[(i + len - 1) % len]))
            .collect();

        let interpol_timesteps = sigma_to_timestep(&interpol, &log_sigmas);
        let timesteps = interleave_timesteps(&base_timesteps, &interpol_timesteps[1..]);
        let noise = GaussianSampler::new(config.seed);

        Ok(Self {
            config,
            timesteps,
            sigmas: repeat_interleave_tail(&sigmas),
            sigmas_interpol: repeat_interleave_tail(&interpol),
            init_noise_sigma,
            state: PassState::AwaitingFirstPass,
            cursor: StepCursor::default(),
            noise,
        })
    }

    pub fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    pub fn sigmas(&self) -> &[f32] {
        &self.sigmas
    }

    pub fn sigmas_interpol(&self) -> &[f32] {
        &self.sigmas_interpol
    }

    pub fn pass_state(&self) -> &PassState<B, D> {
        &self.state
    }

    /// Index of the next expected timestep, once stepping has started
    pub fn step_index(&self) -> Option<usize> {
        self.cursor.current()
    }
}

impl<B: Backend, const D: usize> Scheduler<B, D> for Kdpm2Scheduler<B, D> {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Kdpm2
    }

    fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    fn init_noise_sigma(&self) -> f32 {
        self.init_noise_sigma
    }

    fn order(&self) -> usize {
        2
    }

    fn scale_input(&self, sample: Tensor<B, D>, timestep: usize) -> Result<Tensor<B, D>, SchedulerError> {
        let index = self.cursor.resolve(&self.timesteps, timestep)?;
        let sigma = if self.state.is_first_pass() {
            self.sigmas[index]
        } else {
            self.sigmas_interpol[index]
        };
        Ok(sigma_scale_input(sample, sigma))
    }

    fn step(
        &mut self,
        model_output: Tensor<B, D>,
        timestep: usize,
        sample: Tensor<B, D>,
    ) -> Result<StepResult<B, D>, SchedulerError> {
        ensure_same_shape(&model_output, &sample)?;
        let index = self.cursor.resolve(&self.timesteps, timestep)?;
        let prediction_type = self.config.prediction_type;

        let result = match std::mem::replace(&mut self.state, PassState::AwaitingFirstPass) {
            PassState::AwaitingFirstPass => {
                let sigma = self.sigmas[index];
                let sigma_interpol = self.sigmas_interpol[index + 1];

                let original = sigma_predicted_original(prediction_type, model_output, sample.clone(), sigma);
                let d = derivative(sample.clone(), original.clone(), sigma);
                let prev_sample = sample.clone() + d * (sigma_interpol - sigma);

                self.state = PassState::AwaitingSecondPass { sample };
                StepResult::with_original(prev_sample, original)
            }
            PassState::AwaitingSecondPass { sample: cached } => {
                let sigma = self.sigmas[second_pass_index(index)?];
                let sigma_interpol = self.sigmas_interpol[index];
                let sigma_next = self.sigmas[index];

                let original = sigma_predicted_original(prediction_type, model_output, sample.clone(), sigma_interpol);
                let d = derivative(sample, original.clone(), sigma_interpol);
                let prev_sample = cached + d * (sigma_next - sigma);

                StepResult::with_original(prev_sample, original)
            }
        };

        self.cursor.advance(index);
        Ok(result)
    }

    fn add_noise(
        &self,
        original: Tensor<B, D>,
        noise: Tensor<B, D>,
        timesteps: &[usize],
    ) -> Result<Tensor<B, D>, SchedulerError> {
        let sigma = max_sigma_at(&self.timesteps, &self.sigmas, timesteps)?;
        ops::ensure_same_shape(original.dims(), noise.dims())?;
        Ok(original + noise * sigma)
    }

    fn create_random_sample(&mut self, shape: [usize; D], init_sigma: f32, device: &B::Device) -> Tensor<B, D> {
        self.noise.sample(shape, init_sigma, device)
    }
}

// ============================================================================
// KDPM2 Ancestral
// ============================================================================

/// KDPM2 Ancestral scheduler
///
/// Always uses trailing timestep spacing.
#[derive(Debug, Clone)]
pub struct Kdpm2AncestralScheduler<B: Backend, const D: usize> {
    config: SchedulerConfig,
    timesteps: Vec<usize>,
    sigmas: Vec<f32>,
    sigmas_interpol: Vec<f32>,
    sigmas_up: Vec<f32>,
    sigmas_down: Vec<f32>,
    init_noise_sigma: f32,
    state: PassState<B, D>,
    cursor: StepCursor,
    noise: GaussianSampler,
}

impl<B: Backend, const D: usize> Kdpm2AncestralScheduler<B, D> {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let config = SchedulerConfig {
            timestep_spacing: TimestepSpacing::Trailing,
            ..config
        };
        config.validate()?;
        let schedule = NoiseSchedule::from_config(&config);
        let log_sigmas = schedule.log_sigmas();
        let (mut sigmas, base_timesteps) = inference_sigmas(&schedule, &config);
        let init_noise_sigma = init_noise_sigma(&sigmas, config.timestep_spacing);
        sigmas.push(0.0);

        let len = sigmas.len();
        let (sigmas_down, sigmas_up): (Vec<f32>, Vec<f32>) = (0..len)
            .map(|i| ancestral_step(sigmas[i], sigmas.get(i + 1).copied().unwrap_or(0.0)))
            .unzip();

        let mut interpol: Vec<f32> = sigmas
            .iter()
            .zip(&sigmas_down)
            .map(|(&s, &down)| log_midpoint(s, down))
            .collect();
        for v in interpol.iter_mut().skip(len.saturating_sub(2)) {
            *v = 0.0;
        }

        let interpol_timesteps = sigma_to_timestep(&interpol, &log_sigmas);
        let midpoints = &interpol_timesteps[..len.saturating_sub(2)];
        let timesteps = interleave_timesteps(&base_timesteps, midpoints);
        let noise = GaussianSampler::new(config.seed);

        Ok(Self {
            config,
            timesteps,
            sigmas: repeat_interleave_tail(&sigmas),
            sigmas_interpol: repeat_interleave_tail(&interpol),
            sigmas_up: repeat_interleave_tail(&sigmas_up),
            sigmas_down: repeat_interleave_tail(&sigmas_down),
            init_noise_sigma,
            state: PassState::AwaitingFirstPass,
            cursor: StepCursor::default(),
            noise,
        })
    }

    pub fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    pub fn sigmas(&self) -> &[f32] {
        &self.sigmas
    }

    pub fn sigmas_interpol(&self) -> &[f32] {
        &self.sigmas_interpol
    }

    pub fn pass_state(&self) -> &PassState<B, D> {
        &self.state
    }

    pub fn step_index(&self) -> Option<usize> {
        self.cursor.current()
    }
}

impl<B: Backend, const D: usize> Scheduler<B, D> for Kdpm2AncestralScheduler<B, D> {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Kdpm2Ancestral
    }

    fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    fn init_noise_sigma(&self) -> f32 {
        self.init_noise_sigma
    }

    fn order(&self) -> usize {
        2
    }

    fn scale_input(&self, sample: Tensor<B, D>, timestep: usize) -> Result<Tensor<B, D>, SchedulerError> {
        let index = self.cursor.resolve(&self.timesteps, timestep)?;
        let sigma = if self.state.is_first_pass() {
            self.sigmas[index]
        } else {
            self.sigmas_interpol[second_pass_index(index)?]
        };
        Ok(sigma_scale_input(sample, sigma))
    }

    fn step(
        &mut self,
        model_output: Tensor<B, D>,
        timestep: usize,
        sample: Tensor<B, D>,
    ) -> Result<StepResult<B, D>, SchedulerError> {
        ensure_same_shape(&model_output, &sample)?;
        let index = self.cursor.resolve(&self.timesteps, timestep)?;
        let prediction_type = self.config.prediction_type;

        let result = match std::mem::replace(&mut self.state, PassState::AwaitingFirstPass) {
            PassState::AwaitingFirstPass => {
                let sigma = self.sigmas[index];
                let sigma_interpol = self.sigmas_interpol[index];

                let original = sigma_predicted_original(prediction_type, model_output, sample.clone(), sigma);
                let d = derivative(sample.clone(), original.clone(), sigma);
                let prev_sample = sample.clone() + d * (sigma_interpol - sigma);

                self.state = PassState::AwaitingSecondPass { sample };
                StepResult::with_original(prev_sample, original)
            }
            PassState::AwaitingSecondPass { sample: cached } => {
                let previous = second_pass_index(index)?;
                let sigma = self.sigmas[previous];
                let sigma_interpol = self.sigmas_interpol[previous];
                let sigma_up = self.sigmas_up[previous];
                let sigma_down = self.sigmas_down[previous];

                let original = sigma_predicted_original(prediction_type, model_output, sample.clone(), sigma_interpol);
                let d = derivative(sample, original.clone(), sigma_interpol);
                let prev_sample = cached + d * (sigma_down - sigma);
                let noise = noise_like(&mut self.noise, &prev_sample);

                StepResult::with_original(prev_sample + noise * sigma_up, original)
            }
        };

        self.cursor.advance(index);
        Ok(result)
    }

    fn add_noise(
        &self,
        original: Tensor<B, D>,
        noise: Tensor<B, D>,
        timesteps: &[usize],
    ) -> Result<Tensor<B, D>, SchedulerError> {
        let sigma = max_sigma_at(&self.timesteps, &self.sigmas, timesteps)?;
        ops::ensure_same_shape(original.dims(), noise.dims())?;
        Ok(original + noise * sigma)
    }

    fn create_random_sample(&mut self, shape: [usize; D], init_sigma: f32, device: &B::Device) -> Tensor<B, D> {
        self.noise.sample(shape, init_sigma, device)
    }
}
