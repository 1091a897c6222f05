//! The sampling loop
//!
//! ```text
//! for t in timesteps:                      (outer, sequential)
//!     for window in context windows:       (inner, merge order matters)
//!         gather → scale_input → cond pass [→ uncond pass] → merge
//!     guidance blend → scheduler.step
//! ```
//!
//! Latents without a frame axis run as a single window covering the whole
//! tensor.

use std::time::Instant;

use burn::prelude::*;
use burn_diffusion_schedulers::{AnyScheduler, Scheduler, SchedulerConfig, SchedulerKind};
use serde::{Deserialize, Serialize};

use crate::accumulate::{gather_window, WindowAccumulator};
use crate::context::{context_windows, ContextWindowConfig};
use crate::control::GenerationControl;
use crate::error::DiffusionError;
use crate::guidance::{apply_guidance, guidance_enabled, rescale_guidance};
use crate::offload::{PredictorLease, ResourcePolicy};
use crate::predictor::{window_embeddings, NoisePredictor, PredictionRequest, PromptEmbeddings};
use crate::progress::{DiffusionProgress, ProgressSink};
use crate::strategy::DiffusionStrategy;

/// Loop options that are not part of the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerOptions {
    /// Classifier-free guidance scale; the unconditional pass only runs above 1
    pub guidance_scale: f32,
    /// Blend toward the conditional prediction's spread, in `[0, 1]`
    pub guidance_rescale: f32,
    pub context: ContextWindowConfig,
    pub resource_policy: ResourcePolicy,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            guidance_scale: 7.5,
            guidance_rescale: 0.0,
            context: ContextWindowConfig::default(),
            resource_policy: ResourcePolicy::default(),
        }
    }
}

impl SamplerOptions {
    /// Defaults with the scheduler config's guidance scale
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            guidance_scale: config.guidance_scale,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), DiffusionError> {
        if !self.guidance_scale.is_finite() {
            return Err(DiffusionError::config("guidance_scale must be finite"));
        }
        if !(0.0..=1.0).contains(&self.guidance_rescale) {
            return Err(DiffusionError::config(format!(
                "guidance_rescale {} is outside [0, 1]",
                self.guidance_rescale
            )));
        }
        if let Some(problem) = self.context.check() {
            return Err(DiffusionError::Config(problem));
        }
        Ok(())
    }
}

/// Frame windows for one outer step; `None` is the whole latent
type StepWindows = Vec<Option<Vec<usize>>>;

/// Drives a scheduler and a noise predictor from the initial latent to the
/// final one
pub struct DiffusionSampler<B: Backend, const D: usize, S: DiffusionStrategy<B, D>> {
    scheduler: AnyScheduler<B, D>,
    strategy: S,
    options: SamplerOptions,
    control: GenerationControl,
    device: B::Device,
}

impl<B: Backend, const D: usize, S: DiffusionStrategy<B, D>> DiffusionSampler<B, D, S> {
    /// Validates everything up front, before any inference
    pub fn new(
        kind: SchedulerKind,
        config: SchedulerConfig,
        strategy: S,
        options: SamplerOptions,
        device: &B::Device,
    ) -> Result<Self, DiffusionError> {
        options.validate()?;
        let scheduler = AnyScheduler::new(kind, config)?;
        Ok(Self {
            scheduler,
            strategy,
            options,
            control: GenerationControl::new(),
            device: device.clone(),
        })
    }

    /// Share an existing control handle
    pub fn with_control(mut self, control: GenerationControl) -> Self {
        self.control = control;
        self
    }

    /// A handle that can cancel this sampler from elsewhere
    pub fn control(&self) -> GenerationControl {
        self.control.clone()
    }

    pub fn scheduler(&self) -> &AnyScheduler<B, D> {
        &self.scheduler
    }

    pub fn options(&self) -> &SamplerOptions {
        &self.options
    }

    /// Run the whole loop and return the final latent
    ///
    /// Returns [`DiffusionError::Cancelled`] without a partial result if the
    /// control handle is cancelled. The predictor is released according to
    /// the resource policy on every exit path.
    pub fn generate<P, G>(
        &mut self,
        predictor: &mut P,
        prompt: &PromptEmbeddings<B>,
        progress: &mut G,
    ) -> Result<Tensor<B, D>, DiffusionError>
    where
        P: NoisePredictor<B, D>,
        G: ProgressSink,
    {
        let started = Instant::now();
        let result = self.run(predictor, prompt, progress);
        match &result {
            Ok(_) => tracing::info!(
                scheduler = %self.scheduler.kind(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Generation complete"
            ),
            Err(DiffusionError::Cancelled) => tracing::info!(
                step = self.control.current_step(),
                total = self.control.total_steps(),
                "Generation cancelled"
            ),
            Err(err) => tracing::debug!(error = %err, "Generation failed"),
        }
        result
    }

    fn run<P, G>(
        &mut self,
        predictor: &mut P,
        prompt: &PromptEmbeddings<B>,
        progress: &mut G,
    ) -> Result<Tensor<B, D>, DiffusionError>
    where
        P: NoisePredictor<B, D>,
        G: ProgressSink,
    {
        let timesteps = self.strategy.timesteps(&self.scheduler)?;
        let mut latents = self.strategy.prepare_latents(&mut self.scheduler, &timesteps, &self.device)?;
        let frame_axis = self.strategy.frame_axis();
        let dims = latents.dims();
        let num_frames = frame_axis.map_or(1, |axis| dims[axis]);

        let plan = self.plan(timesteps.len(), frame_axis, num_frames);
        let total: usize = plan.iter().map(Vec::len).sum();
        let guidance = guidance_enabled(self.options.guidance_scale);

        tracing::info!(
            scheduler = %self.scheduler.kind(),
            timesteps = timesteps.len(),
            windows = total,
            frames = num_frames,
            guidance,
            "Starting generation"
        );

        self.control.begin(total);
        progress.report(DiffusionProgress::new(0, total, 0.0));

        let mut lease = PredictorLease::acquire(predictor, self.options.resource_policy)?;

        for (&timestep, windows) in timesteps.iter().zip(&plan) {
            self.control.check()?;
            lease.ensure_loaded()?;

            let mut cond = frame_axis.map(|axis| WindowAccumulator::new(dims, axis, &self.device));
            let mut uncond = frame_axis
                .filter(|_| guidance)
                .map(|axis| WindowAccumulator::new(dims, axis, &self.device));
            let mut whole: Option<(Tensor<B, D>, Option<Tensor<B, D>>)> = None;

            for window in windows {
                self.control.check()?;
                let window_started = Instant::now();

                let (window_cond, window_uncond) =
                    self.predict_window(&mut lease, &latents, timestep, window.as_deref(), num_frames, prompt, guidance)?;

                match (window, frame_axis) {
                    (Some(indices), Some(_)) => {
                        if let Some(acc) = cond.as_mut() {
                            acc.merge(window_cond, indices)?;
                        }
                        if let (Some(acc), Some(pred)) = (uncond.as_mut(), window_uncond) {
                            acc.merge(pred, indices)?;
                        }
                    }
                    _ => whole = Some((window_cond, window_uncond)),
                }

                let done = self.control.advance();
                let elapsed_ms = window_started.elapsed().as_secs_f64() * 1000.0;
                progress.report(DiffusionProgress::new(done, total, elapsed_ms));
                tracing::debug!(step = done, total, timestep, elapsed_ms, "Window done");
            }

            let (noise_cond, noise_uncond) = match whole {
                Some(pair) => pair,
                None => (
                    cond.map(WindowAccumulator::into_tensor)
                        .ok_or_else(|| DiffusionError::config("no windows were planned"))?,
                    uncond.map(WindowAccumulator::into_tensor),
                ),
            };

            let noise_pred = match noise_uncond {
                Some(noise_uncond) if guidance => {
                    let guided = apply_guidance(noise_uncond, noise_cond.clone(), self.options.guidance_scale);
                    rescale_guidance(guided, &noise_cond, self.options.guidance_rescale)?
                }
                _ => noise_cond,
            };

            latents = self.scheduler.step(noise_pred, timestep, latents)?.prev_sample;
            lease.end_timestep()?;
        }

        lease.finish()?;
        Ok(latents)
    }

    /// Windows for every outer step
    fn plan(&self, steps: usize, frame_axis: Option<usize>, num_frames: usize) -> Vec<StepWindows> {
        (0..steps)
            .map(|step| match frame_axis {
                Some(_) => context_windows(step, num_frames, &self.options.context)
                    .into_iter()
                    .map(Some)
                    .collect(),
                None => vec![None],
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn predict_window<P: NoisePredictor<B, D>>(
        &self,
        lease: &mut PredictorLease<'_, B, D, P>,
        latents: &Tensor<B, D>,
        timestep: usize,
        window: Option<&[usize]>,
        num_frames: usize,
        prompt: &PromptEmbeddings<B>,
        guidance: bool,
    ) -> Result<(Tensor<B, D>, Option<Tensor<B, D>>), DiffusionError> {
        let sample = match (window, self.strategy.frame_axis()) {
            (Some(indices), Some(axis)) => gather_window(latents.clone(), axis, indices)?,
            _ => latents.clone(),
        };
        let input = self.scheduler.scale_input(sample, timestep)?;
        let batch_size = input.dims()[0];

        let cond = lease.predict(PredictionRequest {
            sample: input.clone(),
            timestep,
            encoder_hidden_states: window_embeddings(&prompt.positive, window, num_frames, batch_size)?,
        })?;

        let uncond = if guidance {
            Some(lease.predict(PredictionRequest {
                sample: input,
                timestep,
                encoder_hidden_states: window_embeddings(&prompt.negative, window, num_frames, batch_size)?,
            })?)
        } else {
            None
        };

        Ok((cond, uncond))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default_and_partial_json() {
        let options: SamplerOptions =
            serde_json::from_str(r#"{"guidance_scale": 3.0, "resource_policy": "release_each_timestep"}"#).unwrap();
        assert_eq!(options.guidance_scale, 3.0);
        assert_eq!(options.guidance_rescale, 0.0);
        assert_eq!(options.context, ContextWindowConfig::default());
        assert_eq!(options.resource_policy, ResourcePolicy::ReleaseEachTimestep);
    }

    #[test]
    fn test_options_from_config() {
        let config = SchedulerConfig {
            guidance_scale: 1.0,
            ..Default::default()
        };
        assert_eq!(SamplerOptions::from_config(&config).guidance_scale, 1.0);
    }

    #[test]
    fn test_options_validation() {
        assert!(SamplerOptions::default().validate().is_ok());

        let bad_rescale = SamplerOptions {
            guidance_rescale: 1.5,
            ..Default::default()
        };
        assert!(matches!(bad_rescale.validate(), Err(DiffusionError::Config(_))));

        let bad_context = SamplerOptions {
            context: ContextWindowConfig::tiled(0),
            ..Default::default()
        };
        assert!(bad_context.validate().is_err());

        let bad_scale = SamplerOptions {
            guidance_scale: f32::NAN,
            ..Default::default()
        };
        assert!(bad_scale.validate().is_err());
    }
}
