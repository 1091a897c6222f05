//! What a generation starts from
//!
//! A strategy picks the timesteps to run and prepares the initial latent.
//! It is a type parameter of [`DiffusionSampler`](crate::DiffusionSampler),
//! so each entry point is resolved at compile time.

use burn::prelude::*;
use burn_diffusion_schedulers::Scheduler;

use crate::error::DiffusionError;

/// Frame axis of `[batch, channels, frames, height, width]` latents
pub const FRAME_AXIS: usize = 2;

/// Frame axis for rank-`D` latents, if they have one
pub fn frame_axis_for_rank(rank: usize) -> Option<usize> {
    (rank == 5).then_some(FRAME_AXIS)
}

pub trait DiffusionStrategy<B: Backend, const D: usize> {
    /// Timesteps to run, a suffix of the scheduler's schedule
    fn timesteps<S: Scheduler<B, D>>(&self, scheduler: &S) -> Result<Vec<usize>, DiffusionError>;

    /// Initial latent, drawn through the scheduler's seeded generator
    fn prepare_latents<S: Scheduler<B, D>>(
        &self,
        scheduler: &mut S,
        timesteps: &[usize],
        device: &B::Device,
    ) -> Result<Tensor<B, D>, DiffusionError>;

    /// Axis that context windows slice, if any
    fn frame_axis(&self) -> Option<usize> {
        frame_axis_for_rank(D)
    }
}

fn ensure_non_empty(shape: &[usize]) -> Result<(), DiffusionError> {
    if shape.contains(&0) {
        return Err(DiffusionError::config(format!("latent shape {shape:?} has an empty axis")));
    }
    Ok(())
}

// ============================================================================
// TextToLatent
// ============================================================================

/// Pure noise, full schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextToLatent<const D: usize> {
    pub shape: [usize; D],
}

impl<const D: usize> TextToLatent<D> {
    pub fn new(shape: [usize; D]) -> Self {
        Self { shape }
    }
}

impl<B: Backend, const D: usize> DiffusionStrategy<B, D> for TextToLatent<D> {
    fn timesteps<S: Scheduler<B, D>>(&self, scheduler: &S) -> Result<Vec<usize>, DiffusionError> {
        Ok(scheduler.timesteps().to_vec())
    }

    fn prepare_latents<S: Scheduler<B, D>>(
        &self,
        scheduler: &mut S,
        _timesteps: &[usize],
        device: &B::Device,
    ) -> Result<Tensor<B, D>, DiffusionError> {
        ensure_non_empty(&self.shape)?;
        let sigma = scheduler.init_noise_sigma();
        Ok(scheduler.create_random_sample(self.shape, sigma, device))
    }
}

// ============================================================================
// ImageToLatent
// ============================================================================

/// Forward-noised encoded image, truncated schedule
///
/// `strength` 1.0 runs every timestep from pure noise; smaller values skip
/// the noisiest part of the schedule and keep more of the input.
#[derive(Debug, Clone)]
pub struct ImageToLatent<B: Backend, const D: usize> {
    pub encoded: Tensor<B, D>,
    pub strength: f32,
}

impl<B: Backend, const D: usize> ImageToLatent<B, D> {
    pub fn new(encoded: Tensor<B, D>, strength: f32) -> Self {
        Self { encoded, strength }
    }
}

/// Inference steps to skip for `strength` out of `steps`
pub fn skipped_steps(steps: usize, strength: f32) -> usize {
    let init = ((steps as f32 * strength).floor().max(0.0) as usize).min(steps);
    steps - init
}

impl<B: Backend, const D: usize> DiffusionStrategy<B, D> for ImageToLatent<B, D> {
    fn timesteps<S: Scheduler<B, D>>(&self, scheduler: &S) -> Result<Vec<usize>, DiffusionError> {
        if !(0.0..=1.0).contains(&self.strength) {
            return Err(DiffusionError::config(format!(
                "strength {} is outside [0, 1]",
                self.strength
            )));
        }
        let steps = scheduler.config().inference_steps;
        let skip = skipped_steps(steps, self.strength) * scheduler.order();
        let timesteps: Vec<usize> = scheduler.timesteps().iter().skip(skip).copied().collect();
        if timesteps.is_empty() {
            return Err(DiffusionError::config(format!(
                "strength {} leaves no timesteps out of {steps}",
                self.strength
            )));
        }
        Ok(timesteps)
    }

    fn prepare_latents<S: Scheduler<B, D>>(
        &self,
        scheduler: &mut S,
        timesteps: &[usize],
        device: &B::Device,
    ) -> Result<Tensor<B, D>, DiffusionError> {
        let Some(&first) = timesteps.first() else {
            return Err(DiffusionError::config("no timesteps to noise the image to"));
        };
        let shape = self.encoded.dims();
        ensure_non_empty(&shape)?;
        let noise = scheduler.create_random_sample(shape, 1.0, device);
        Ok(scheduler.add_noise(self.encoded.clone(), noise, &[first])?)
    }
}

// ============================================================================
// VideoToLatent
// ============================================================================

/// Pure-noise video latent `[batch, channels, frames, height, width]`
///
/// Schedulers that tile motion noise (Locomotion) do so in
/// `create_random_sample`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoToLatent {
    pub shape: [usize; 5],
}

impl VideoToLatent {
    pub fn new(batch: usize, channels: usize, frames: usize, height: usize, width: usize) -> Self {
        Self {
            shape: [batch, channels, frames, height, width],
        }
    }

    pub fn frames(&self) -> usize {
        self.shape[FRAME_AXIS]
    }
}

impl<B: Backend> DiffusionStrategy<B, 5> for VideoToLatent {
    fn timesteps<S: Scheduler<B, 5>>(&self, scheduler: &S) -> Result<Vec<usize>, DiffusionError> {
        Ok(scheduler.timesteps().to_vec())
    }

    fn prepare_latents<S: Scheduler<B, 5>>(
        &self,
        scheduler: &mut S,
        _timesteps: &[usize],
        device: &B::Device,
    ) -> Result<Tensor<B, 5>, DiffusionError> {
        ensure_non_empty(&self.shape)?;
        let sigma = scheduler.init_noise_sigma();
        Ok(scheduler.create_random_sample(self.shape, sigma, device))
    }

    fn frame_axis(&self) -> Option<usize> {
        Some(FRAME_AXIS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_diffusion_schedulers::{AnyScheduler, SchedulerConfig, SchedulerKind};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn scheduler<const D: usize>(kind: SchedulerKind, steps: usize) -> AnyScheduler<TestBackend, D> {
        AnyScheduler::new(kind, SchedulerConfig::with_steps(steps)).unwrap()
    }

    #[test]
    fn test_skipped_steps() {
        assert_eq!(skipped_steps(10, 1.0), 0);
        assert_eq!(skipped_steps(10, 0.6), 4);
        assert_eq!(skipped_steps(10, 0.05), 10);
        assert_eq!(skipped_steps(10, 0.0), 10);
    }

    #[test]
    fn test_text_to_latent_runs_full_schedule() {
        let device = Default::default();
        let mut euler = scheduler::<4>(SchedulerKind::Euler, 10);
        let strategy = TextToLatent::new([1, 4, 8, 8]);

        let timesteps = strategy.timesteps(&euler).unwrap();
        assert_eq!(timesteps, euler.timesteps().to_vec());
        let latents = strategy.prepare_latents(&mut euler, &timesteps, &device).unwrap();
        assert_eq!(latents.dims(), [1, 4, 8, 8]);
        assert_eq!(DiffusionStrategy::<TestBackend, 4>::frame_axis(&strategy), None);
    }

    #[test]
    fn test_image_to_latent_skips_by_strength() {
        let device = Default::default();
        let ddim = scheduler::<4>(SchedulerKind::Ddim, 10);
        let encoded = Tensor::<TestBackend, 4>::zeros([1, 4, 8, 8], &device);

        let strategy = ImageToLatent::new(encoded.clone(), 0.6);
        let timesteps = strategy.timesteps(&ddim).unwrap();
        assert_eq!(timesteps.len(), 6);
        assert_eq!(timesteps[..], ddim.timesteps()[4..]);

        let full = ImageToLatent::new(encoded, 1.0).timesteps(&ddim).unwrap();
        assert_eq!(full.len(), 10);
    }

    #[test]
    fn test_image_to_latent_skips_whole_two_pass_steps() {
        let device = Default::default();
        let kdpm2 = scheduler::<4>(SchedulerKind::Kdpm2, 10);
        let encoded = Tensor::<TestBackend, 4>::zeros([1, 4, 8, 8], &device);

        let timesteps = ImageToLatent::new(encoded, 0.5).timesteps(&kdpm2).unwrap();
        assert_eq!(timesteps[..], kdpm2.timesteps()[10..]);
    }

    #[test]
    fn test_image_to_latent_rejects_empty_schedule() {
        let device = Default::default();
        let ddim = scheduler::<4>(SchedulerKind::Ddim, 10);
        let encoded = Tensor::<TestBackend, 4>::zeros([1, 4, 8, 8], &device);

        let result = ImageToLatent::new(encoded.clone(), 0.05).timesteps(&ddim);
        assert!(matches!(result, Err(DiffusionError::Config(_))));
        let result = ImageToLatent::new(encoded, 1.5).timesteps(&ddim);
        assert!(matches!(result, Err(DiffusionError::Config(_))));
    }

    #[test]
    fn test_image_to_latent_noises_to_first_timestep() {
        let device = Default::default();
        let mut ddim = scheduler::<4>(SchedulerKind::Ddim, 10);
        let encoded = Tensor::<TestBackend, 4>::ones([1, 4, 8, 8], &device);
        let strategy = ImageToLatent::new(encoded, 0.5);

        let timesteps = strategy.timesteps(&ddim).unwrap();
        let latents = strategy.prepare_latents(&mut ddim, &timesteps, &device).unwrap();
        assert_eq!(latents.dims(), [1, 4, 8, 8]);
    }

    #[test]
    fn test_video_to_latent_uses_frame_axis() {
        let device = Default::default();
        let mut locomotion = scheduler::<5>(SchedulerKind::Locomotion, 4);
        let strategy = VideoToLatent::new(1, 4, 24, 8, 8);

        assert_eq!(DiffusionStrategy::<TestBackend, 5>::frame_axis(&strategy), Some(FRAME_AXIS));
        assert_eq!(strategy.frames(), 24);
        let timesteps = strategy.timesteps(&locomotion).unwrap();
        let latents = strategy.prepare_latents(&mut locomotion, &timesteps, &device).unwrap();
        assert_eq!(latents.dims(), [1, 4, 24, 8, 8]);
    }

    #[test]
    fn test_empty_shape_is_rejected() {
        let device = Default::default();
        let mut euler = scheduler::<4>(SchedulerKind::Euler, 4);
        let strategy = TextToLatent::new([1, 4, 0, 8]);
        let result = strategy.prepare_latents(&mut euler, &[], &device);
        assert!(matches!(result, Err(DiffusionError::Config(_))));
    }
}
