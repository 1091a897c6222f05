//! burn-diffusion: Diffusion Sampling in Pure Rust
//!
//! Runs the denoising loop for image and video diffusion models on top of
//! the Burn deep learning framework. The noise-prediction network is
//! supplied by the caller through [`NoisePredictor`]; this crate owns the
//! schedule, guidance, context-window tiling and cancellation.
//!
//! # Backend Selection
//!
//! Choose a backend via feature flags:
//! - `ndarray`: CPU backend (default)
//! - `wgpu`: WebGPU backend (cross-platform GPU)
//!
//! # Example
//!
//! ```ignore
//! use burn_diffusion::{DiffusionSampler, PromptEmbeddings, SamplerOptions, TextToLatent};
//! use burn_diffusion::schedulers::{SchedulerConfig, SchedulerKind};
//!
//! let device = burn_diffusion::backends::default_device();
//! let config = SchedulerConfig::with_steps(30);
//! let options = SamplerOptions::from_config(&config);
//! let mut sampler = DiffusionSampler::new(
//!     SchedulerKind::EulerAncestral,
//!     config,
//!     TextToLatent::new([1, 4, 64, 64]),
//!     options,
//!     &device,
//! )?;
//!
//! let latents = sampler.generate(&mut unet, &PromptEmbeddings::new(cond, uncond), &mut |p| {
//!     println!("{}", p.message);
//! })?;
//! ```
//!
//! # Video
//!
//! Five-dimensional latents `[batch, channels, frames, height, width]` are
//! denoised in overlapping frame windows (see [`context`]); predictions for
//! frames covered by several windows are averaged.

pub use burn_diffusion_core as core;
pub use burn_diffusion_schedulers as schedulers;

pub mod accumulate;
pub mod backends;
pub mod context;
pub mod control;
pub mod error;
pub mod guidance;
pub mod offload;
pub mod predictor;
pub mod progress;
pub mod sampler;
pub mod strategy;

pub use accumulate::{gather_window, WindowAccumulator};
pub use context::{context_windows, ordered_halving, total_windows, ContextWindowConfig};
pub use control::GenerationControl;
pub use error::DiffusionError;
pub use guidance::{apply_guidance, compute_tensor_std, guidance_enabled, rescale_guidance};
pub use offload::{PredictorLease, ResourcePolicy};
pub use predictor::{window_embeddings, NoisePredictor, PredictionRequest, PromptEmbeddings};
pub use progress::{DiffusionProgress, ProgressSink};
pub use sampler::{DiffusionSampler, SamplerOptions};
pub use strategy::{DiffusionStrategy, ImageToLatent, TextToLatent, VideoToLatent, FRAME_AXIS};
