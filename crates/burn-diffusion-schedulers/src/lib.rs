//! Diffusion noise schedulers for Burn
//!
//! Every algorithm implements [`Scheduler`]: it owns a descending timestep
//! sequence, scales model inputs, advances the latent from a model
//! prediction, and forward-noises clean samples for image-to-image.
//!
//! # Schedulers
//!
//! | Kind | Parameterization | Order |
//! |------|------------------|-------|
//! | [`DdimScheduler`] | ᾱ | 1 |
//! | [`DdpmScheduler`] | ᾱ | 1 |
//! | [`DdpmWuerstchenScheduler`] | continuous ᾱ | 1 |
//! | [`EulerScheduler`] / [`EulerAncestralScheduler`] | σ | 1 |
//! | [`FlowMatchEulerScheduler`] (discrete, dynamic) | flow σ | 1 |
//! | [`Kdpm2Scheduler`] / [`Kdpm2AncestralScheduler`] | σ | 2 |
//! | [`LmsScheduler`] | σ | 1 |
//! | [`LcmScheduler`] (LCM, Locomotion) | ᾱ | 1 |
//!
//! # Example
//!
//! ```ignore
//! use burn_diffusion_schedulers::{AnyScheduler, Scheduler, SchedulerConfig, SchedulerKind};
//!
//! let mut scheduler = AnyScheduler::<B, 4>::new(SchedulerKind::EulerAncestral, SchedulerConfig::with_steps(30))?;
//! let mut latents = scheduler.create_random_sample([1, 4, 64, 64], scheduler.init_noise_sigma(), &device);
//! for t in scheduler.timesteps().to_vec() {
//!     let input = scheduler.scale_input(latents.clone(), t)?;
//!     let noise_pred = unet.forward(input, t, &context);
//!     latents = scheduler.step(noise_pred, t, latents)?.prev_sample;
//! }
//! ```

pub mod config;
pub mod ddim;
pub mod ddpm;
pub mod ddpm_wuerstchen;
pub mod error;
pub mod euler;
pub mod flow_match;
pub mod integrate;
pub mod kdpm2;
pub mod lcm;
pub mod lms;
pub mod prediction;
pub mod registry;
pub mod schedule;
pub mod scheduler;

pub use config::{
    AlphaTransform, BetaSchedule, PredictionType, SchedulerConfig, SchedulerKind, TimestepSpacing, VarianceType,
};
pub use ddim::DdimScheduler;
pub use ddpm::DdpmScheduler;
pub use ddpm_wuerstchen::DdpmWuerstchenScheduler;
pub use error::SchedulerError;
pub use euler::{EulerAncestralScheduler, EulerScheduler};
pub use flow_match::{FlowMatchEulerScheduler, FlowMatchMode};
pub use kdpm2::{Kdpm2AncestralScheduler, Kdpm2Scheduler, PassState};
pub use lcm::LcmScheduler;
pub use lms::LmsScheduler;
pub use registry::AnyScheduler;
pub use schedule::{NoiseSchedule, SigmaSchedule};
pub use scheduler::{Scheduler, StepResult};
