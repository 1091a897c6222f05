//! Enum-keyed scheduler registry
//!
//! [`AnyScheduler`] is the single construction site for every algorithm and
//! itself implements [`Scheduler`], so callers can hold one concrete type
//! regardless of the configured [`SchedulerKind`].

use burn::prelude::*;

use crate::config::{SchedulerConfig, SchedulerKind};
use crate::ddim::DdimScheduler;
use crate::ddpm::DdpmScheduler;
use crate::ddpm_wuerstchen::DdpmWuerstchenScheduler;
use crate::error::SchedulerError;
use crate::euler::{EulerAncestralScheduler, EulerScheduler};
use crate::flow_match::{FlowMatchEulerScheduler, FlowMatchMode};
use crate::kdpm2::{Kdpm2AncestralScheduler, Kdpm2Scheduler};
use crate::lcm::LcmScheduler;
use crate::lms::LmsScheduler;
use crate::scheduler::{Scheduler, StepResult};

/// Any scheduler, selected at runtime
#[derive(Debug, Clone)]
pub enum AnyScheduler<B: Backend, const D: usize> {
    Ddim(DdimScheduler),
    Ddpm(DdpmScheduler),
    DdpmWuerstchen(DdpmWuerstchenScheduler),
    Euler(EulerScheduler),
    EulerAncestral(EulerAncestralScheduler),
    /// Both flow-match modes
    FlowMatchEuler(FlowMatchEulerScheduler),
    Kdpm2(Kdpm2Scheduler<B, D>),
    Kdpm2Ancestral(Kdpm2AncestralScheduler<B, D>),
    Lms(LmsScheduler<B, D>),
    /// LCM and Locomotion
    Lcm(LcmScheduler),
}

macro_rules! dispatch {
    ($self:expr, $s:ident => $body:expr) => {
        match $self {
            AnyScheduler::Ddim($s) => $body,
            AnyScheduler::Ddpm($s) => $body,
            AnyScheduler::DdpmWuerstchen($s) => $body,
            AnyScheduler::Euler($s) => $body,
            AnyScheduler::EulerAncestral($s) => $body,
            AnyScheduler::FlowMatchEuler($s) => $body,
            AnyScheduler::Kdpm2($s) => $body,
            AnyScheduler::Kdpm2Ancestral($s) => $body,
            AnyScheduler::Lms($s) => $body,
            AnyScheduler::Lcm($s) => $body,
        }
    };
}

impl<B: Backend, const D: usize> AnyScheduler<B, D> {
    /// Build the scheduler for `kind`
    pub fn new(kind: SchedulerKind, config: SchedulerConfig) -> Result<Self, SchedulerError> {
        tracing::debug!(
            scheduler = %kind,
            steps = config.inference_steps,
            spacing = %config.timestep_spacing,
            karras = config.use_karras_sigmas,
            "Building scheduler"
        );

        Ok(match kind {
            SchedulerKind::Ddim => Self::Ddim(DdimScheduler::new(config)?),
            SchedulerKind::Ddpm => Self::Ddpm(DdpmScheduler::new(config)?),
            SchedulerKind::DdpmWuerstchen => Self::DdpmWuerstchen(DdpmWuerstchenScheduler::new(config)?),
            SchedulerKind::Euler => Self::Euler(EulerScheduler::new(config)?),
            SchedulerKind::EulerAncestral => Self::EulerAncestral(EulerAncestralScheduler::new(config)?),
            SchedulerKind::FlowMatchEulerDiscrete => {
                Self::FlowMatchEuler(FlowMatchEulerScheduler::new(config, FlowMatchMode::Discrete)?)
            }
            SchedulerKind::FlowMatchEulerDynamic => {
                Self::FlowMatchEuler(FlowMatchEulerScheduler::new(config, FlowMatchMode::Dynamic)?)
            }
            SchedulerKind::Kdpm2 => Self::Kdpm2(Kdpm2Scheduler::new(config)?),
            SchedulerKind::Kdpm2Ancestral => Self::Kdpm2Ancestral(Kdpm2AncestralScheduler::new(config)?),
            SchedulerKind::Lms => Self::Lms(LmsScheduler::new(config)?),
            SchedulerKind::Lcm => Self::Lcm(LcmScheduler::new(config)?),
            SchedulerKind::Locomotion => Self::Lcm(LcmScheduler::locomotion(config)?),
        })
    }

    /// Timestep sigmas, for schedulers parameterized by sigma
    pub fn sigmas(&self) -> Option<&[f32]> {
        match self {
            AnyScheduler::Euler(s) => Some(s.sigmas()),
            AnyScheduler::EulerAncestral(s) => Some(s.sigmas()),
            AnyScheduler::FlowMatchEuler(s) => Some(s.sigmas()),
            AnyScheduler::Kdpm2(s) => Some(s.sigmas()),
            AnyScheduler::Kdpm2Ancestral(s) => Some(s.sigmas()),
            AnyScheduler::Lms(s) => Some(s.sigmas()),
            _ => None,
        }
    }
}

impl<B: Backend, const D: usize> Scheduler<B, D> for AnyScheduler<B, D> {
    fn kind(&self) -> SchedulerKind {
        dispatch!(self, s => Scheduler::<B, D>::kind(s))
    }

    fn config(&self) -> &SchedulerConfig {
        dispatch!(self, s => Scheduler::<B, D>::config(s))
    }

    fn timesteps(&self) -> &[usize] {
        dispatch!(self, s => Scheduler::<B, D>::timesteps(s))
    }

    fn init_noise_sigma(&self) -> f32 {
        dispatch!(self, s => Scheduler::<B, D>::init_noise_sigma(s))
    }

    fn order(&self) -> usize {
        dispatch!(self, s => Scheduler::<B, D>::order(s))
    }

    fn scale_input(&self, sample: Tensor<B, D>, timestep: usize) -> Result<Tensor<B, D>, SchedulerError> {
        dispatch!(self, s => s.scale_input(sample, timestep))
    }

    fn step(
        &mut self,
        model_output: Tensor<B, D>,
        timestep: usize,
        sample: Tensor<B, D>,
    ) -> Result<StepResult<B, D>, SchedulerError> {
        dispatch!(self, s => s.step(model_output, timestep, sample))
    }

    fn add_noise(
        &self,
        original: Tensor<B, D>,
        noise: Tensor<B, D>,
        timesteps: &[usize],
    ) -> Result<Tensor<B, D>, SchedulerError> {
        dispatch!(self, s => s.add_noise(original, noise, timesteps))
    }

    fn create_random_sample(&mut self, shape: [usize; D], init_sigma: f32, device: &B::Device) -> Tensor<B, D> {
        dispatch!(self, s => Scheduler::<B, D>::create_random_sample(s, shape, init_sigma, device))
    }
}
