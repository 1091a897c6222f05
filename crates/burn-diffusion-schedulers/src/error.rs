//! Scheduler error type

use burn_diffusion_core::TensorError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Invalid scheduler configuration: {0}")]
    Config(String),
    #[error("Timestep {0} is not part of this scheduler's schedule")]
    UnknownTimestep(usize),
    #[error("Tensor error: {0}")]
    Tensor(#[from] TensorError),
}

impl SchedulerError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
