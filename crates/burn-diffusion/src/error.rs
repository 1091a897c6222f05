//! Errors raised by the sampling loop

use burn_diffusion_core::TensorError;
use burn_diffusion_schedulers::SchedulerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiffusionError {
    /// The generation was cancelled through its [`GenerationControl`](crate::GenerationControl)
    #[error("Generation cancelled")]
    Cancelled,

    #[error("Invalid sampler configuration: {0}")]
    Config(String),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Tensor error: {0}")]
    Tensor(#[from] TensorError),

    /// The noise predictor failed
    #[error("Inference failed: {0}")]
    Inference(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl DiffusionError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub(crate) fn inference<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Inference(Box::new(err))
    }

    /// True when the loop stopped because it was asked to, not because something failed
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DiffusionError::Cancelled)
    }
}
