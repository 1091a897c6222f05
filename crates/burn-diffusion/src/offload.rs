//! Predictor residency during generation
//!
//! Memory-constrained callers can have the predictor's weights released at
//! the end of a generation or after every timestep. [`PredictorLease`]
//! owns the loaded state, so the predictor is released on every exit path,
//! including errors and cancellation.

use std::marker::PhantomData;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::DiffusionError;
use crate::predictor::{NoisePredictor, PredictionRequest};

/// When the predictor's weights are released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourcePolicy {
    /// Keep everything loaded (default, fastest)
    #[default]
    KeepLoaded,
    /// Unload once the loop finishes
    ReleaseAfterGeneration,
    /// Unload after every timestep and reload before the next
    ReleaseEachTimestep,
}

impl ResourcePolicy {
    /// Get a human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            ResourcePolicy::KeepLoaded => "keep_loaded",
            ResourcePolicy::ReleaseAfterGeneration => "release_after_generation",
            ResourcePolicy::ReleaseEachTimestep => "release_each_timestep",
        }
    }

    /// Whether the predictor is unloaded when the generation ends
    pub fn releases_at_end(&self) -> bool {
        !matches!(self, ResourcePolicy::KeepLoaded)
    }
}

/// Exclusive, loaded access to a predictor for one generation
pub struct PredictorLease<'a, B: Backend, const D: usize, P: NoisePredictor<B, D>> {
    predictor: &'a mut P,
    policy: ResourcePolicy,
    loaded: bool,
    _backend: PhantomData<B>,
}

impl<'a, B: Backend, const D: usize, P: NoisePredictor<B, D>> PredictorLease<'a, B, D, P> {
    /// Load the predictor and take it for the generation
    pub fn acquire(predictor: &'a mut P, policy: ResourcePolicy) -> Result<Self, DiffusionError> {
        let mut lease = Self {
            predictor,
            policy,
            loaded: false,
            _backend: PhantomData,
        };
        lease.ensure_loaded()?;
        Ok(lease)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn ensure_loaded(&mut self) -> Result<(), DiffusionError> {
        if !self.loaded {
            self.predictor.load().map_err(DiffusionError::inference)?;
            self.loaded = true;
            tracing::debug!(policy = self.policy.name(), "Predictor loaded");
        }
        Ok(())
    }

    pub fn predict(&mut self, request: PredictionRequest<B, D>) -> Result<Tensor<B, D>, DiffusionError> {
        self.ensure_loaded()?;
        self.predictor.predict(request).map_err(DiffusionError::inference)
    }

    /// Unload now; the next prediction reloads
    pub fn release(&mut self) -> Result<(), DiffusionError> {
        if self.loaded {
            self.loaded = false;
            self.predictor.unload().map_err(DiffusionError::inference)?;
            tracing::debug!("Predictor unloaded");
        }
        Ok(())
    }

    /// Called after each timestep
    pub fn end_timestep(&mut self) -> Result<(), DiffusionError> {
        if self.policy == ResourcePolicy::ReleaseEachTimestep {
            self.release()?;
        }
        Ok(())
    }

    /// Called once the loop finishes successfully
    pub fn finish(mut self) -> Result<(), DiffusionError> {
        if self.policy.releases_at_end() {
            self.release()?;
        }
        Ok(())
    }
}

impl<B: Backend, const D: usize, P: NoisePredictor<B, D>> Drop for PredictorLease<'_, B, D, P> {
    fn drop(&mut self) {
        if self.loaded && self.policy.releases_at_end() {
            self.loaded = false;
            if let Err(err) = self.predictor.unload() {
                tracing::warn!(error = %err, "Failed to unload predictor");
            }
        }
    }
}
