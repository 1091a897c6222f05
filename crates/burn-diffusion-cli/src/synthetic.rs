//! A network-free noise predictor for exercising the loop

use std::convert::Infallible;

use burn::prelude::*;
use burn_diffusion::{NoisePredictor, PredictionRequest};

/// Predicts `scale · sample`, ignoring the timestep and conditioning
#[derive(Debug, Clone)]
pub struct SyntheticPredictor {
    scale: f32,
    calls: usize,
}

impl SyntheticPredictor {
    pub fn new(scale: f32) -> Self {
        Self { scale, calls: 0 }
    }

    /// Forward passes so far
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl<B: Backend, const D: usize> NoisePredictor<B, D> for SyntheticPredictor {
    type Error = Infallible;

    fn predict(&mut self, request: PredictionRequest<B, D>) -> Result<Tensor<B, D>, Infallible> {
        self.calls += 1;
        Ok(request.sample * self.scale)
    }
}
