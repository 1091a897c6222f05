//! The noise-prediction network, seen from the sampling loop

use burn::prelude::*;
use burn_diffusion_core::{batch, TensorError};

use crate::accumulate::gather_window;

/// Inputs for one forward pass
#[derive(Debug, Clone)]
pub struct PredictionRequest<B: Backend, const D: usize> {
    /// Scaled latent (or latent window)
    pub sample: Tensor<B, D>,
    pub timestep: usize,
    /// Conditioning, `[batch or frames, sequence, hidden]`
    pub encoder_hidden_states: Tensor<B, 3>,
}

/// A trained network that predicts noise (or x₀, or velocity) for a latent
///
/// `&mut self` on every call keeps inference and unloading exclusive.
pub trait NoisePredictor<B: Backend, const D: usize> {
    type Error: std::error::Error + Send + Sync + 'static;

    fn predict(&mut self, request: PredictionRequest<B, D>) -> Result<Tensor<B, D>, Self::Error>;

    /// Bring weights into memory; called before the first prediction and
    /// again after every unload, so it should be cheap when already loaded
    fn load(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Release weights
    fn unload(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Conditional and unconditional text embeddings
#[derive(Debug, Clone)]
pub struct PromptEmbeddings<B: Backend> {
    pub positive: Tensor<B, 3>,
    pub negative: Tensor<B, 3>,
}

impl<B: Backend> PromptEmbeddings<B> {
    pub fn new(positive: Tensor<B, 3>, negative: Tensor<B, 3>) -> Self {
        Self { positive, negative }
    }

    /// Positive embedding with an all-zero negative of the same shape
    pub fn positive_only(positive: Tensor<B, 3>) -> Self {
        let negative = positive.zeros_like();
        Self { positive, negative }
    }
}

/// Embedding for one forward pass
///
/// With one embedding per frame (leading dimension equal to the frame
/// count) the window's frames are gathered. A single embedding is repeated
/// to the latent batch size. Anything else passes through unchanged.
pub fn window_embeddings<B: Backend>(
    embeddings: &Tensor<B, 3>,
    window: Option<&[usize]>,
    num_frames: usize,
    batch_size: usize,
) -> Result<Tensor<B, 3>, TensorError> {
    let leading = embeddings.dims()[0];
    match window {
        Some(indices) if num_frames > 1 && leading == num_frames => {
            gather_window(embeddings.clone(), 0, indices)
        }
        _ if leading == 1 && batch_size > 1 => batch::repeat(embeddings.clone(), batch_size, batch::BATCH_AXIS),
        _ => Ok(embeddings.clone()),
    }
}
