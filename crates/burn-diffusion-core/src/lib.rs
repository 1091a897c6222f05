//! Tensor primitives for diffusion sampling
//!
//! Thin, shape-checked layer over burn tensors that the schedulers and the
//! sampling loop are written against.
//!
//! # Modules
//!
//! - [`ops`] - Elementwise add/subtract/multiply/divide/clip/abs, copying and in-place
//! - [`batch`] - Concatenate, repeat, split and join along the batch axis
//! - [`layout`] - Checked reshape and permute
//! - [`random`] - Seeded Box–Muller Gaussian sampler
//! - [`numeric`] - Scalar guards (NaN, zero denominators, signed square roots)
//! - [`data`] - Host readback
//!
//! # Example
//!
//! ```ignore
//! use burn_diffusion_core::{ops, random::GaussianSampler};
//!
//! let mut sampler = GaussianSampler::new(42);
//! let noise = sampler.sample::<B, 4>([1, 4, 64, 64], 14.6, &device);
//! let scaled = ops::divide_by_scalar(&noise, (14.6f32 * 14.6 + 1.0).sqrt());
//! ```

pub mod batch;
pub mod data;
pub mod error;
pub mod layout;
pub mod numeric;
pub mod ops;
pub mod random;

pub use error::TensorError;
pub use random::GaussianSampler;
