//! # latentflow-core
//!
//! Shared foundation for the latentflow workspace.
//!
//! ## Key Components
//!
//! - [`LatentError`]: the error type every latentflow crate returns
//! - [`ParamMap`]: configuration mapping consumed by `from_params` constructors
//! - [`mask`]: target masks built from lengths, row replication for sample expansion
//! - [`noise`]: standard-normal tensors drawn from a caller-owned RNG
//! - [`padding`]: rounding lengths and token sequences up to a length unit
//!
//! ## Tensor Conventions
//!
//! - Latent codes and noise: `[batch, tgt_length, features]`, `f32`
//! - Masks: `[batch, length]`, `f32`, 1.0 = real position, 0.0 = padding
//! - Log-probabilities: `[batch]`, natural-log units

pub mod error;
pub mod mask;
pub mod noise;
pub mod padding;
pub mod params;

pub use error::LatentError;
pub use params::ParamMap;

/// Length granularity targets are padded to before entering a flow.
pub const LENGTH_UNIT: usize = 4;

/// `ln(2π)`, the constant term of the standard-normal log-density.
pub const LOG_2PI: f64 = 1.837_877_066_409_345_5;
