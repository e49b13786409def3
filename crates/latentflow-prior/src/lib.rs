//! # latentflow-prior
//!
//! A latent-variable prior for non-autoregressive translation: given a source
//! encoding, it defines a distribution over a latent code with one vector per
//! target position, by pushing standard-normal noise through an invertible
//! [`Flow`](latentflow_flow::Flow).
//!
//! ## Key Components
//!
//! - [`LatentPrior`]: the capability every prior variant provides
//! - [`prior::Prior`]: the flow-backed prior (decode, sample, score, init, sync)
//! - [`registry::PriorRegistry`]: explicit name → variant map used to build
//!   priors from configuration
//! - [`sample::TargetLength`]: caller-supplied length or a [`length::LengthPredictor`]
//! - [`objective::kl_divergence`]: KL term computed from prior/posterior scores
//!
//! ## Density
//!
//! For noise `ε` and the flow's log-determinant:
//!
//! ```text
//! log p(z) = −½ Σ_{real p, f} (ε[p,f]² + ln 2π) + log|∂ε/∂z|
//! ```
//!
//! Padding positions are masked out of the sum, so they never affect the
//! returned log-probabilities.

pub mod length;
pub mod objective;
pub mod prior;
pub mod registry;
pub mod sample;

pub use latentflow_core;
pub use latentflow_flow;

pub use length::{LengthPrediction, LengthPredictor, SourceLengthPredictor};
pub use prior::Prior;
pub use registry::{AnyPrior, PriorRegistry, PriorVariant};
pub use sample::{PriorSample, SampleConfig, TargetLength};

use candle_core::Tensor;
use latentflow_core::LatentError;
use rand::RngCore;

/// Operations shared by every prior variant.
///
/// Tensor shapes: source `[batch, src_length, hidden]`, source mask
/// `[batch, src_length]`, target mask `[batch, tgt_length]`, latent and noise
/// `[batch, tgt_length, features]`, log-probabilities `[batch]`.
pub trait LatentPrior {
    /// Latent dimensionality per target position.
    fn features(&self) -> usize;

    /// Length granularity the wrapped flow requires: `max(2, 2^(levels-1))`.
    fn length_unit(&self) -> usize;

    /// Maps noise to a latent code and returns its log-probability.
    fn decode(
        &self,
        epsilon: &Tensor,
        tgt_mask: &Tensor,
        src: &Tensor,
        src_mask: &Tensor,
    ) -> Result<(Tensor, Tensor), LatentError>;

    /// Draws latent codes for every source example.
    fn sample(
        &self,
        src: &Tensor,
        src_mask: &Tensor,
        target: TargetLength<'_>,
        config: &SampleConfig,
        rng: &mut dyn RngCore,
    ) -> Result<PriorSample, LatentError>;

    /// Scores an observed latent code.
    fn log_probability(
        &self,
        z: &Tensor,
        tgt_mask: &Tensor,
        src: &Tensor,
        src_mask: &Tensor,
    ) -> Result<Tensor, LatentError>;

    /// Data-dependent initialization of the wrapped flow. Returns the flow's
    /// backward-pass output unchanged.
    fn init(
        &mut self,
        z: &Tensor,
        tgt_mask: &Tensor,
        src: &Tensor,
        src_mask: &Tensor,
        init_scale: f64,
    ) -> Result<(Tensor, Tensor), LatentError>;

    /// Propagates pending parameter changes inside the flow. Idempotent.
    fn sync(&mut self) -> Result<(), LatentError>;
}
