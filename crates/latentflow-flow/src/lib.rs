//! # latentflow-flow
//!
//! Invertible sequence flows conditioned on a source encoding.
//!
//! A flow maps between the noise space (standard normal, one vector per
//! target position) and the latent space consumed by a decoder. It runs in
//! two directions:
//!
//! - **generative**: noise → latent code, used when sampling
//! - **scoring**: latent code → noise, used when evaluating densities
//!
//! Both directions return the log-determinant `log|∂ε/∂z|` of the scoring
//! direction, so a caller can combine it with the base density the same way
//! regardless of which direction produced it.
//!
//! ## Key Components
//!
//! - [`Flow`]: the contract a prior relies on
//! - [`conditional::ConditionalFlow`]: multi-scale masked affine-coupling flow
//! - [`config::FlowConfig`]: serde configuration for `ConditionalFlow`
//! - [`actnorm::ActNorm`] / [`coupling::AffineCoupling`]: the invertible layers
//!
//! ## Masking Rules
//!
//! - Masked (padding) elements pass through couplings unchanged.
//! - Masked elements are zeroed before they reach a conditioner.
//! - Masked elements never contribute to a log-determinant.

pub mod actnorm;
pub mod conditional;
pub mod config;
pub mod coupling;
mod shape;

pub use conditional::ConditionalFlow;
pub use config::{FlowConfig, MAX_LEVELS};

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use latentflow_core::{LatentError, ParamMap};

/// An invertible transformation of `[batch, tgt_length, features]` tensors
/// conditioned on a source encoding.
///
/// Every method takes the target mask `[batch, tgt_length]` alongside the
/// transformed tensor, and the source encoding `[batch, src_length, hidden]`
/// with its mask `[batch, src_length]`. Log-determinants are `[batch]`.
pub trait Flow {
    /// Runs the forward pass. For a flow with [`Flow::inverse`] set this is
    /// the generative direction (noise → latent).
    fn fwdpass(
        &self,
        input: &Tensor,
        tgt_mask: &Tensor,
        src: &Tensor,
        src_mask: &Tensor,
    ) -> Result<(Tensor, Tensor), LatentError>;

    /// Runs the backward pass. For a flow with [`Flow::inverse`] set this is
    /// the scoring direction (latent → noise).
    fn bwdpass(
        &self,
        input: &Tensor,
        tgt_mask: &Tensor,
        src: &Tensor,
        src_mask: &Tensor,
    ) -> Result<(Tensor, Tensor), LatentError>;

    /// Runs the backward pass in data-dependent initialization mode,
    /// calibrating internal parameters on `input` before transforming it.
    ///
    /// Parameters changed here reach the generative direction after
    /// [`Flow::sync`].
    fn init(
        &mut self,
        input: &Tensor,
        tgt_mask: &Tensor,
        src: &Tensor,
        src_mask: &Tensor,
        init_scale: f64,
    ) -> Result<(Tensor, Tensor), LatentError>;

    /// Propagates pending parameter changes. Idempotent.
    fn sync(&mut self) -> Result<(), LatentError>;

    /// Number of multi-scale levels.
    fn levels(&self) -> usize;

    /// Latent dimensionality per target position.
    fn features(&self) -> usize;

    /// Whether `fwdpass` is the generative (noise → latent) direction.
    fn inverse(&self) -> bool;

    /// Builds a flow from its configuration mapping, registering its
    /// parameters in `var_map`.
    fn from_params(params: &ParamMap, var_map: &VarMap, device: &Device) -> Result<Self, LatentError>
    where
        Self: Sized;
}
