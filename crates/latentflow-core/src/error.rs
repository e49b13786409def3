//! Error type shared by all latentflow crates.

use thiserror::Error;

/// Errors raised while building, running or sampling a latent prior.
///
/// Tensor backend failures are wrapped as [`LatentError::Tensor`] with the
/// name of the operation that failed prefixed to the backend message.
///
/// # Example
///
/// ```
/// use latentflow_core::LatentError;
///
/// let err = LatentError::UnknownPrior { name: "gaussian".to_string() };
/// assert_eq!(err.to_string(), "unknown prior variant: gaussian");
/// ```
#[derive(Debug, Error)]
pub enum LatentError {
    /// A tensor operation failed inside the computation backend.
    #[error("tensor error: {message}")]
    Tensor { message: String },

    /// A configuration mapping could not be interpreted.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// A required configuration key is absent.
    #[error("missing configuration key: {key}")]
    MissingParam { key: String },

    /// No prior variant is registered under this name.
    #[error("unknown prior variant: {name}")]
    UnknownPrior { name: String },

    /// A sequence length is not a multiple of the flow's length unit.
    #[error("length {length} is not a multiple of {unit}")]
    InvalidLength { length: usize, unit: usize },

    /// A call argument is outside its valid range.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
}
