//! Sampling requests and results.

use candle_core::Tensor;

use crate::length::LengthPredictor;

/// How the target length of each sample is chosen.
#[derive(Clone, Copy)]
pub enum TargetLength<'a> {
    /// Every example is sampled at this length.
    Fixed(usize),

    /// Each example is sampled at its `nlengths` most likely predicted
    /// lengths, multiplying the batch by `nlengths`.
    Predicted {
        predictor: &'a dyn LengthPredictor,
        nlengths: usize,
    },
}

impl std::fmt::Debug for TargetLength<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(length) => write!(f, "Fixed({length})"),
            Self::Predicted { nlengths, .. } => write!(f, "Predicted(top {nlengths})"),
        }
    }
}

/// Per-call sampling settings.
///
/// # Example
///
/// ```
/// use latentflow_prior::SampleConfig;
///
/// let config = SampleConfig::default();
/// assert_eq!(config.nsamples, 1);
/// assert!(!config.include_zero);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SampleConfig {
    /// Independent samples per example (and per predicted length) (default: 1).
    pub nsamples: usize,

    /// Sampling temperature (default: 0.0). Accepted for interface
    /// compatibility; the noise is always drawn from `N(0, 1)`.
    pub tau: f64,

    /// Replace the first sample of every example with all-zero noise, the
    /// mode of the base distribution (default: false).
    pub include_zero: bool,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            nsamples: 1,
            tau: 0.0,
            include_zero: false,
        }
    }
}

/// Latent codes drawn from a prior, with the context needed to decode them.
///
/// All tensors share the leading axis `rows = batch [* nlengths] * nsamples`,
/// ordered example-major, then length, then sample.
#[derive(Debug, Clone)]
pub struct PriorSample {
    /// Latent codes trimmed to the longest requested length,
    /// `[rows, length, features]`.
    pub z: Tensor,

    /// Log-probability of each code under the prior, `[rows]`.
    pub log_probs: Tensor,

    /// Target mask matching `z`, `[rows, length]`.
    pub tgt_mask: Tensor,

    /// Source encoding replicated to `rows`.
    pub src: Tensor,

    /// Source mask replicated to `rows`.
    pub src_mask: Tensor,

    /// Target length of each row.
    pub lengths: Vec<usize>,

    /// Log-probability of each row's predicted length, `[rows]`; only set on
    /// the predictor path.
    pub length_log_probs: Option<Tensor>,
}
