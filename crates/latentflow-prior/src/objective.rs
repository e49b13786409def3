//! KL term of the variational objective.
//!
//! Both the posterior and the prior score the same `nsamples` latent codes
//! per example; the KL estimate is the mean score gap over those samples.

use candle_core::Tensor;
use latentflow_core::LatentError;

/// Reshapes flat per-row scores `[batch * nsamples]` into
/// `[batch, nsamples]`.
///
/// # Errors
///
/// Returns [`LatentError::InvalidArgument`] if `nsamples` is zero or does not
/// divide the row count.
pub fn per_example(log_probs: &Tensor, nsamples: usize) -> Result<Tensor, LatentError> {
    let rows = log_probs.elem_count();
    if nsamples == 0 || rows % nsamples != 0 {
        return Err(LatentError::InvalidArgument {
            message: format!("per_example: {rows} scores cannot be split into groups of {nsamples}"),
        });
    }
    log_probs
        .reshape((rows / nsamples, nsamples))
        .map_err(|e| LatentError::Tensor {
            message: format!("per_example: {e}"),
        })
}

/// Monte-Carlo KL estimate `mean_n(log q(z) − log p(z))`.
///
/// `posterior` and `prior` are `[batch, nsamples]`. Returns `[batch]`, or a
/// scalar summed over the batch when `reduce` is set.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use latentflow_prior::objective::kl_divergence;
///
/// let device = Device::Cpu;
/// let q = Tensor::new(&[[-1f32, -3.0], [0.0, 0.0]], &device).unwrap();
/// let p = Tensor::new(&[[-2f32, -5.0], [-1.0, 1.0]], &device).unwrap();
/// let kl = kl_divergence(&q, &p, false).unwrap().to_vec1::<f32>().unwrap();
/// assert_eq!(kl, vec![1.5, 0.0]);
/// ```
pub fn kl_divergence(posterior: &Tensor, prior: &Tensor, reduce: bool) -> Result<Tensor, LatentError> {
    let map_err = |e: candle_core::Error| LatentError::Tensor {
        message: format!("kl_divergence: {e}"),
    };

    if posterior.dims() != prior.dims() || posterior.rank() != 2 {
        return Err(LatentError::InvalidArgument {
            message: format!(
                "kl_divergence: expected matching [batch, nsamples] scores, got {:?} and {:?}",
                posterior.dims(),
                prior.dims()
            ),
        });
    }

    let kl = posterior.sub(prior).and_then(|d| d.mean(1)).map_err(map_err)?;
    if reduce {
        kl.sum_all().map_err(map_err)
    } else {
        Ok(kl)
    }
}
