//! Target-length prediction for the sampling path.

use candle_core::{Device, Tensor};
use latentflow_core::mask::row_lengths;
use latentflow_core::LatentError;

/// Top-k target lengths per source example.
#[derive(Debug, Clone)]
pub struct LengthPrediction {
    /// Predicted lengths, row-major `[batch, topk]` flattened to `batch * topk`.
    pub lengths: Vec<usize>,

    /// Log-probability of each predicted length, `[batch * topk]`.
    pub log_probs: Tensor,
}

/// Predicts target lengths from the source encoding.
pub trait LengthPredictor {
    /// Returns the `topk` most likely target lengths for every example.
    fn predict(
        &self,
        src: &Tensor,
        src_mask: &Tensor,
        topk: usize,
    ) -> Result<LengthPrediction, LatentError>;
}

/// Predicts target lengths around the source length.
///
/// Candidates are the source length followed by offsets of growing
/// magnitude (`+1, −1, +2, −2, …`), clamped to at least 1, all with uniform
/// probability `1 / topk`.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use latentflow_prior::{LengthPredictor, SourceLengthPredictor};
///
/// let device = Device::Cpu;
/// let src = Tensor::zeros((1, 4, 2), candle_core::DType::F32, &device).unwrap();
/// let src_mask = Tensor::new(&[[1f32, 1.0, 1.0, 0.0]], &device).unwrap();
///
/// let prediction = SourceLengthPredictor.predict(&src, &src_mask, 3).unwrap();
/// assert_eq!(prediction.lengths, vec![3, 4, 2]);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceLengthPredictor;

impl SourceLengthPredictor {
    fn candidates(source_length: usize, topk: usize) -> Vec<usize> {
        let mut out = Vec::with_capacity(topk);
        out.push(source_length.max(1));
        let mut offset = 1usize;
        while out.len() < topk {
            out.push(source_length + offset);
            if out.len() < topk {
                out.push(source_length.saturating_sub(offset).max(1));
            }
            offset += 1;
        }
        out.truncate(topk);
        out
    }
}

impl LengthPredictor for SourceLengthPredictor {
    fn predict(
        &self,
        _src: &Tensor,
        src_mask: &Tensor,
        topk: usize,
    ) -> Result<LengthPrediction, LatentError> {
        if topk == 0 {
            return Err(LatentError::InvalidArgument {
                message: "SourceLengthPredictor: topk must be at least 1".to_string(),
            });
        }

        let lengths: Vec<usize> = row_lengths(src_mask)?
            .into_iter()
            .flat_map(|n| Self::candidates(n, topk))
            .collect();
        let log_probs = uniform_log_probs(lengths.len(), topk, src_mask.device())?;
        Ok(LengthPrediction { lengths, log_probs })
    }
}

fn uniform_log_probs(n: usize, topk: usize, device: &Device) -> Result<Tensor, LatentError> {
    let value = -(topk as f32).ln();
    Tensor::from_vec(vec![value; n], n, device).map_err(|e| LatentError::Tensor {
        message: format!("uniform_log_probs: {e}"),
    })
}
