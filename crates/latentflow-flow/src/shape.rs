//! Shape plumbing shared by the flow layers.

use candle_core::Tensor;
use latentflow_core::LatentError;

fn map_err(op: &'static str) -> impl Fn(candle_core::Error) -> LatentError {
    move |e| LatentError::Tensor {
        message: format!("{op}: {e}"),
    }
}

/// Broadcasts a `[batch, length]` mask over `features` into a contiguous
/// `[batch, length, features]` element mask.
pub(crate) fn element_mask(tgt_mask: &Tensor, features: usize) -> Result<Tensor, LatentError> {
    let (batch, length) = tgt_mask.dims2().map_err(map_err("element_mask"))?;
    tgt_mask
        .unsqueeze(2)
        .and_then(|m| m.broadcast_as((batch, length, features)))
        .and_then(|m| m.contiguous())
        .map_err(map_err("element_mask"))
}

/// Folds adjacent position pairs into the feature axis:
/// `[b, l, f]` → `[b, l / 2, 2f]`.
pub(crate) fn squeeze(x: &Tensor) -> Result<Tensor, LatentError> {
    let (batch, length, features) = x.dims3().map_err(map_err("squeeze"))?;
    x.contiguous()
        .and_then(|x| x.reshape((batch, length / 2, features * 2)))
        .map_err(map_err("squeeze"))
}

/// Inverse of [`squeeze`]: `[b, l, f]` → `[b, 2l, f / 2]`.
pub(crate) fn unsqueeze(x: &Tensor) -> Result<Tensor, LatentError> {
    let (batch, length, features) = x.dims3().map_err(map_err("unsqueeze"))?;
    x.contiguous()
        .and_then(|x| x.reshape((batch, length * 2, features / 2)))
        .map_err(map_err("unsqueeze"))
}

/// Masked mean of the source encoding over source positions: `[b, hidden]`.
pub(crate) fn pooled_context(src: &Tensor, src_mask: &Tensor) -> Result<Tensor, LatentError> {
    let map_err = map_err("pooled_context");
    let weights = src_mask.unsqueeze(2).map_err(&map_err)?;
    let total = src
        .broadcast_mul(&weights)
        .and_then(|t| t.sum(1))
        .map_err(&map_err)?;
    let count = src_mask
        .sum_keepdim(1)
        .and_then(|c| c.maximum(1.0))
        .map_err(&map_err)?;
    total.broadcast_div(&count).map_err(&map_err)
}
