//! Target masks and batch-row replication.
//!
//! A mask is an `f32` tensor `[rows, length]` holding 1.0 at real positions
//! and 0.0 at padding. Masks always accompany the latent or noise tensor they
//! describe.

use candle_core::{DType, Device, Tensor};

use crate::LatentError;

/// Builds a `[lengths.len(), max_length]` mask where row `r` is real at
/// positions `p < lengths[r]`.
///
/// Lengths longer than `max_length` mark the whole row as real.
///
/// # Errors
///
/// Returns [`LatentError::Tensor`] if tensor creation fails.
///
/// # Example
///
/// ```
/// use candle_core::Device;
/// use latentflow_core::mask::length_mask;
///
/// let mask = length_mask(&[2, 4], 4, &Device::Cpu).unwrap();
/// let rows = mask.to_vec2::<f32>().unwrap();
/// assert_eq!(rows[0], vec![1.0, 1.0, 0.0, 0.0]);
/// assert_eq!(rows[1], vec![1.0, 1.0, 1.0, 1.0]);
/// ```
pub fn length_mask(
    lengths: &[usize],
    max_length: usize,
    device: &Device,
) -> Result<Tensor, LatentError> {
    let map_err = |e: candle_core::Error| LatentError::Tensor {
        message: format!("length_mask: {e}"),
    };

    let mut data = Vec::with_capacity(lengths.len() * max_length);
    for &length in lengths {
        for p in 0..max_length {
            data.push(if p < length { 1.0f32 } else { 0.0 });
        }
    }
    Tensor::from_vec(data, (lengths.len(), max_length), device).map_err(map_err)
}

/// Replicates every row of `tensor` `n` times along the leading axis.
///
/// `[rows, ...]` becomes `[rows * n, ...]` with the copies of row `r` at
/// indices `r * n .. (r + 1) * n`, matching a flattened `[rows, n, ...]`
/// layout.
///
/// # Errors
///
/// Returns [`LatentError::InvalidArgument`] for a scalar tensor and
/// [`LatentError::Tensor`] if broadcasting fails.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use latentflow_core::mask::expand_rows;
///
/// let t = Tensor::new(&[[1f32, 2.0], [3.0, 4.0]], &Device::Cpu).unwrap();
/// let e = expand_rows(&t, 2).unwrap();
/// assert_eq!(
///     e.to_vec2::<f32>().unwrap(),
///     vec![vec![1.0, 2.0], vec![1.0, 2.0], vec![3.0, 4.0], vec![3.0, 4.0]]
/// );
/// ```
pub fn expand_rows(tensor: &Tensor, n: usize) -> Result<Tensor, LatentError> {
    let map_err = |e: candle_core::Error| LatentError::Tensor {
        message: format!("expand_rows: {e}"),
    };

    let dims = tensor.dims().to_vec();
    if dims.is_empty() {
        return Err(LatentError::InvalidArgument {
            message: "expand_rows: cannot replicate a scalar tensor".to_string(),
        });
    }
    if n == 1 {
        return Ok(tensor.clone());
    }

    let mut expanded = dims.clone();
    expanded.insert(1, n);
    let mut flat = dims;
    flat[0] *= n;

    tensor
        .unsqueeze(1)
        .map_err(map_err)?
        .broadcast_as(expanded)
        .map_err(map_err)?
        .contiguous()
        .map_err(map_err)?
        .reshape(flat)
        .map_err(map_err)
}

/// Counts the real positions of each mask row.
///
/// # Errors
///
/// Returns [`LatentError::Tensor`] if `mask` is not a 2D `f32` tensor.
pub fn row_lengths(mask: &Tensor) -> Result<Vec<usize>, LatentError> {
    let map_err = |e: candle_core::Error| LatentError::Tensor {
        message: format!("row_lengths: {e}"),
    };

    let sums = mask
        .to_dtype(DType::F32)
        .map_err(map_err)?
        .sum(1)
        .map_err(map_err)?
        .to_vec1::<f32>()
        .map_err(map_err)?;
    Ok(sums.into_iter().map(|s| s.round() as usize).collect())
}
