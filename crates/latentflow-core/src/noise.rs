//! Standard-normal noise drawn from a caller-owned RNG.
//!
//! Noise is generated on the host and then moved to the target device, so a
//! seeded RNG gives the same draws on every backend.

use candle_core::{Device, Shape, Tensor};
use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};

use crate::LatentError;

/// Draws an `f32` tensor of independent `N(0, 1)` entries.
///
/// Entries are drawn in row-major order of `shape`.
///
/// # Errors
///
/// Returns [`LatentError::Tensor`] if tensor creation fails.
///
/// # Example
///
/// ```
/// use candle_core::Device;
/// use latentflow_core::noise::standard_normal;
/// use rand::rngs::StdRng;
/// use rand::SeedableRng;
///
/// let mut rng = StdRng::seed_from_u64(7);
/// let eps = standard_normal(&mut rng, (2, 4, 8), &Device::Cpu).unwrap();
/// assert_eq!(eps.dims(), &[2, 4, 8]);
/// ```
pub fn standard_normal<S: Into<Shape>>(
    rng: &mut dyn RngCore,
    shape: S,
    device: &Device,
) -> Result<Tensor, LatentError> {
    let shape = shape.into();
    let data = standard_normal_vec(rng, shape.elem_count());
    Tensor::from_vec(data, shape, device).map_err(|e| LatentError::Tensor {
        message: format!("standard_normal: {e}"),
    })
}

/// Draws `n` independent `N(0, 1)` values.
pub fn standard_normal_vec(rng: &mut dyn RngCore, n: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(n);
    for _ in 0..n {
        let v: f32 = StandardNormal.sample(&mut *rng);
        data.push(v);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn same_seed_same_draws() {
        let mut r1 = StdRng::seed_from_u64(42);
        let mut r2 = StdRng::seed_from_u64(42);
        assert_eq!(standard_normal_vec(&mut r1, 64), standard_normal_vec(&mut r2, 64));
    }

    #[test]
    fn draws_are_roughly_standard() {
        let mut rng = StdRng::seed_from_u64(3);
        let v = standard_normal_vec(&mut rng, 20_000);
        let mean = v.iter().sum::<f32>() / v.len() as f32;
        let var = v.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / v.len() as f32;
        assert!(mean.abs() < 0.05, "mean {mean}");
        assert!((var - 1.0).abs() < 0.05, "var {var}");
    }

    #[test]
    fn tensor_has_requested_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let t = standard_normal(&mut rng, (3, 2), &Device::Cpu).unwrap();
        assert_eq!(t.dims(), &[3, 2]);
        assert!(t
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()
            .iter()
            .all(|x| x.is_finite()));
    }
}
