//! Activation normalization with data-dependent initialization.
//!
//! Scoring direction: `y = x · exp(log_scale) + bias`, per feature.
//! Generative direction: `x = (y − bias) · exp(−log_scale)`.
//!
//! The scoring direction reads the trainable parameters directly. The
//! generative direction reads a snapshot refreshed by [`ActNorm::sync`], so
//! parameter updates (optimizer steps, [`ActNorm::initialize`]) reach sampling
//! only after a sync.

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::VarMap;
use latentflow_core::LatentError;

/// Numerical floor added to the variance during initialization.
const INIT_EPS: f64 = 1e-6;

struct Snapshot {
    log_scale: Tensor,
    bias: Tensor,
    inv_scale: Tensor,
}

/// Per-feature affine normalization layer.
pub struct ActNorm {
    log_scale: Var,
    bias: Var,
    snapshot: Snapshot,
    features: usize,
}

impl std::fmt::Debug for ActNorm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ActNorm({})", self.features)
    }
}

impl ActNorm {
    /// Creates an identity ActNorm whose parameters are registered in
    /// `var_map` as `{prefix}.log_scale` and `{prefix}.bias`.
    ///
    /// # Errors
    ///
    /// Returns [`LatentError::Tensor`] if parameter creation fails.
    pub fn new(
        var_map: &VarMap,
        prefix: &str,
        features: usize,
        device: &Device,
    ) -> Result<Self, LatentError> {
        let map_err = |e: candle_core::Error| LatentError::Tensor {
            message: format!("ActNorm::new: {e}"),
        };

        let log_scale = Var::zeros(features, DType::F32, device).map_err(map_err)?;
        let bias = Var::zeros(features, DType::F32, device).map_err(map_err)?;

        {
            let mut data = var_map.data().lock().map_err(|_| LatentError::Tensor {
                message: "ActNorm::new: var map lock poisoned".to_string(),
            })?;
            data.insert(format!("{prefix}.log_scale"), log_scale.clone());
            data.insert(format!("{prefix}.bias"), bias.clone());
        }

        let snapshot = Self::take_snapshot(&log_scale, &bias)?;
        Ok(Self {
            log_scale,
            bias,
            snapshot,
            features,
        })
    }

    fn take_snapshot(log_scale: &Var, bias: &Var) -> Result<Snapshot, LatentError> {
        let map_err = |e: candle_core::Error| LatentError::Tensor {
            message: format!("ActNorm::sync: {e}"),
        };
        let log_scale = log_scale.as_tensor().copy().map_err(map_err)?;
        let bias = bias.as_tensor().copy().map_err(map_err)?;
        let inv_scale = log_scale.neg().and_then(|t| t.exp()).map_err(map_err)?;
        Ok(Snapshot {
            log_scale,
            bias,
            inv_scale,
        })
    }

    /// Scoring direction. `mask` is the element mask matching `x`.
    ///
    /// Returns the output and the per-example log-determinant `[batch]`.
    pub fn forward(&self, x: &Tensor, mask: &Tensor) -> Result<(Tensor, Tensor), LatentError> {
        let map_err = |e: candle_core::Error| LatentError::Tensor {
            message: format!("ActNorm::forward: {e}"),
        };

        let log_scale = self.log_scale.as_tensor();
        let y = log_scale
            .exp()
            .and_then(|scale| x.broadcast_mul(&scale))
            .and_then(|y| y.broadcast_add(self.bias.as_tensor()))
            .map_err(map_err)?;
        let logdet = mask
            .broadcast_mul(log_scale)
            .and_then(|t| t.sum((1, 2)))
            .map_err(map_err)?;
        Ok((y, logdet))
    }

    /// Generative direction, using the parameters as of the last sync.
    pub fn reverse(&self, y: &Tensor, mask: &Tensor) -> Result<(Tensor, Tensor), LatentError> {
        let map_err = |e: candle_core::Error| LatentError::Tensor {
            message: format!("ActNorm::reverse: {e}"),
        };

        let x = y
            .broadcast_sub(&self.snapshot.bias)
            .and_then(|t| t.broadcast_mul(&self.snapshot.inv_scale))
            .map_err(map_err)?;
        let logdet = mask
            .broadcast_mul(&self.snapshot.log_scale)
            .and_then(|t| t.sum((1, 2)))
            .map_err(map_err)?;
        Ok((x, logdet))
    }

    /// Sets the parameters so the scoring output over real elements of `x`
    /// has zero mean and standard deviation `init_scale` per feature.
    ///
    /// # Errors
    ///
    /// Returns [`LatentError::InvalidArgument`] if `init_scale` is not
    /// positive and [`LatentError::Tensor`] if a tensor operation fails.
    pub fn initialize(&self, x: &Tensor, mask: &Tensor, init_scale: f64) -> Result<(), LatentError> {
        if !(init_scale > 0.0 && init_scale.is_finite()) {
            return Err(LatentError::InvalidArgument {
                message: format!("ActNorm::initialize: init_scale must be positive, got {init_scale}"),
            });
        }
        let map_err = |e: candle_core::Error| LatentError::Tensor {
            message: format!("ActNorm::initialize: {e}"),
        };

        let count = mask
            .sum((0, 1))
            .and_then(|c| c.maximum(1.0))
            .map_err(map_err)?;
        let mean = x
            .mul(mask)
            .and_then(|t| t.sum((0, 1)))
            .and_then(|t| t.div(&count))
            .map_err(map_err)?;
        let var = x
            .broadcast_sub(&mean)
            .and_then(|t| t.mul(mask))
            .and_then(|t| t.sqr())
            .and_then(|t| t.sum((0, 1)))
            .and_then(|t| t.div(&count))
            .map_err(map_err)?;
        let log_scale = var
            .affine(1.0, INIT_EPS)
            .and_then(|t| t.sqrt())
            .and_then(|std| std.recip())
            .and_then(|t| t.affine(init_scale, 0.0))
            .and_then(|t| t.log())
            .map_err(map_err)?;
        let bias = log_scale
            .exp()
            .and_then(|scale| mean.mul(&scale))
            .and_then(|t| t.neg())
            .map_err(map_err)?;

        self.log_scale.set(&log_scale).map_err(map_err)?;
        self.bias.set(&bias).map_err(map_err)?;

        tracing::debug!(features = self.features, init_scale, "ActNorm initialized");
        Ok(())
    }

    /// Refreshes the snapshot used by the generative direction.
    pub fn sync(&mut self) -> Result<(), LatentError> {
        self.snapshot = Self::take_snapshot(&self.log_scale, &self.bias)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> (Tensor, Tensor) {
        let device = Device::Cpu;
        let x = Tensor::new(
            &[[[1f32, -2.0], [3.0, 0.0], [50.0, 50.0]], [[-1.0, 4.0], [5.0, 2.0], [7.0, -7.0]]],
            &device,
        )
        .unwrap();
        let mask = Tensor::new(
            &[[[1f32, 1.0], [1.0, 1.0], [0.0, 0.0]], [[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]]],
            &device,
        )
        .unwrap();
        (x, mask)
    }

    #[test]
    fn fresh_actnorm_is_identity() {
        let norm = ActNorm::new(&VarMap::new(), "an", 2, &Device::Cpu).unwrap();
        let (x, mask) = input();
        let (y, logdet) = norm.forward(&x, &mask).unwrap();
        assert_eq!(y.to_vec3::<f32>().unwrap(), x.to_vec3::<f32>().unwrap());
        assert_eq!(logdet.to_vec1::<f32>().unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn registers_parameters_in_var_map() {
        let var_map = VarMap::new();
        let _norm = ActNorm::new(&var_map, "level0.step1.actnorm", 4, &Device::Cpu).unwrap();
        let data = var_map.data().lock().unwrap();
        assert!(data.contains_key("level0.step1.actnorm.log_scale"));
        assert!(data.contains_key("level0.step1.actnorm.bias"));
    }

    #[test]
    fn initialize_normalizes_real_elements() {
        let mut norm = ActNorm::new(&VarMap::new(), "an", 2, &Device::Cpu).unwrap();
        let (x, mask) = input();
        norm.initialize(&x, &mask, 1.0).unwrap();
        norm.sync().unwrap();

        let (y, _) = norm.forward(&x, &mask).unwrap();
        let y = y.mul(&mask).unwrap();
        let count = mask.sum((0, 1)).unwrap();
        let mean = y.sum((0, 1)).unwrap().div(&count).unwrap().to_vec1::<f32>().unwrap();
        let var = y
            .sqr()
            .unwrap()
            .sum((0, 1))
            .unwrap()
            .div(&count)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        for f in 0..2 {
            assert!(mean[f].abs() < 1e-4, "mean[{f}] = {}", mean[f]);
            assert!((var[f] - 1.0).abs() < 1e-3, "var[{f}] = {}", var[f]);
        }
    }

    #[test]
    fn reverse_inverts_forward_after_sync() {
        let mut norm = ActNorm::new(&VarMap::new(), "an", 2, &Device::Cpu).unwrap();
        let (x, mask) = input();
        norm.initialize(&x, &mask, 0.5).unwrap();
        norm.sync().unwrap();

        let (y, ld_fwd) = norm.forward(&x, &mask).unwrap();
        let (back, ld_rev) = norm.reverse(&y, &mask).unwrap();
        let diff = (back - &x)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(diff < 1e-3, "max abs diff {diff}");

        let a = ld_fwd.to_vec1::<f32>().unwrap();
        let b = ld_rev.to_vec1::<f32>().unwrap();
        for (p, q) in a.iter().zip(b.iter()) {
            assert!((p - q).abs() < 1e-4);
        }
    }

    #[test]
    fn reverse_uses_snapshot_until_sync() {
        let mut norm = ActNorm::new(&VarMap::new(), "an", 2, &Device::Cpu).unwrap();
        let (x, mask) = input();
        norm.initialize(&x, &mask, 1.0).unwrap();

        let (stale, _) = norm.reverse(&x, &mask).unwrap();
        assert_eq!(stale.to_vec3::<f32>().unwrap(), x.to_vec3::<f32>().unwrap());

        norm.sync().unwrap();
        norm.sync().unwrap();
        let (fresh, _) = norm.reverse(&x, &mask).unwrap();
        assert_ne!(fresh.to_vec3::<f32>().unwrap(), x.to_vec3::<f32>().unwrap());
    }

    #[test]
    fn logdet_counts_only_real_elements() {
        let norm = ActNorm::new(&VarMap::new(), "an", 2, &Device::Cpu).unwrap();
        norm.log_scale
            .set(&Tensor::new(&[0.5f32, 0.25], &Device::Cpu).unwrap())
            .unwrap();
        let (x, mask) = input();
        let (_, logdet) = norm.forward(&x, &mask).unwrap();
        let ld = logdet.to_vec1::<f32>().unwrap();
        assert!((ld[0] - 2.0 * 0.75).abs() < 1e-6);
        assert!((ld[1] - 3.0 * 0.75).abs() < 1e-6);
    }

    #[test]
    fn initialize_rejects_nonpositive_scale() {
        let norm = ActNorm::new(&VarMap::new(), "an", 2, &Device::Cpu).unwrap();
        let (x, mask) = input();
        assert!(norm.initialize(&x, &mask, 0.0).is_err());
    }
}
