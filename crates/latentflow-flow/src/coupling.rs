//! Conditional affine coupling.
//!
//! The feature axis is split into halves. One half (`a`) and the pooled
//! source context feed a conditioner MLP that produces a log-scale and a
//! shift for the other half (`b`). A flipped coupling swaps the roles of the
//! two halves, so stacking alternating couplings transforms every feature
//! without permuting the layout.
//!
//! ```text
//! [a · mask_a, ctx] → Linear → ReLU → Linear → (raw_s, t)
//! log_s = tanh(raw_s) · mask_b        t = t · mask_b
//! scoring:    b' = b · exp(log_s) + t
//! generative: b  = (b' − t) · exp(−log_s)
//! ```
//!
//! Both directions report `Σ log_s`, the scoring-direction log-determinant.
//!
//! The conditioner's output layer starts near zero, so a freshly built
//! coupling is close to the identity.

use candle_core::{Tensor, D};
use candle_nn::{linear, Init, Linear, Module, VarBuilder};
use latentflow_core::LatentError;

/// Bound of the uniform init of the conditioner's output weights.
const OUTPUT_INIT_BOUND: f64 = 0.01;

/// Affine coupling layer conditioned on a per-example context vector.
pub struct AffineCoupling {
    conditioner_in: Linear,
    conditioner_out: Linear,
    features: usize,
    flipped: bool,
}

impl std::fmt::Debug for AffineCoupling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AffineCoupling({}, flipped={})", self.features, self.flipped)
    }
}

impl AffineCoupling {
    /// Creates a coupling over `features` (even) conditioned on a
    /// `context_features`-wide context. A `flipped` coupling transforms the
    /// first half conditioned on the second.
    ///
    /// # Errors
    ///
    /// Returns [`LatentError::Config`] for an odd feature count and
    /// [`LatentError::Tensor`] if parameter creation fails.
    pub fn new(
        vb: VarBuilder,
        features: usize,
        context_features: usize,
        hidden_features: usize,
        flipped: bool,
    ) -> Result<Self, LatentError> {
        if features % 2 != 0 {
            return Err(LatentError::Config {
                message: format!("AffineCoupling: features must be even, got {features}"),
            });
        }
        let map_err = |e: candle_core::Error| LatentError::Tensor {
            message: format!("AffineCoupling::new: {e}"),
        };

        let half = features / 2;
        let conditioner_in = linear(half + context_features, hidden_features, vb.pp("cond_in"))
            .map_err(map_err)?;
        let vb_out = vb.pp("cond_out");
        let weight = vb_out
            .get_with_hints(
                (features, hidden_features),
                "weight",
                Init::Uniform {
                    lo: -OUTPUT_INIT_BOUND,
                    up: OUTPUT_INIT_BOUND,
                },
            )
            .map_err(map_err)?;
        let bias = vb_out
            .get_with_hints(features, "bias", Init::Const(0.0))
            .map_err(map_err)?;
        let conditioner_out = Linear::new(weight, Some(bias));

        Ok(Self {
            conditioner_in,
            conditioner_out,
            features,
            flipped,
        })
    }

    /// Computes the masked `(log_s, t)` for the second half.
    fn transform_params(
        &self,
        x_a: &Tensor,
        mask_a: &Tensor,
        mask_b: &Tensor,
        ctx: &Tensor,
    ) -> Result<(Tensor, Tensor), LatentError> {
        let map_err = |e: candle_core::Error| LatentError::Tensor {
            message: format!("AffineCoupling::transform_params: {e}"),
        };

        let (batch, length, _) = x_a.dims3().map_err(map_err)?;
        let context_features = ctx.dim(D::Minus1).map_err(map_err)?;
        let ctx = ctx
            .unsqueeze(1)
            .and_then(|c| c.broadcast_as((batch, length, context_features)))
            .map_err(map_err)?;
        let input = x_a
            .mul(mask_a)
            .and_then(|a| Tensor::cat(&[&a, &ctx], 2))
            .map_err(map_err)?;

        let hidden = self
            .conditioner_in
            .forward(&input)
            .and_then(|h| h.relu())
            .map_err(map_err)?;
        let out = self.conditioner_out.forward(&hidden).map_err(map_err)?;

        let half = self.features / 2;
        let log_s = out
            .narrow(2, 0, half)
            .and_then(|s| s.tanh())
            .and_then(|s| s.mul(mask_b))
            .map_err(map_err)?;
        let shift = out
            .narrow(2, half, half)
            .and_then(|t| t.mul(mask_b))
            .map_err(map_err)?;
        Ok((log_s, shift))
    }

    /// Splits into `(conditioning, transformed)` halves.
    fn split(&self, t: &Tensor) -> Result<(Tensor, Tensor), LatentError> {
        let map_err = |e: candle_core::Error| LatentError::Tensor {
            message: format!("AffineCoupling::split: {e}"),
        };
        let half = self.features / 2;
        let first = t.narrow(2, 0, half).map_err(map_err)?;
        let second = t.narrow(2, half, half).map_err(map_err)?;
        if self.flipped {
            Ok((second, first))
        } else {
            Ok((first, second))
        }
    }

    /// Inverse of [`Self::split`].
    fn join(&self, a: &Tensor, b: &Tensor) -> Result<Tensor, LatentError> {
        let parts = if self.flipped { [b, a] } else { [a, b] };
        Tensor::cat(&parts, 2).map_err(|e| LatentError::Tensor {
            message: format!("AffineCoupling::join: {e}"),
        })
    }

    /// Scoring direction. Returns the output and `[batch]` log-determinant.
    pub fn forward(
        &self,
        x: &Tensor,
        mask: &Tensor,
        ctx: &Tensor,
    ) -> Result<(Tensor, Tensor), LatentError> {
        let map_err = |e: candle_core::Error| LatentError::Tensor {
            message: format!("AffineCoupling::forward: {e}"),
        };

        let (x_a, x_b) = self.split(x)?;
        let (mask_a, mask_b) = self.split(mask)?;
        let (log_s, shift) = self.transform_params(&x_a, &mask_a, &mask_b, ctx)?;

        let y_b = log_s
            .exp()
            .and_then(|scale| x_b.mul(&scale))
            .and_then(|t| t.add(&shift))
            .map_err(map_err)?;
        let y = self.join(&x_a, &y_b)?;
        let logdet = log_s.sum((1, 2)).map_err(map_err)?;
        Ok((y, logdet))
    }

    /// Generative direction. Returns the output and the scoring-direction
    /// log-determinant at that output.
    pub fn reverse(
        &self,
        y: &Tensor,
        mask: &Tensor,
        ctx: &Tensor,
    ) -> Result<(Tensor, Tensor), LatentError> {
        let map_err = |e: candle_core::Error| LatentError::Tensor {
            message: format!("AffineCoupling::reverse: {e}"),
        };

        let (y_a, y_b) = self.split(y)?;
        let (mask_a, mask_b) = self.split(mask)?;
        let (log_s, shift) = self.transform_params(&y_a, &mask_a, &mask_b, ctx)?;

        let x_b = log_s
            .neg()
            .and_then(|t| t.exp())
            .and_then(|inv| y_b.sub(&shift).and_then(|t| t.mul(&inv)))
            .map_err(map_err)?;
        let x = self.join(&y_a, &x_b)?;
        let logdet = log_s.sum((1, 2)).map_err(map_err)?;
        Ok((x, logdet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use latentflow_core::noise::standard_normal;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn setup_with(flipped: bool) -> (AffineCoupling, Tensor, Tensor, Tensor) {
        let device = Device::Cpu;
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &device);
        let coupling = AffineCoupling::new(vb, 6, 5, 16, flipped).unwrap();

        let mut rng = StdRng::seed_from_u64(11);
        let x = standard_normal(&mut rng, (2, 4, 6), &device).unwrap();
        let ctx = standard_normal(&mut rng, (2, 5), &device).unwrap();
        let mask = Tensor::new(&[[1f32, 1.0, 1.0, 0.0], [1.0, 1.0, 0.0, 0.0]], &device)
            .unwrap()
            .unsqueeze(2)
            .unwrap()
            .broadcast_as((2, 4, 6))
            .unwrap()
            .contiguous()
            .unwrap();
        (coupling, x, mask, ctx)
    }

    fn setup() -> (AffineCoupling, Tensor, Tensor, Tensor) {
        setup_with(false)
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap()
    }

    #[test]
    fn reverse_inverts_forward() {
        let (coupling, x, mask, ctx) = setup();
        let (y, ld_fwd) = coupling.forward(&x, &mask, &ctx).unwrap();
        let (back, ld_rev) = coupling.reverse(&y, &mask, &ctx).unwrap();
        assert!(max_abs_diff(&back, &x) < 1e-5);
        assert!(max_abs_diff(&ld_fwd, &ld_rev) < 1e-5);
    }

    #[test]
    fn flipped_reverse_inverts_forward() {
        let (coupling, x, mask, ctx) = setup_with(true);
        let (y, ld_fwd) = coupling.forward(&x, &mask, &ctx).unwrap();
        let (back, ld_rev) = coupling.reverse(&y, &mask, &ctx).unwrap();
        assert!(max_abs_diff(&back, &x) < 1e-5);
        assert!(max_abs_diff(&ld_fwd, &ld_rev) < 1e-5);
    }

    #[test]
    fn flipped_keeps_second_half() {
        let (coupling, x, mask, ctx) = setup_with(true);
        let (y, _) = coupling.forward(&x, &mask, &ctx).unwrap();
        let xb = x.narrow(2, 3, 3).unwrap().to_vec3::<f32>().unwrap();
        let yb = y.narrow(2, 3, 3).unwrap().to_vec3::<f32>().unwrap();
        assert_eq!(xb, yb);
    }

    #[test]
    fn masked_positions_pass_through() {
        let (coupling, x, mask, ctx) = setup();
        let (y, _) = coupling.forward(&x, &mask, &ctx).unwrap();
        let x = x.to_vec3::<f32>().unwrap();
        let y = y.to_vec3::<f32>().unwrap();
        assert_eq!(x[0][3], y[0][3]);
        assert_eq!(x[1][2], y[1][2]);
        assert_eq!(x[1][3], y[1][3]);
    }

    #[test]
    fn first_half_is_unchanged() {
        let (coupling, x, mask, ctx) = setup();
        let (y, _) = coupling.forward(&x, &mask, &ctx).unwrap();
        let xa = x.narrow(2, 0, 3).unwrap().to_vec3::<f32>().unwrap();
        let ya = y.narrow(2, 0, 3).unwrap().to_vec3::<f32>().unwrap();
        assert_eq!(xa, ya);
    }

    #[test]
    fn fresh_coupling_is_near_identity() {
        let (coupling, x, mask, ctx) = setup();
        let (y, logdet) = coupling.forward(&x, &mask, &ctx).unwrap();
        assert!(max_abs_diff(&y, &x) < 1.0);
        let ld = logdet.to_vec1::<f32>().unwrap();
        assert!(ld.iter().all(|v| v.abs() < 3.0));
    }

    #[test]
    fn output_layer_starts_small() {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &Device::Cpu);
        AffineCoupling::new(vb, 6, 5, 16, false).unwrap();

        let data = var_map.data().lock().unwrap();
        let weight = data["cond_out.weight"].as_tensor();
        let bias = data["cond_out.bias"].as_tensor();
        assert_eq!(weight.dims(), &[6, 16]);
        let max_w = weight.abs().unwrap().flatten_all().unwrap().max(0).unwrap();
        assert!(max_w.to_scalar::<f32>().unwrap() <= OUTPUT_INIT_BOUND as f32 + 1e-6);
        assert!(bias.to_vec1::<f32>().unwrap().iter().all(|&b| b == 0.0));
    }

    #[test]
    fn odd_features_rejected() {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &Device::Cpu);
        assert!(AffineCoupling::new(vb, 5, 4, 8, false).is_err());
    }
}
