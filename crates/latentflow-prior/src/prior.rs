//! The flow-backed latent prior.
//!
//! ## Sampling Protocol
//!
//! 1. Pad the requested length up to the padding unit (the flow squeezes
//!    pairs of positions, so it only accepts multiples of its length unit)
//! 2. Mask every position at or beyond the requested length
//! 3. Draw `[rows, nsamples, max_length, features]` standard-normal noise,
//!    zeroing sample 0 when `include_zero` is set
//! 4. Flatten samples into the batch axis and replicate the source context
//! 5. Decode, then trim the padding positions off the latent code

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use latentflow_core::mask::{expand_rows, length_mask};
use latentflow_core::noise::standard_normal_vec;
use latentflow_core::padding::round_up_to_unit;
use latentflow_core::params::take_section;
use latentflow_core::{LatentError, ParamMap, LENGTH_UNIT, LOG_2PI};
use latentflow_flow::Flow;
use rand::RngCore;

use crate::sample::{PriorSample, SampleConfig, TargetLength};
use crate::LatentPrior;

/// Log-density of `epsilon` under a standard normal, summed over the real
/// positions of `tgt_mask` and every feature: `[batch]`.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use latentflow_prior::prior::standard_normal_log_prob;
///
/// let device = Device::Cpu;
/// let eps = Tensor::new(&[[[0f32], [5.0]]], &device).unwrap();
/// let mask = Tensor::new(&[[1f32, 0.0]], &device).unwrap();
/// let lp = standard_normal_log_prob(&eps, &mask).unwrap().to_vec1::<f32>().unwrap();
/// let expected = -0.5 * (2.0 * std::f32::consts::PI).ln();
/// assert!((lp[0] - expected).abs() < 1e-6);
/// ```
pub fn standard_normal_log_prob(epsilon: &Tensor, tgt_mask: &Tensor) -> Result<Tensor, LatentError> {
    let map_err = |e: candle_core::Error| LatentError::Tensor {
        message: format!("standard_normal_log_prob: {e}"),
    };

    let mask = tgt_mask.unsqueeze(2).map_err(map_err)?;
    epsilon
        .sqr()
        .and_then(|t| t.affine(1.0, LOG_2PI))
        .and_then(|t| t.broadcast_mul(&mask))
        .and_then(|t| t.sum((1, 2)))
        .and_then(|t| t.affine(-0.5, 0.0))
        .map_err(map_err)
}

/// Latent prior backed by an invertible flow.
///
/// The flow must have its `inverse` flag set: `fwdpass` has to be the
/// generative (noise → latent) direction.
///
/// # Example
///
/// ```
/// use candle_core::Device;
/// use candle_nn::VarMap;
/// use latentflow_flow::ConditionalFlow;
/// use latentflow_prior::{LatentPrior, Prior};
/// use serde_json::json;
///
/// let params = json!({"flow": {"features": 8, "src_features": 16, "levels": 3}})
///     .as_object()
///     .cloned()
///     .unwrap();
/// let prior: Prior<ConditionalFlow> =
///     Prior::from_params(params, &VarMap::new(), &Device::Cpu).unwrap();
/// assert_eq!(prior.features(), 8);
/// assert_eq!(prior.length_unit(), 4);
/// ```
#[derive(Debug)]
pub struct Prior<F: Flow> {
    flow: F,
    length_unit: usize,
    features: usize,
}

impl<F: Flow> Prior<F> {
    /// Wraps `flow`.
    ///
    /// # Panics
    ///
    /// Panics if `flow.inverse()` is false: such a flow cannot generate.
    /// Also panics if the flow is too deep for its length unit to fit in a
    /// `usize`.
    pub fn new(flow: F) -> Self {
        assert!(flow.inverse(), "prior flow should have inverse mode");
        let squeeze_unit = u32::try_from(flow.levels().saturating_sub(1))
            .ok()
            .and_then(|shift| 1usize.checked_shl(shift));
        let Some(squeeze_unit) = squeeze_unit else {
            panic!("prior flow has too many levels: {}", flow.levels());
        };
        let length_unit = 2usize.max(squeeze_unit);
        let features = flow.features();
        Self {
            flow,
            length_unit,
            features,
        }
    }

    /// Builds a prior from a configuration mapping.
    ///
    /// The `flow` section is removed from `params` and passed to
    /// [`Flow::from_params`]; the remaining keys are left for prior variants.
    ///
    /// # Errors
    ///
    /// Returns [`LatentError::MissingParam`] if `flow` is absent, and any
    /// error raised while building the flow.
    ///
    /// # Panics
    ///
    /// Panics if the configured flow is not in inverse mode.
    pub fn from_params(
        mut params: ParamMap,
        var_map: &VarMap,
        device: &Device,
    ) -> Result<Self, LatentError> {
        let flow_params = take_section(&mut params, "flow")?;
        let flow = F::from_params(&flow_params, var_map, device)?;
        let prior = Self::new(flow);
        tracing::info!(
            features = prior.features,
            length_unit = prior.length_unit,
            "built flow prior"
        );
        Ok(prior)
    }

    /// Returns the wrapped flow.
    pub fn flow(&self) -> &F {
        &self.flow
    }

    /// Granularity sampled lengths are padded to: the fixed [`LENGTH_UNIT`],
    /// or the flow's length unit when that is coarser.
    pub fn padding_unit(&self) -> usize {
        LENGTH_UNIT.max(self.length_unit)
    }

    /// Samples `nsamples` codes for each row at `lengths[row]`.
    fn sample_rows(
        &self,
        src: &Tensor,
        src_mask: &Tensor,
        lengths: &[usize],
        length_log_probs: Option<Tensor>,
        config: &SampleConfig,
        rng: &mut dyn RngCore,
    ) -> Result<PriorSample, LatentError> {
        let map_err = |e: candle_core::Error| LatentError::Tensor {
            message: format!("Prior::sample: {e}"),
        };

        let nsamples = config.nsamples;
        if nsamples == 0 {
            return Err(LatentError::InvalidArgument {
                message: "Prior::sample: nsamples must be at least 1".to_string(),
            });
        }
        let length = lengths.iter().copied().max().unwrap_or(0);
        if length == 0 {
            return Err(LatentError::InvalidArgument {
                message: "Prior::sample: target length must be at least 1".to_string(),
            });
        }

        let rows = lengths.len();
        let max_length = round_up_to_unit(length, self.padding_unit());
        let device = src.device();

        tracing::debug!(
            rows,
            nsamples,
            length,
            max_length,
            tau = config.tau,
            include_zero = config.include_zero,
            "sampling prior"
        );

        // Padding positions are masked against the requested length, not max_length.
        let tgt_mask = length_mask(lengths, max_length, device)?;

        // [rows, nsamples, max_length, features], drawn row-major and viewed
        // directly as [rows * nsamples, max_length, features].
        let slot = max_length * self.features;
        let mut data = standard_normal_vec(rng, rows * nsamples * slot);
        if config.include_zero {
            for row in 0..rows {
                let start = row * nsamples * slot;
                data[start..start + slot].fill(0.0);
            }
        }
        let epsilon = Tensor::from_vec(data, (rows * nsamples, max_length, self.features), device)
            .map_err(map_err)?;

        let (src, src_mask, tgt_mask, length_log_probs) = if nsamples > 1 {
            (
                expand_rows(src, nsamples)?,
                expand_rows(src_mask, nsamples)?,
                expand_rows(&tgt_mask, nsamples)?,
                length_log_probs
                    .map(|lp| expand_rows(&lp, nsamples))
                    .transpose()?,
            )
        } else {
            (src.clone(), src_mask.clone(), tgt_mask, length_log_probs)
        };

        let (z, log_probs) = self.decode(&epsilon, &tgt_mask, &src, &src_mask)?;

        let z = z.narrow(1, 0, length).map_err(map_err)?;
        let tgt_mask = tgt_mask.narrow(1, 0, length).map_err(map_err)?;
        let lengths = lengths
            .iter()
            .flat_map(|&l| std::iter::repeat(l).take(nsamples))
            .collect();

        Ok(PriorSample {
            z,
            log_probs,
            tgt_mask,
            src,
            src_mask,
            lengths,
            length_log_probs,
        })
    }
}

impl<F: Flow> LatentPrior for Prior<F> {
    fn features(&self) -> usize {
        self.features
    }

    fn length_unit(&self) -> usize {
        self.length_unit
    }

    fn decode(
        &self,
        epsilon: &Tensor,
        tgt_mask: &Tensor,
        src: &Tensor,
        src_mask: &Tensor,
    ) -> Result<(Tensor, Tensor), LatentError> {
        let (z, logdet) = self.flow.fwdpass(epsilon, tgt_mask, src, src_mask)?;
        let log_probs = standard_normal_log_prob(epsilon, tgt_mask)?
            .add(&logdet)
            .map_err(|e| LatentError::Tensor {
                message: format!("Prior::decode: {e}"),
            })?;
        Ok((z, log_probs))
    }

    fn sample(
        &self,
        src: &Tensor,
        src_mask: &Tensor,
        target: TargetLength<'_>,
        config: &SampleConfig,
        rng: &mut dyn RngCore,
    ) -> Result<PriorSample, LatentError> {
        let batch = src.dim(0).map_err(|e| LatentError::Tensor {
            message: format!("Prior::sample: {e}"),
        })?;

        match target {
            TargetLength::Fixed(length) => {
                let lengths = vec![length; batch];
                self.sample_rows(src, src_mask, &lengths, None, config, rng)
            }
            TargetLength::Predicted {
                predictor,
                nlengths,
            } => {
                if nlengths == 0 {
                    return Err(LatentError::InvalidArgument {
                        message: "Prior::sample: nlengths must be at least 1".to_string(),
                    });
                }
                let prediction = predictor.predict(src, src_mask, nlengths)?;
                if prediction.lengths.len() != batch * nlengths {
                    return Err(LatentError::InvalidArgument {
                        message: format!(
                            "Prior::sample: predictor returned {} lengths for {batch} examples × {nlengths}",
                            prediction.lengths.len()
                        ),
                    });
                }
                let src = expand_rows(src, nlengths)?;
                let src_mask = expand_rows(src_mask, nlengths)?;
                self.sample_rows(
                    &src,
                    &src_mask,
                    &prediction.lengths,
                    Some(prediction.log_probs),
                    config,
                    rng,
                )
            }
        }
    }

    fn log_probability(
        &self,
        z: &Tensor,
        tgt_mask: &Tensor,
        src: &Tensor,
        src_mask: &Tensor,
    ) -> Result<Tensor, LatentError> {
        let (epsilon, logdet) = self.flow.bwdpass(z, tgt_mask, src, src_mask)?;
        standard_normal_log_prob(&epsilon, tgt_mask)?
            .add(&logdet)
            .map_err(|e| LatentError::Tensor {
                message: format!("Prior::log_probability: {e}"),
            })
    }

    fn init(
        &mut self,
        z: &Tensor,
        tgt_mask: &Tensor,
        src: &Tensor,
        src_mask: &Tensor,
        init_scale: f64,
    ) -> Result<(Tensor, Tensor), LatentError> {
        self.flow.init(z, tgt_mask, src, src_mask, init_scale)
    }

    fn sync(&mut self) -> Result<(), LatentError> {
        self.flow.sync()
    }
}
