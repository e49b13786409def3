//! Multi-scale conditional flow.
//!
//! ```text
//! level 0: [b, L,     f ]  ── steps ──┐
//!                                     squeeze
//! level 1: [b, L/2,   2f]  ── steps ──┐
//!                                     squeeze
//! level 2: [b, L/4,   4f]  ── steps ──  unsqueeze ×2 → [b, L, f]
//! ```
//!
//! Each step is ActNorm → affine coupling, with couplings alternating which
//! half of the features they transform. The element mask is squeezed together
//! with the data, so every layer sees exactly which elements are padding, and
//! the feature layout is never permuted.

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use latentflow_core::{LatentError, ParamMap};

use crate::actnorm::ActNorm;
use crate::config::FlowConfig;
use crate::coupling::AffineCoupling;
use crate::shape::{element_mask, pooled_context, squeeze, unsqueeze};
use crate::Flow;

/// One ActNorm → coupling step.
struct FlowStep {
    actnorm: ActNorm,
    coupling: AffineCoupling,
}

impl FlowStep {
    fn forward(
        &self,
        x: &Tensor,
        mask: &Tensor,
        ctx: &Tensor,
        init_scale: Option<f64>,
    ) -> Result<(Tensor, Tensor), LatentError> {
        let map_err = |e: candle_core::Error| LatentError::Tensor {
            message: format!("FlowStep::forward: {e}"),
        };

        if let Some(scale) = init_scale {
            self.actnorm.initialize(x, mask, scale)?;
        }
        let (x, ld_norm) = self.actnorm.forward(x, mask)?;
        let (x, ld_coupling) = self.coupling.forward(&x, mask, ctx)?;
        let logdet = ld_norm.add(&ld_coupling).map_err(map_err)?;
        Ok((x, logdet))
    }

    fn reverse(
        &self,
        y: &Tensor,
        mask: &Tensor,
        ctx: &Tensor,
    ) -> Result<(Tensor, Tensor), LatentError> {
        let map_err = |e: candle_core::Error| LatentError::Tensor {
            message: format!("FlowStep::reverse: {e}"),
        };

        let (y, ld_coupling) = self.coupling.reverse(y, mask, ctx)?;
        let (x, ld_norm) = self.actnorm.reverse(&y, mask)?;
        let logdet = ld_norm.add(&ld_coupling).map_err(map_err)?;
        Ok((x, logdet))
    }
}

/// Masked multi-scale affine-coupling flow conditioned on the pooled source
/// encoding.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use candle_nn::VarMap;
/// use latentflow_flow::{ConditionalFlow, Flow, FlowConfig};
///
/// let device = Device::Cpu;
/// let config = FlowConfig { features: 4, src_features: 6, hidden_features: 8, levels: 2, ..FlowConfig::default() };
/// let flow = ConditionalFlow::new(config, &VarMap::new(), &device).unwrap();
///
/// let eps = Tensor::zeros((1, 4, 4), candle_core::DType::F32, &device).unwrap();
/// let tgt_mask = Tensor::ones((1, 4), candle_core::DType::F32, &device).unwrap();
/// let src = Tensor::ones((1, 3, 6), candle_core::DType::F32, &device).unwrap();
/// let src_mask = Tensor::ones((1, 3), candle_core::DType::F32, &device).unwrap();
///
/// let (z, logdet) = flow.fwdpass(&eps, &tgt_mask, &src, &src_mask).unwrap();
/// assert_eq!(z.dims(), &[1, 4, 4]);
/// assert_eq!(logdet.dims(), &[1]);
/// ```
pub struct ConditionalFlow {
    levels: Vec<Vec<FlowStep>>,
    config: FlowConfig,
}

impl std::fmt::Debug for ConditionalFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ConditionalFlow(features={}, levels={}×{}, src={}, hidden={}, inverse={})",
            self.config.features,
            self.config.levels,
            self.config.steps_per_level,
            self.config.src_features,
            self.config.hidden_features,
            self.config.inverse
        )
    }
}

impl ConditionalFlow {
    /// Builds a flow, registering its parameters in `var_map` under `flow.*`.
    ///
    /// # Errors
    ///
    /// Returns [`LatentError::Config`] if the configuration is invalid and
    /// [`LatentError::Tensor`] if parameter creation fails.
    pub fn new(config: FlowConfig, var_map: &VarMap, device: &Device) -> Result<Self, LatentError> {
        config.validate()?;
        let vb = VarBuilder::from_varmap(var_map, DType::F32, device);

        let mut levels = Vec::with_capacity(config.levels);
        for level in 0..config.levels {
            let features = config.features_at(level);
            let mut steps = Vec::with_capacity(config.steps_per_level);
            for step in 0..config.steps_per_level {
                let prefix = format!("flow.level{level}.step{step}");
                let actnorm = ActNorm::new(var_map, &format!("{prefix}.actnorm"), features, device)?;
                let coupling = AffineCoupling::new(
                    vb.pp(format!("{prefix}.coupling")),
                    features,
                    config.src_features,
                    config.hidden_features,
                    step % 2 == 1,
                )?;
                steps.push(FlowStep { actnorm, coupling });
            }
            levels.push(steps);
        }

        tracing::info!(
            features = config.features,
            levels = config.levels,
            steps_per_level = config.steps_per_level,
            "built conditional flow"
        );

        Ok(Self { levels, config })
    }

    /// Returns the flow configuration.
    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    fn check_input(&self, input: &Tensor) -> Result<(usize, usize), LatentError> {
        let (batch, length, features) = input.dims3().map_err(|e| LatentError::Tensor {
            message: format!("ConditionalFlow: {e}"),
        })?;
        if features != self.config.features {
            return Err(LatentError::InvalidArgument {
                message: format!(
                    "ConditionalFlow: expected {} features, got {features}",
                    self.config.features
                ),
            });
        }
        let unit = self.config.squeeze_unit();
        if length % unit != 0 {
            return Err(LatentError::InvalidLength { length, unit });
        }
        Ok((batch, length))
    }

    /// Latent → noise. With `init_scale` set, every ActNorm is initialized on
    /// its own input before it is applied.
    fn scoring(
        &self,
        z: &Tensor,
        tgt_mask: &Tensor,
        src: &Tensor,
        src_mask: &Tensor,
        init_scale: Option<f64>,
    ) -> Result<(Tensor, Tensor), LatentError> {
        let map_err = |e: candle_core::Error| LatentError::Tensor {
            message: format!("ConditionalFlow::scoring: {e}"),
        };

        let (batch, _) = self.check_input(z)?;
        let ctx = pooled_context(src, src_mask)?;
        let mut x = z.clone();
        let mut mask = element_mask(tgt_mask, self.config.features)?;
        let mut logdet = Tensor::zeros(batch, DType::F32, z.device()).map_err(map_err)?;

        for (level, steps) in self.levels.iter().enumerate() {
            if level > 0 {
                x = squeeze(&x)?;
                mask = squeeze(&mask)?;
            }
            tracing::trace!(level, shape = ?x.dims(), "scoring level");
            for step in steps {
                let (next, ld) = step.forward(&x, &mask, &ctx, init_scale)?;
                x = next;
                logdet = logdet.add(&ld).map_err(map_err)?;
            }
        }
        for _ in 1..self.levels.len() {
            x = unsqueeze(&x)?;
        }
        Ok((x, logdet))
    }

    /// Noise → latent, the exact inverse of [`Self::scoring`].
    fn generative(
        &self,
        eps: &Tensor,
        tgt_mask: &Tensor,
        src: &Tensor,
        src_mask: &Tensor,
    ) -> Result<(Tensor, Tensor), LatentError> {
        let map_err = |e: candle_core::Error| LatentError::Tensor {
            message: format!("ConditionalFlow::generative: {e}"),
        };

        let (batch, _) = self.check_input(eps)?;
        let ctx = pooled_context(src, src_mask)?;
        let mut x = eps.clone();
        let mut mask = element_mask(tgt_mask, self.config.features)?;
        for _ in 1..self.levels.len() {
            x = squeeze(&x)?;
            mask = squeeze(&mask)?;
        }
        let mut logdet = Tensor::zeros(batch, DType::F32, eps.device()).map_err(map_err)?;

        for (level, steps) in self.levels.iter().enumerate().rev() {
            tracing::trace!(level, shape = ?x.dims(), "generative level");
            for step in steps.iter().rev() {
                let (next, ld) = step.reverse(&x, &mask, &ctx)?;
                x = next;
                logdet = logdet.add(&ld).map_err(map_err)?;
            }
            if level > 0 {
                x = unsqueeze(&x)?;
                mask = unsqueeze(&mask)?;
            }
        }
        Ok((x, logdet))
    }
}

impl Flow for ConditionalFlow {
    fn fwdpass(
        &self,
        input: &Tensor,
        tgt_mask: &Tensor,
        src: &Tensor,
        src_mask: &Tensor,
    ) -> Result<(Tensor, Tensor), LatentError> {
        if self.config.inverse {
            self.generative(input, tgt_mask, src, src_mask)
        } else {
            self.scoring(input, tgt_mask, src, src_mask, None)
        }
    }

    fn bwdpass(
        &self,
        input: &Tensor,
        tgt_mask: &Tensor,
        src: &Tensor,
        src_mask: &Tensor,
    ) -> Result<(Tensor, Tensor), LatentError> {
        if self.config.inverse {
            self.scoring(input, tgt_mask, src, src_mask, None)
        } else {
            self.generative(input, tgt_mask, src, src_mask)
        }
    }

    /// Initialization always calibrates on latent codes, i.e. it runs the
    /// scoring direction whichever pass that is for this flow.
    fn init(
        &mut self,
        input: &Tensor,
        tgt_mask: &Tensor,
        src: &Tensor,
        src_mask: &Tensor,
        init_scale: f64,
    ) -> Result<(Tensor, Tensor), LatentError> {
        tracing::info!(init_scale, shape = ?input.dims(), "data-dependent flow initialization");
        self.scoring(input, tgt_mask, src, src_mask, Some(init_scale))
    }

    fn sync(&mut self) -> Result<(), LatentError> {
        for step in self.levels.iter_mut().flatten() {
            step.actnorm.sync()?;
        }
        Ok(())
    }

    fn levels(&self) -> usize {
        self.config.levels
    }

    fn features(&self) -> usize {
        self.config.features
    }

    fn inverse(&self) -> bool {
        self.config.inverse
    }

    fn from_params(params: &ParamMap, var_map: &VarMap, device: &Device) -> Result<Self, LatentError> {
        let config = FlowConfig::from_params(params)?;
        Self::new(config, var_map, device)
    }
}
