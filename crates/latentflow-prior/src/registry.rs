//! Name → prior variant lookup for building priors from configuration.
//!
//! The registry is an ordinary value the caller owns and passes where
//! priors are built; nothing is registered globally.

use std::collections::HashMap;

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use latentflow_core::{LatentError, ParamMap};
use latentflow_flow::ConditionalFlow;
use rand::RngCore;

use crate::prior::Prior;
use crate::sample::{PriorSample, SampleConfig, TargetLength};
use crate::LatentPrior;

/// The prior variants this crate can build.
///
/// # Example
///
/// ```
/// use latentflow_prior::PriorVariant;
///
/// assert_eq!(PriorVariant::Normal.label(), "normal");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorVariant {
    /// Standard-normal base pushed through a [`ConditionalFlow`].
    Normal,
}

impl PriorVariant {
    /// Name the variant is registered under by default.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
        }
    }

    /// Builds a prior of this variant from its configuration mapping.
    ///
    /// # Errors
    ///
    /// Propagates configuration and tensor errors from the variant's
    /// constructor.
    pub fn build(
        &self,
        params: ParamMap,
        var_map: &VarMap,
        device: &Device,
    ) -> Result<AnyPrior, LatentError> {
        match self {
            Self::Normal => Ok(AnyPrior::Normal(Prior::from_params(params, var_map, device)?)),
        }
    }
}

/// A built prior of any registered variant.
#[derive(Debug)]
pub enum AnyPrior {
    /// See [`PriorVariant::Normal`].
    Normal(Prior<ConditionalFlow>),
}

impl LatentPrior for AnyPrior {
    fn features(&self) -> usize {
        match self {
            Self::Normal(p) => p.features(),
        }
    }

    fn length_unit(&self) -> usize {
        match self {
            Self::Normal(p) => p.length_unit(),
        }
    }

    fn decode(
        &self,
        epsilon: &Tensor,
        tgt_mask: &Tensor,
        src: &Tensor,
        src_mask: &Tensor,
    ) -> Result<(Tensor, Tensor), LatentError> {
        match self {
            Self::Normal(p) => p.decode(epsilon, tgt_mask, src, src_mask),
        }
    }

    fn sample(
        &self,
        src: &Tensor,
        src_mask: &Tensor,
        target: TargetLength<'_>,
        config: &SampleConfig,
        rng: &mut dyn RngCore,
    ) -> Result<PriorSample, LatentError> {
        match self {
            Self::Normal(p) => p.sample(src, src_mask, target, config, rng),
        }
    }

    fn log_probability(
        &self,
        z: &Tensor,
        tgt_mask: &Tensor,
        src: &Tensor,
        src_mask: &Tensor,
    ) -> Result<Tensor, LatentError> {
        match self {
            Self::Normal(p) => p.log_probability(z, tgt_mask, src, src_mask),
        }
    }

    fn init(
        &mut self,
        z: &Tensor,
        tgt_mask: &Tensor,
        src: &Tensor,
        src_mask: &Tensor,
        init_scale: f64,
    ) -> Result<(Tensor, Tensor), LatentError> {
        match self {
            Self::Normal(p) => p.init(z, tgt_mask, src, src_mask, init_scale),
        }
    }

    fn sync(&mut self) -> Result<(), LatentError> {
        match self {
            Self::Normal(p) => p.sync(),
        }
    }
}

/// Maps configuration names to prior variants.
///
/// # Example
///
/// ```
/// use latentflow_prior::{PriorRegistry, PriorVariant};
///
/// let registry = PriorRegistry::with_defaults();
/// assert_eq!(registry.by_name("normal").unwrap(), PriorVariant::Normal);
/// assert!(registry.by_name("glow").is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct PriorRegistry {
    variants: HashMap<String, PriorVariant>,
}

impl PriorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in variant under its label.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(PriorVariant::Normal.label(), PriorVariant::Normal);
        registry
    }

    /// Registers `variant` under `name`, replacing and returning any
    /// variant previously registered there.
    pub fn register(&mut self, name: &str, variant: PriorVariant) -> Option<PriorVariant> {
        let previous = self.variants.insert(name.to_string(), variant);
        tracing::debug!(name, variant = variant.label(), replaced = previous.is_some(), "registered prior");
        previous
    }

    /// Looks up the variant registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`LatentError::UnknownPrior`] if nothing is registered there.
    pub fn by_name(&self, name: &str) -> Result<PriorVariant, LatentError> {
        self.variants
            .get(name)
            .copied()
            .ok_or_else(|| LatentError::UnknownPrior {
                name: name.to_string(),
            })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.variants.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Builds the prior registered under `name` from `params`.
    ///
    /// # Errors
    ///
    /// Returns [`LatentError::UnknownPrior`] for an unregistered name, or
    /// any error raised by the variant's constructor.
    pub fn build(
        &self,
        name: &str,
        params: ParamMap,
        var_map: &VarMap,
        device: &Device,
    ) -> Result<AnyPrior, LatentError> {
        self.by_name(name)?.build(params, var_map, device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> ParamMap {
        json!({"flow": {"features": 4, "src_features": 6, "hidden_features": 8, "levels": 2, "steps_per_level": 1}})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn empty_registry_knows_nothing() {
        let registry = PriorRegistry::new();
        assert!(registry.names().is_empty());
        let err = registry.by_name("normal").unwrap_err();
        assert!(matches!(err, LatentError::UnknownPrior { ref name } if name == "normal"));
    }

    #[test]
    fn defaults_hold_normal() {
        assert_eq!(PriorRegistry::with_defaults().names(), vec!["normal"]);
    }

    #[test]
    fn register_replaces_silently() {
        let mut registry = PriorRegistry::with_defaults();
        assert_eq!(registry.register("gaussian", PriorVariant::Normal), None);
        assert_eq!(
            registry.register("gaussian", PriorVariant::Normal),
            Some(PriorVariant::Normal)
        );
        assert_eq!(registry.names(), vec!["gaussian", "normal"]);
    }

    #[test]
    fn build_by_name() {
        let registry = PriorRegistry::with_defaults();
        let prior = registry
            .build("normal", params(), &VarMap::new(), &Device::Cpu)
            .unwrap();
        assert_eq!(prior.features(), 4);
        assert_eq!(prior.length_unit(), 2);
    }

    #[test]
    fn build_unknown_name_fails() {
        let registry = PriorRegistry::with_defaults();
        let err = registry
            .build("mixture", params(), &VarMap::new(), &Device::Cpu)
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown prior variant: mixture");
    }

    #[test]
    fn build_without_flow_section_fails() {
        let err = PriorVariant::Normal
            .build(ParamMap::new(), &VarMap::new(), &Device::Cpu)
            .unwrap_err();
        assert!(matches!(err, LatentError::MissingParam { .. }));
    }
}
