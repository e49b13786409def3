//! Configuration for [`crate::ConditionalFlow`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use latentflow_core::{LatentError, ParamMap};

/// Architecture of a [`crate::ConditionalFlow`].
///
/// Deserialized from the `flow` section of a prior configuration. Missing
/// keys take their defaults; unknown keys are rejected.
///
/// # Example
///
/// ```
/// use latentflow_flow::FlowConfig;
/// use serde_json::json;
///
/// let params = json!({"features": 16, "levels": 2}).as_object().cloned().unwrap();
/// let config = FlowConfig::from_params(&params).unwrap();
/// assert_eq!(config.features, 16);
/// assert_eq!(config.steps_per_level, 2);
/// assert!(config.inverse);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlowConfig {
    /// Latent dimensionality per target position (default: 8). Must be even.
    pub features: usize,

    /// Width of the source encoding (default: 256).
    pub src_features: usize,

    /// Width of the coupling conditioner's hidden layer (default: 64).
    pub hidden_features: usize,

    /// Number of multi-scale levels (default: 3). Lengths must be divisible
    /// by `2^(levels - 1)`.
    pub levels: usize,

    /// ActNorm + coupling steps per level (default: 2).
    pub steps_per_level: usize,

    /// Whether `fwdpass` runs the generative direction (default: true).
    pub inverse: bool,
}

/// Deepest multi-scale stack a [`FlowConfig`] accepts. Level `l` is
/// `2^l` times wider than the input, so deeper stacks are never practical.
pub const MAX_LEVELS: usize = 16;

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            features: 8,
            src_features: 256,
            hidden_features: 64,
            levels: 3,
            steps_per_level: 2,
            inverse: true,
        }
    }
}

impl FlowConfig {
    /// Parses and validates a configuration mapping.
    ///
    /// # Errors
    ///
    /// Returns [`LatentError::Config`] for malformed or invalid settings.
    pub fn from_params(params: &ParamMap) -> Result<Self, LatentError> {
        let config: Self =
            serde_json::from_value(Value::Object(params.clone())).map_err(|e| {
                LatentError::Config {
                    message: format!("flow: {e}"),
                }
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the structural constraints of the architecture.
    ///
    /// # Errors
    ///
    /// Returns [`LatentError::Config`] naming the first violated constraint.
    pub fn validate(&self) -> Result<(), LatentError> {
        let fail = |message: &str| {
            Err(LatentError::Config {
                message: format!("flow: {message}"),
            })
        };
        if self.features == 0 || self.features % 2 != 0 {
            return fail("features must be a positive even number");
        }
        if self.src_features == 0 || self.hidden_features == 0 {
            return fail("src_features and hidden_features must be positive");
        }
        if self.levels == 0 || self.levels > MAX_LEVELS {
            return fail(&format!("levels must be between 1 and {MAX_LEVELS}"));
        }
        if self.steps_per_level == 0 {
            return fail("steps_per_level must be at least 1");
        }
        Ok(())
    }

    /// Length granularity required by the squeeze operations: `2^(levels - 1)`.
    pub fn squeeze_unit(&self) -> usize {
        1 << (self.levels.max(1) - 1)
    }

    /// Feature width at level `level`.
    pub fn features_at(&self, level: usize) -> usize {
        self.features << level
    }
}
