//! Smoke test: verify all crates link and the public surface is reachable
//! through the facade.

use latentflow::core::{LatentError, LENGTH_UNIT};
use latentflow::flow::FlowConfig;
use latentflow::prior::{PriorRegistry, PriorVariant, SampleConfig};

#[test]
fn facade_types_accessible() {
    let _config = FlowConfig::default();
    let _sample = SampleConfig::default();
    let _err = LatentError::Config {
        message: "test".to_string(),
    };
    let _variant = PriorVariant::Normal;
}

#[test]
fn defaults_match_documented_values() {
    assert_eq!(LENGTH_UNIT, 4);

    let config = FlowConfig::default();
    assert_eq!(config.features, 8);
    assert_eq!(config.levels, 3);
    assert_eq!(config.squeeze_unit(), 4);

    let sample = SampleConfig::default();
    assert_eq!(sample.nsamples, 1);
    assert!(!sample.include_zero);
}

#[test]
fn default_registry_names() {
    assert_eq!(PriorRegistry::with_defaults().names(), vec!["normal"]);
}
