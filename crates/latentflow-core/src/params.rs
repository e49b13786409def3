//! Configuration mappings for `from_params` constructors.

use serde_json::{Map, Value};

use crate::LatentError;

/// A nested configuration mapping, as parsed from a JSON model config.
pub type ParamMap = Map<String, Value>;

/// Removes a required sub-mapping from `params`.
///
/// # Errors
///
/// Returns [`LatentError::MissingParam`] if `key` is absent and
/// [`LatentError::Config`] if its value is not a mapping.
///
/// # Example
///
/// ```
/// use latentflow_core::params::{take_section, ParamMap};
/// use serde_json::json;
///
/// let mut params: ParamMap = json!({"flow": {"levels": 3}, "name": "normal"})
///     .as_object()
///     .cloned()
///     .unwrap();
/// let flow = take_section(&mut params, "flow").unwrap();
/// assert_eq!(flow["levels"], 3);
/// assert!(!params.contains_key("flow"));
/// ```
pub fn take_section(params: &mut ParamMap, key: &str) -> Result<ParamMap, LatentError> {
    match params.remove(key) {
        Some(Value::Object(section)) => Ok(section),
        Some(other) => Err(LatentError::Config {
            message: format!("'{key}' must be a mapping, got {other}"),
        }),
        None => Err(LatentError::MissingParam {
            key: key.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> ParamMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn take_section_missing_key() {
        let mut p = params(json!({"other": 1}));
        let err = take_section(&mut p, "flow").unwrap_err();
        assert!(matches!(err, LatentError::MissingParam { ref key } if key == "flow"));
    }

    #[test]
    fn take_section_rejects_scalar() {
        let mut p = params(json!({"flow": 3}));
        let err = take_section(&mut p, "flow").unwrap_err();
        assert!(matches!(err, LatentError::Config { .. }));
        assert!(!p.contains_key("flow"));
    }

    #[test]
    fn take_section_leaves_other_keys() {
        let mut p = params(json!({"flow": {}, "dropout": 0.1}));
        take_section(&mut p, "flow").unwrap();
        assert_eq!(p.len(), 1);
        assert!(p.contains_key("dropout"));
    }
}
