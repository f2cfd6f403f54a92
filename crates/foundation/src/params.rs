//! Parameter trees for filter configuration.
//!
//! Every filter type ships a `default_params` tree and every instance is
//! seeded with a copy of it, merged with caller-supplied overrides.
//! Parameters are *configuration*: validated up front at `add_filter`
//! time, never used as a payload channel between filters.

use serde_json::Value;
use thiserror::Error;

/// A parameter tree. Keys map to arbitrary JSON values; nested objects
/// are merged recursively when defaults meet overrides.
pub type Params = serde_json::Map<String, Value>;

/// Error raised by the `require_*` accessors.
#[derive(Debug, Clone, Error)]
pub enum ParamError {
    #[error("missing required parameter '{0}'")]
    Missing(String),

    #[error("parameter '{key}' must be {expected}")]
    WrongType { key: String, expected: &'static str },
}

/// Merge `overrides` onto `defaults`, override wins.
///
/// Nested objects merge key-by-key; any other value kind replaces the
/// default wholesale.
pub fn merge(defaults: &Params, overrides: &Params) -> Params {
    let mut out = defaults.clone();
    for (key, value) in overrides {
        match (out.get_mut(key), value) {
            (Some(Value::Object(base)), Value::Object(over)) => {
                let merged = merge(base, over);
                *base = merged;
            }
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    out
}

/// Fetch a numeric parameter as f64 (accepts integers).
pub fn get_f64(params: &Params, key: &str) -> Option<f64> {
    params.get(key).and_then(Value::as_f64)
}

/// Fetch an integer parameter.
pub fn get_i64(params: &Params, key: &str) -> Option<i64> {
    params.get(key).and_then(Value::as_i64)
}

/// Fetch a string parameter.
pub fn get_str<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

/// Fetch a boolean parameter.
pub fn get_bool(params: &Params, key: &str) -> Option<bool> {
    params.get(key).and_then(Value::as_bool)
}

pub fn require_f64(params: &Params, key: &str) -> Result<f64, ParamError> {
    match params.get(key) {
        None => Err(ParamError::Missing(key.to_string())),
        Some(v) => v.as_f64().ok_or(ParamError::WrongType {
            key: key.to_string(),
            expected: "a number",
        }),
    }
}

pub fn require_i64(params: &Params, key: &str) -> Result<i64, ParamError> {
    match params.get(key) {
        None => Err(ParamError::Missing(key.to_string())),
        Some(v) => v.as_i64().ok_or(ParamError::WrongType {
            key: key.to_string(),
            expected: "an integer",
        }),
    }
}

pub fn require_str<'a>(params: &'a Params, key: &str) -> Result<&'a str, ParamError> {
    match params.get(key) {
        None => Err(ParamError::Missing(key.to_string())),
        Some(v) => v.as_str().ok_or(ParamError::WrongType {
            key: key.to_string(),
            expected: "a string",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Params {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_merge_override_wins() {
        let defaults = obj(json!({"inc": 1, "label": "a"}));
        let overrides = obj(json!({"inc": 5}));
        let merged = merge(&defaults, &overrides);
        assert_eq!(get_i64(&merged, "inc"), Some(5));
        assert_eq!(get_str(&merged, "label"), Some("a"));
    }

    #[test]
    fn test_merge_nested() {
        let defaults = obj(json!({"axis": {"num_bins": 8, "min_val": 0.0}}));
        let overrides = obj(json!({"axis": {"num_bins": 16}}));
        let merged = merge(&defaults, &overrides);
        let axis = merged.get("axis").and_then(Value::as_object).unwrap();
        assert_eq!(get_i64(axis, "num_bins"), Some(16));
        assert_eq!(get_f64(axis, "min_val"), Some(0.0));
    }

    #[test]
    fn test_require_reports_kind() {
        let params = obj(json!({"value": "braid"}));
        assert!(matches!(
            require_f64(&params, "value"),
            Err(ParamError::WrongType { .. })
        ));
        assert!(matches!(
            require_f64(&params, "missing"),
            Err(ParamError::Missing(_))
        ));
    }
}
