//! Typed access to the heterogeneous descriptor config.
//!
//! Provider configs arrive as JSON maps; each backend reads the keys it
//! recognizes and ignores the rest. These helpers keep the "missing
//! required key" errors uniform across backends.

use crate::ProviderError;

/// A required string key.
pub fn require_str<'a>(
    config: &'a serde_json::Map<String, serde_json::Value>,
    key: &'static str,
) -> Result<&'a str, ProviderError> {
    match config.get(key) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Ok(s),
        Some(serde_json::Value::String(_)) | None => Err(ProviderError::MissingConfig(key)),
        Some(other) => Err(ProviderError::InvalidConfig(format!(
            "{key} must be a string, got {other}"
        ))),
    }
}

/// An optional string key. Non-string values are an error, absence is not.
pub fn optional_str<'a>(
    config: &'a serde_json::Map<String, serde_json::Value>,
    key: &'static str,
) -> Result<Option<&'a str>, ProviderError> {
    match config.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(ProviderError::InvalidConfig(format!(
            "{key} must be a string, got {other}"
        ))),
    }
}

/// An optional boolean key.
pub fn optional_bool(
    config: &serde_json::Map<String, serde_json::Value>,
    key: &'static str,
) -> Result<Option<bool>, ProviderError> {
    match config.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(ProviderError::InvalidConfig(format!(
            "{key} must be a boolean, got {other}"
        ))),
    }
}

/// An optional unsigned integer key.
pub fn optional_u64(
    config: &serde_json::Map<String, serde_json::Value>,
    key: &'static str,
) -> Result<Option<u64>, ProviderError> {
    match config.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
            ProviderError::InvalidConfig(format!("{key} must be a non-negative integer"))
        }),
        Some(other) => Err(ProviderError::InvalidConfig(format!(
            "{key} must be an integer, got {other}"
        ))),
    }
}

/// An optional nested object key.
pub fn optional_object<'a>(
    config: &'a serde_json::Map<String, serde_json::Value>,
    key: &'static str,
) -> Result<Option<&'a serde_json::Map<String, serde_json::Value>>, ProviderError> {
    match config.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Object(map)) => Ok(Some(map)),
        Some(other) => Err(ProviderError::InvalidConfig(format!(
            "{key} must be a mapping, got {other}"
        ))),
    }
}
