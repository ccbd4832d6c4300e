//! Filters available to run-task templates
//!
//! - `default`, `required`: undefined handling
//! - `base64_encode`, `base64_decode`, `upper`, `lower`: string helpers
//! - `to_yaml`, `from_yaml`, `to_json`: serialization
//! - `json_path`: read a dotted path out of a structured value
//! - `split_list_trim`, `pick_prefix`, `pick_suffix`, `pick_contains`, `is_len`: list helpers

use base64::{engine::general_purpose::STANDARD, Engine};
use minijinja::{Error, ErrorKind, Value};

/// Default filter - returns fallback if value is undefined or none
///
/// Usage: `{{ value | default("fallback") }}`
pub fn default_filter(value: Value, fallback: Value) -> Value {
    if value.is_undefined() || value.is_none() {
        fallback
    } else {
        value
    }
}

/// Required filter - fails if value is undefined
///
/// Usage: `{{ value | required }}`
pub fn required(value: Value) -> Result<Value, Error> {
    if value.is_undefined() {
        Err(Error::new(
            ErrorKind::UndefinedError,
            "required value is undefined",
        ))
    } else {
        Ok(value)
    }
}

/// Base64 encode filter
pub fn base64_encode(value: String) -> String {
    STANDARD.encode(value.as_bytes())
}

/// Base64 decode filter
pub fn base64_decode(value: String) -> Result<String, Error> {
    let bytes = STANDARD.decode(value).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("base64 decode error: {}", e),
        )
    })?;
    String::from_utf8(bytes).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("base64 decode produced invalid UTF-8: {}", e),
        )
    })
}

/// Upper case filter
pub fn upper(value: String) -> String {
    value.to_uppercase()
}

/// Lower case filter
pub fn lower(value: String) -> String {
    value.to_lowercase()
}

/// Serialize a value as YAML
///
/// Usage: `{{ TaskResult.t1 | to_yaml }}`
pub fn to_yaml(value: Value) -> Result<String, Error> {
    serde_yaml::to_string(&value).map_err(|e| {
        Error::new(ErrorKind::InvalidOperation, format!("to_yaml: {}", e))
    })
}

/// Parse a YAML (or JSON) document into a value
///
/// Usage: `{% set pool = raw | from_yaml %}`
pub fn from_yaml(value: String) -> Result<Value, Error> {
    let parsed: serde_json::Value = serde_yaml::from_str(&value).map_err(|e| {
        Error::new(ErrorKind::InvalidOperation, format!("from_yaml: {}", e))
    })?;
    Ok(Value::from_serialize(&parsed))
}

/// Serialize a value as compact JSON
pub fn to_json(value: Value) -> Result<String, Error> {
    serde_json::to_string(&value).map_err(|e| {
        Error::new(ErrorKind::InvalidOperation, format!("to_json: {}", e))
    })
}

/// Read a dotted path out of a structured value; none when missing
///
/// Usage: `{{ TaskResult.t1 | json_path(".status.phase") }}`
pub fn json_path(value: Value, path: String) -> Result<Value, Error> {
    let json = to_serde(&value)?;
    Ok(maya_common::values::lookup(&json, &path)
        .map(Value::from_serialize)
        .unwrap_or_else(|| Value::from(())))
}

/// Split a string and trim every element, dropping empty ones
///
/// Usage: `{{ "a, b,,c" | split_list_trim(",") }}`
pub fn split_list_trim(value: String, separator: Option<String>) -> Vec<String> {
    let separator = separator.unwrap_or_else(|| ",".to_string());
    value
        .split(separator.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Keep the elements starting with `prefix`
pub fn pick_prefix(list: Vec<String>, prefix: String) -> Vec<String> {
    list.into_iter().filter(|s| s.starts_with(&prefix)).collect()
}

/// Keep the elements ending with `suffix`
pub fn pick_suffix(list: Vec<String>, suffix: String) -> Vec<String> {
    list.into_iter().filter(|s| s.ends_with(&suffix)).collect()
}

/// Keep the elements containing `needle`
pub fn pick_contains(list: Vec<String>, needle: String) -> Vec<String> {
    list.into_iter().filter(|s| s.contains(&needle)).collect()
}

/// Whether a sequence, map or string has exactly `expected` elements
///
/// Usage: `{% if pools | is_len(3) %}`
pub fn is_len(value: Value, expected: usize) -> bool {
    value.len() == Some(expected)
}

/// Convert a template value into a JSON value
pub(crate) fn to_serde(value: &Value) -> Result<serde_json::Value, Error> {
    serde_json::to_value(value).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("value is not serializable: {}", e),
        )
    })
}
