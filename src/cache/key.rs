//! Key Codec
//!
//! Builds stable cache keys from `(category, operation, params)`.
//!
//! Layout: `category.operation` for calls without parameters, otherwise
//! `category.operation:<canonical json>` where object members are written in
//! sorted key order at every nesting level. Two semantically equal parameter
//! sets therefore always produce the same key.

use std::fmt::Write as _;

use serde_json::Value;

/// Separates the operation key from the serialized parameters.
pub const PARAMS_SEPARATOR: char = ':';

/// Returns the `category.operation` identifier used by the policy tables.
pub fn operation_key(category: &str, operation: &str) -> String {
    format!("{}.{}", category, operation)
}

/// Builds the full cache key for a call.
pub fn cache_key(category: &str, operation: &str, params: &Value) -> String {
    let mut key = operation_key(category, operation);
    if !is_empty_params(params) {
        key.push(PARAMS_SEPARATOR);
        write_canonical(params, &mut key);
    }
    key
}

/// Recovers the `category.operation` part of a cache key.
pub fn operation_of(key: &str) -> &str {
    match key.find(PARAMS_SEPARATOR) {
        Some(idx) => &key[..idx],
        None => key,
    }
}

/// `null`, `{}` and `[]` all mean "no parameters".
pub fn is_empty_params(params: &Value) -> bool {
    match params {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Serializes `value` as compact JSON with object keys sorted.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut members: Vec<(&String, &Value)> = map.iter().collect();
            members.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (name, member)) in members.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(name, out);
                out.push(':');
                write_canonical(member, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => write_string(s, out),
        // Scalars have a single JSON rendering
        other => {
            let _ = write!(out, "{}", other);
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    // serde_json escaping for a bare string cannot fail
    let _ = write!(out, "{}", Value::String(s.to_string()));
}
