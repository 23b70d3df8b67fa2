//! Request DTOs for the sidecar API

use serde::Deserialize;
use serde_json::Value;

/// Longest accepted category or operation name.
const MAX_NAME_LENGTH: usize = 128;

/// Body of `POST /ops/read`, `/ops/write` and `/ops/refresh`.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationRequest {
    pub category: String,
    pub operation: String,
    /// Omitted or `null` means no parameters
    #[serde(default)]
    pub params: Value,
}

impl OperationRequest {
    /// Returns an error message if validation fails, None if valid.
    ///
    /// `.` and `:` are reserved by the cache key layout.
    pub fn validate(&self) -> Option<String> {
        for (field, value) in [("category", &self.category), ("operation", &self.operation)] {
            if value.is_empty() {
                return Some(format!("{} cannot be empty", field));
            }
            if value.len() > MAX_NAME_LENGTH {
                return Some(format!(
                    "{} exceeds maximum length of {} characters",
                    field, MAX_NAME_LENGTH
                ));
            }
            if value.contains(['.', ':']) {
                return Some(format!("{} cannot contain '.' or ':'", field));
            }
        }
        None
    }
}
