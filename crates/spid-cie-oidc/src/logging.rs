//! Log context sanitization and correlation ids.
//!
//! Structured log fields go through [`sanitize_context`] before they are
//! emitted so tokens and secrets never reach the log sink.

use rand::RngCore;
use rand::rngs::OsRng;
use serde_json::{Map, Value};

/// Key fragments whose values are always redacted.
const FORBIDDEN_KEYS: &[&str] = &[
    "client_secret",
    "access_token",
    "refresh_token",
    "id_token",
    "token",
    "secret",
];

/// Strings longer than this are truncated.
const MAX_VALUE_LEN: usize = 500;

/// Length kept from a truncated string.
const TRUNCATED_LEN: usize = 120;

pub const REDACTED: &str = "[REDACTED]";

/// Generates a correlation id: 8 random bytes, lowercase hex.
#[must_use]
pub fn generate_correlation_id() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Returns `true` if a field with this name must never be logged.
#[must_use]
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    FORBIDDEN_KEYS.iter().any(|needle| lower.contains(needle))
}

/// Redacts sensitive keys and truncates long string values.
#[must_use]
pub fn sanitize_context(context: Map<String, Value>) -> Map<String, Value> {
    context
        .into_iter()
        .map(|(key, value)| {
            if is_sensitive_key(&key) {
                return (key, Value::String(REDACTED.to_string()));
            }
            let value = match value {
                Value::String(s) => Value::String(truncate_value(s)),
                other => other,
            };
            (key, value)
        })
        .collect()
}

/// Truncates `value` to 120 characters plus a marker when it exceeds 500.
#[must_use]
pub fn truncate_value(value: String) -> String {
    if value.chars().count() <= MAX_VALUE_LEN {
        return value;
    }
    let head: String = value.chars().take(TRUNCATED_LEN).collect();
    format!("{head}...[truncated]")
}
