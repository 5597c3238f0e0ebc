//! Canonical request keys.
//!
//! A [`RequestKey`] identifies one `(view, parameters)` query. Two parameter
//! objects that differ only in field order produce the same key, so every
//! cache, registry and rate window lookup agrees on identity.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Parameters reported by a consumer alongside its view.
pub type QueryParams = Value;

/// Logical view identifier (a dashboard tab, panel or widget).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(String);

impl ViewId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ViewId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ViewId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for ViewId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Deterministic key for a `(view, parameters)` pair.
///
/// Format: `<view>:<canonical-json>` where object keys are sorted
/// recursively and no whitespace is emitted. Array order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    /// Build the key for a view and its parameters.
    pub fn new(view: &ViewId, params: &Value) -> Self {
        let mut key = String::with_capacity(view.as_str().len() + 32);
        key.push_str(view.as_str());
        key.push(':');
        write_canonical(params, &mut key);
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short SHA-256 digest of the key, used as a log field so raw
    /// parameters never end up in log lines.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..8])
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (name, field)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_scalar(&Value::from(name.as_str()), out);
                out.push(':');
                write_canonical(field, out);
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
        scalar => write_scalar(scalar, out),
    }
}

// serde_json's own Display handles string escaping and number formatting.
fn write_scalar(value: &Value, out: &mut String) {
    out.push_str(&value.to_string());
}

// =============================================================================
// TESTS
// =============================================================================
