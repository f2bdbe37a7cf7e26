//! Record identifiers

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a record in either environment.
///
/// Most identifiers are 24 hex characters. Config keys reuse the type and are
/// free-form strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Sentinel meaning "no existing target; create one"
    pub const EMPTY: &'static str = "000000000000000000000000";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The create-new sentinel
    pub fn empty() -> Self {
        Self(Self::EMPTY.to_string())
    }

    /// Generate a fresh 24-hex identifier
    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self(hex[..24].to_string())
    }

    pub fn is_empty_sentinel(&self) -> bool {
        self.0 == Self::EMPTY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the string has the shape of a generated identifier
    pub fn looks_like_id(s: &str) -> bool {
        s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Read an id-shaped string out of a JSON value
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if Self::looks_like_id(s) => Some(Self(s.clone())),
            _ => None,
        }
    }

    /// Read any string out of a JSON value
    pub fn from_any_value(value: &Value) -> Option<Self> {
        value.as_str().map(|s| Self(s.to_string()))
    }

    pub fn to_value(&self) -> Value {
        Value::String(self.0.clone())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
