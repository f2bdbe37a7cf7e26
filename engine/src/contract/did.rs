//! Deployment-identifier sets
//!
//! Every migrated target record carries the source ids that ever mapped to
//! it. Later runs match on this set before falling back to names.

use deploy_models::RecordId;
use record_store::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DID_FIELD: &str = "did";

/// Append-only list of source ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentIds(Vec<RecordId>);

impl DeploymentIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// The set a freshly created record starts with
    pub fn from_source(id: &RecordId) -> Self {
        Self(vec![id.clone()])
    }

    /// Read the set carried on a stored record; non-string entries are ignored
    pub fn read(record: &Document) -> Self {
        let ids = match record.get(DID_FIELD) {
            Some(Value::Array(items)) => items.iter().filter_map(RecordId::from_any_value).collect(),
            _ => Vec::new(),
        };
        Self(ids)
    }

    /// Add an id. Returns false when it was already present. Never removes.
    pub fn add(&mut self, id: &RecordId) -> bool {
        if self.0.contains(id) {
            false
        } else {
            self.0.push(id.clone());
            true
        }
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.0.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecordId> {
        self.0.iter()
    }

    pub fn to_value(&self) -> Value {
        Value::Array(self.0.iter().map(RecordId::to_value).collect())
    }

    /// Add `id` to the set stored on `record`, keeping what it already lists
    pub fn stamp(record: &mut Document, id: &RecordId) {
        let mut ids = Self::read(record);
        ids.add(id);
        record.insert(DID_FIELD.to_string(), ids.to_value());
    }
}
