//! Record patches

use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::path::{add_to_set, set_path, unset_path};

/// An update over dotted paths, applied in order: set, unset, add-to-set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    pub set: Vec<(String, Value)>,
    pub unset: Vec<String>,
    pub add_to_set: Vec<(String, Value)>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.push((path.into(), value.into()));
        self
    }

    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.unset.push(path.into());
        self
    }

    pub fn add_to_set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_to_set.push((path.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty() && self.add_to_set.is_empty()
    }

    pub fn apply(&self, record: &mut Map<String, Value>) -> Result<(), StoreError> {
        for (path, value) in &self.set {
            set_path(record, path, value.clone())?;
        }
        for path in &self.unset {
            unset_path(record, path)?;
        }
        for (path, value) in &self.add_to_set {
            add_to_set(record, path, value.clone())?;
        }
        Ok(())
    }
}
