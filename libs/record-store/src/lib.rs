//! Record store contract consumed by the envshift engine.
//!
//! A store is scoped to a single tenant. Records are JSON documents grouped in
//! named collections and addressed with a small [`Filter`] language; writes
//! are expressed as [`Patch`]es over dotted paths.

pub mod error;
pub mod filter;
pub mod memory;
pub mod patch;
pub mod path;

use async_trait::async_trait;
use serde_json::{Map, Value};

pub use error::StoreError;
pub use filter::Filter;
pub use memory::{MemoryStore, StoreSnapshot};
pub use patch::Patch;

/// A stored record
pub type Document = Map<String, Value>;

/// Result of an upsert
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    /// Number of existing records that matched the query
    pub matched: u64,

    /// `_id` of the inserted record when nothing matched
    pub upserted_id: Option<Value>,
}

/// Tenant-scoped persistent record store
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Find records matching the filter. An empty field list returns whole records;
    /// otherwise only `_id` and the listed dotted paths are kept.
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        fields: &[&str],
    ) -> Result<Vec<Document>, StoreError>;

    /// Insert a record; an `_id` is generated when missing
    async fn insert(&self, collection: &str, record: Document) -> Result<Value, StoreError>;

    /// Apply `set` to the first matching record, or insert `set` + `set_on_insert`
    async fn upsert(
        &self,
        collection: &str,
        filter: &Filter,
        set: Document,
        set_on_insert: Document,
    ) -> Result<UpsertOutcome, StoreError>;

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Patch,
    ) -> Result<u64, StoreError>;

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Patch,
    ) -> Result<u64, StoreError>;

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// First matching record, whole
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StoreError> {
        let mut found = self.find(collection, filter, &[]).await?;
        if found.is_empty() {
            Ok(None)
        } else {
            Ok(Some(found.swap_remove(0)))
        }
    }
}

/// Generate a fresh 24-hex record identifier
pub fn new_object_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    hex[..24].to_string()
}
