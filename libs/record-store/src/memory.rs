//! In-memory record store

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::filter::Filter;
use crate::patch::Patch;
use crate::path::{project, set_path};
use crate::{new_object_id, Document, RecordStore, UpsertOutcome};

/// Serializable dump of every collection in a store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub collections: BTreeMap<String, Vec<Document>>,
}

/// Single-tenant store holding records in insertion order
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            collections: RwLock::new(snapshot.collections),
        }
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            collections: self.collections.read().await.clone(),
        }
    }

    /// Copy the named collections of another store into a new, detached store
    pub async fn fork_from(
        store: &dyn RecordStore,
        collections: &[&str],
    ) -> Result<Self, StoreError> {
        let mut copied = BTreeMap::new();
        for name in collections {
            let records = store.find(name, &Filter::All, &[]).await?;
            copied.insert(name.to_string(), records);
        }
        Ok(Self {
            collections: RwLock::new(copied),
        })
    }

    /// Every record of a collection, whole
    pub async fn records(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

fn id_of(record: &Document) -> Option<&Value> {
    record.get("_id")
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        fields: &[&str],
    ) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().await;
        let Some(records) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(records
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| {
                if fields.is_empty() {
                    r.clone()
                } else {
                    project(r, fields)
                }
            })
            .collect())
    }

    async fn insert(&self, collection: &str, mut record: Document) -> Result<Value, StoreError> {
        let mut collections = self.collections.write().await;
        let records = collections.entry(collection.to_string()).or_default();

        let id = match id_of(&record) {
            Some(id) => id.clone(),
            None => {
                let id = Value::String(new_object_id());
                record.insert("_id".to_string(), id.clone());
                id
            }
        };
        if records.iter().any(|r| id_of(r) == Some(&id)) {
            return Err(StoreError::Duplicate {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        records.push(record);
        Ok(id)
    }

    async fn upsert(
        &self,
        collection: &str,
        filter: &Filter,
        set: Document,
        set_on_insert: Document,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut collections = self.collections.write().await;
        let records = collections.entry(collection.to_string()).or_default();

        if let Some(existing) = records.iter_mut().find(|r| filter.matches(r)) {
            for (path, value) in set {
                set_path(existing, &path, value)?;
            }
            return Ok(UpsertOutcome {
                matched: 1,
                upserted_id: None,
            });
        }

        let mut record = Document::new();
        for (path, value) in set_on_insert.into_iter().chain(set) {
            set_path(&mut record, &path, value)?;
        }
        let id = record
            .entry("_id".to_string())
            .or_insert_with(|| Value::String(new_object_id()))
            .clone();
        if records.iter().any(|r| id_of(r) == Some(&id)) {
            return Err(StoreError::Duplicate {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        records.push(record);
        Ok(UpsertOutcome {
            matched: 0,
            upserted_id: Some(id),
        })
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Patch,
    ) -> Result<u64, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(records) = collections.get_mut(collection) else {
            return Ok(0);
        };
        match records.iter_mut().find(|r| filter.matches(r)) {
            Some(record) => {
                patch.apply(record)?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Patch,
    ) -> Result<u64, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(records) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut count = 0;
        for record in records.iter_mut().filter(|r| filter.matches(r)) {
            patch.apply(record)?;
            count += 1;
        }
        Ok(count)
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(records) = collections.get_mut(collection) else {
            return Ok(0);
        };
        match records.iter().position(|r| filter.matches(r)) {
            Some(index) => {
                records.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(records) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = records.len();
        records.retain(|r| !filter.matches(r));
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = MemoryStore::new();
        assert_ok!(store.insert("scripts", doc(json!({"_id": "a", "name": "x"}))).await);
        assert_ok!(store.insert("scripts", doc(json!({"_id": "b", "name": "y"}))).await);
        assert_err!(store.insert("scripts", doc(json!({"_id": "a"}))).await);

        let found = store
            .find("scripts", &Filter::eq("name", "y"), &[])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["_id"], "b");

        let missing = store.find("views", &Filter::All, &[]).await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_updates() {
        let store = MemoryStore::new();
        let filter = Filter::eq("name", "t").and(Filter::eq("type", "email"));
        let set = doc(json!({"version": 1}));
        let on_insert = doc(json!({"name": "t", "type": "email"}));

        let first = store
            .upsert("templates", &filter, set.clone(), on_insert.clone())
            .await
            .unwrap();
        assert_eq!(first.matched, 0);
        assert!(first.upserted_id.is_some());

        let second = store
            .upsert("templates", &filter, doc(json!({"version": 2})), on_insert)
            .await
            .unwrap();
        assert_eq!(second.matched, 1);

        let all = store.records("templates").await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["version"], 2);
    }

    #[tokio::test]
    async fn test_fork_is_detached() {
        let store = MemoryStore::new();
        store
            .insert("views", doc(json!({"_id": "v", "name": "n"})))
            .await
            .unwrap();

        let fork = MemoryStore::fork_from(&store, &["views"]).await.unwrap();
        fork.delete_many("views", &Filter::All).await.unwrap();

        assert_eq!(store.records("views").await.len(), 1);
        assert!(fork.records("views").await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_many_counts() {
        let store = MemoryStore::new();
        for id in ["a", "b", "c"] {
            store
                .insert("config", doc(json!({"_id": id, "isPublic": id == "b"})))
                .await
                .unwrap();
        }
        let removed = store
            .delete_many("config", &Filter::eq("isPublic", false))
            .await
            .unwrap();
        assert_eq!(removed, 2);
    }
}
