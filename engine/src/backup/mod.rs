//! Pre-run snapshots and coarse rollback

pub mod archive;

pub use archive::PackageBackup;

use deploy_models::Kind;
use record_store::{Document, Filter, Patch, RecordStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::org;
use crate::errors::MigrationError;

/// Pre-run state of one kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum KindBackup {
    /// Every record of a standalone collection
    Records {
        collection: String,
        records: Vec<Document>,
    },

    /// An array or map embedded in the org record; `None` when it was absent
    Embedded { path: String, value: Option<Value> },

    /// Key/value/visibility entries
    Config { entries: Vec<Document> },
}

impl KindBackup {
    pub fn describe(&self) -> String {
        match self {
            KindBackup::Records { collection, records } => {
                format!("{} records of {}", records.len(), collection)
            }
            KindBackup::Embedded { path, value } => match value {
                Some(Value::Array(items)) => format!("{} entries of {}", items.len(), path),
                Some(_) => format!("value of {}", path),
                None => format!("absent {}", path),
            },
            KindBackup::Config { entries } => format!("{} config keys", entries.len()),
        }
    }
}

pub async fn backup_records(
    store: &dyn RecordStore,
    collection: &str,
) -> Result<KindBackup, MigrationError> {
    let records = store.find(collection, &Filter::All, &[]).await?;
    Ok(KindBackup::Records {
        collection: collection.to_string(),
        records,
    })
}

/// Delete every current record of the collection and reinsert the backup set verbatim
pub async fn restore_records(
    store: &dyn RecordStore,
    kind: Kind,
    backup: &KindBackup,
) -> Result<(), MigrationError> {
    let KindBackup::Records { collection, records } = backup else {
        return Err(mismatched(kind, backup));
    };
    store.delete_many(collection, &Filter::All).await?;
    for record in records {
        store.insert(collection, record.clone()).await?;
    }
    Ok(())
}

pub async fn backup_embedded(store: &dyn RecordStore, path: &str) -> Result<KindBackup, MigrationError> {
    let org = org::load_org(store).await?;
    Ok(KindBackup::Embedded {
        path: path.to_string(),
        value: org::value_at(&org, path).cloned(),
    })
}

/// Replace the embedded field in a single write, or remove it when it was absent
pub async fn restore_embedded(
    store: &dyn RecordStore,
    kind: Kind,
    backup: &KindBackup,
) -> Result<(), MigrationError> {
    let KindBackup::Embedded { path, value } = backup else {
        return Err(mismatched(kind, backup));
    };
    match value {
        Some(value) => {
            let mut set = Document::new();
            set.insert(path.clone(), value.clone());
            store.upsert(org::ORG, &Filter::All, set, Document::new()).await?;
        }
        None => {
            let patch = Patch::new().unset(path.as_str());
            store.update_one(org::ORG, &Filter::All, &patch).await?;
        }
    }
    Ok(())
}

pub fn mismatched(kind: Kind, backup: &KindBackup) -> MigrationError {
    MigrationError::BackupError(format!(
        "{} backup cannot restore {}",
        kind,
        backup.describe()
    ))
}
