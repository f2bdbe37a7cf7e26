//! Collections of a tenant and the embedded arrays of its org record

use record_store::{Document, Filter, RecordStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::errors::MigrationError;

/// The tenant's single org record
pub const ORG: &str = "org";
pub const ACCOUNTS: &str = "accounts";
pub const OBJECTS: &str = "objects";
pub const SCRIPTS: &str = "scripts";
pub const VIEWS: &str = "views";
pub const TEMPLATES: &str = "templates";
pub const CONFIG: &str = "config";

/// Every collection the engine reads or writes
pub const COLLECTIONS: [&str; 7] = [ORG, ACCOUNTS, OBJECTS, SCRIPTS, VIEWS, TEMPLATES, CONFIG];

// Embedded arrays of the org record
pub const ROLES: &str = "roles";
pub const SERVICE_ACCOUNTS: &str = "serviceAccounts";
pub const APPS: &str = "apps";
pub const POLICIES: &str = "policies";
pub const NOTIFICATIONS: &str = "configuration.notifications";
pub const SMS_NUMBERS: &str = "configuration.sms.numbers";
pub const MAX_APPS: &str = "configuration.maxApps";

/// Load the org record; an environment without one reads as empty
pub async fn load_org(store: &dyn RecordStore) -> Result<Document, MigrationError> {
    Ok(store.find_one(ORG, &Filter::All).await?.unwrap_or_default())
}

/// Value at a dotted path through nested objects
pub fn value_at<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    segments.try_fold(doc.get(first)?, |value, segment| value.get(segment))
}

/// Deserialize the array at `path`; a missing array reads as empty
pub fn read_array<T: DeserializeOwned>(org: &Document, path: &str) -> Result<Vec<T>, MigrationError> {
    match value_at(org, path) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| serde_json::from_value(item.clone()).map_err(MigrationError::from))
            .collect(),
        _ => Ok(Vec::new()),
    }
}

/// The array at `path` as raw records
pub fn read_docs(org: &Document, path: &str) -> Vec<Document> {
    match value_at(org, path) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect(),
        _ => Vec::new(),
    }
}

pub async fn load_array<T: DeserializeOwned>(
    store: &dyn RecordStore,
    path: &str,
) -> Result<Vec<T>, MigrationError> {
    let org = load_org(store).await?;
    read_array(&org, path)
}

/// Replace the array at `path` in a single write
pub async fn save_array<T: Serialize>(
    store: &dyn RecordStore,
    path: &str,
    items: &[T],
) -> Result<(), MigrationError> {
    let mut set = Document::new();
    set.insert(path.to_string(), serde_json::to_value(items)?);
    store.upsert(ORG, &Filter::All, set, Document::new()).await?;
    Ok(())
}
