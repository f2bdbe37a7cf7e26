//! Kind handlers and the static kind registry

pub mod account;
pub mod app;
pub mod config;
pub mod notification;
pub mod object;
pub mod policy;
pub mod role;
pub mod script;
pub mod service_account;
pub mod sms;
pub mod template;
pub mod view;

use chrono::Utc;
use deploy_models::{Dependency, Kind, MigrationUnit, RecordId};
use record_store::{Document, Filter, Patch, RecordStore};
use serde_json::{json, Value};

use crate::contract::did::{DeploymentIds, DID_FIELD};
use crate::contract::{org, KindHandler, SourceContext};
use crate::errors::MigrationError;

/// The handler for a kind
pub fn handler_for(kind: Kind) -> &'static dyn KindHandler {
    match kind {
        Kind::Account => &account::AccountHandler,
        Kind::App => &app::AppHandler,
        Kind::Config => &config::ConfigHandler,
        Kind::Notification => &notification::NotificationHandler,
        Kind::Object => &object::ObjectHandler,
        Kind::Policy => &policy::PolicyHandler,
        Kind::Role => &role::RoleHandler,
        Kind::Script => &script::ScriptHandler,
        Kind::ServiceAccount => &service_account::ServiceAccountHandler,
        Kind::Sms => &sms::SmsHandler,
        Kind::Template => &template::TemplateHandler,
        Kind::View => &view::ViewHandler,
    }
}

pub(crate) fn id_of(record: &Document) -> Option<RecordId> {
    record.get("_id").and_then(RecordId::from_any_value)
}

pub(crate) fn position_of(records: &[Document], id: &RecordId) -> Option<usize> {
    records
        .iter()
        .position(|r| r.get("_id").and_then(Value::as_str) == Some(id.as_str()))
}

pub(crate) fn missing_target(unit: &MigrationUnit) -> MigrationError {
    MigrationError::NotFound(format!(
        "Missing mapping target {}: {}",
        unit.kind,
        unit.label()
    ))
}

pub(crate) fn missing_source(unit: &MigrationUnit) -> MigrationError {
    MigrationError::NotFound(format!(
        "Missing mapping source {}: {}",
        unit.kind,
        unit.label()
    ))
}

/// Drop repeated dependencies, keeping first occurrences in order
pub(crate) fn unique(dependencies: Vec<Dependency>) -> Vec<Dependency> {
    let mut seen = Vec::with_capacity(dependencies.len());
    for dependency in dependencies {
        if !seen.contains(&dependency) {
            seen.push(dependency);
        }
    }
    seen
}

/// Replace the unit's display snapshot with the listed fields of a record
pub(crate) fn set_source(unit: &mut MigrationUnit, record: &Document, keys: &[&str]) {
    unit.source = crate::contract::pick(record, keys);
}

/// Fill payloads from an array embedded in the source org
pub(crate) fn embedded_payloads(
    source: &SourceContext<'_>,
    path: &str,
    units: Vec<&mut MigrationUnit>,
) -> Result<(), MigrationError> {
    let records = org::read_docs(&source.org, path);
    for unit in units {
        let index = position_of(&records, &unit.id).ok_or_else(|| missing_source(unit))?;
        unit.payload = Some(Value::Object(records[index].clone()));
    }
    Ok(())
}

/// Target records of an embedded array, for matching
pub(crate) async fn target_docs(target: &dyn RecordStore, path: &str) -> Result<Vec<Document>, MigrationError> {
    let org = org::load_org(target).await?;
    Ok(org::read_docs(&org, path))
}

/// Place `record` into `records`: update the chosen target in place, keeping
/// its id and deployment-identifier set, or append a new record. Returns the
/// target id.
pub(crate) fn upsert_embedded(
    records: &mut Vec<Document>,
    unit: &MigrationUnit,
    target: Option<&RecordId>,
    mut record: Document,
) -> Result<RecordId, MigrationError> {
    record.remove("_id");
    record.remove(DID_FIELD);
    match target {
        Some(target_id) => {
            let index = position_of(records, target_id).ok_or_else(|| missing_target(unit))?;
            let existing = &mut records[index];
            for (key, value) in record {
                existing.insert(key, value);
            }
            DeploymentIds::stamp(existing, &unit.id);
            Ok(target_id.clone())
        }
        None => {
            let id = RecordId::generate();
            record.insert("_id".to_string(), id.to_value());
            record.insert(DID_FIELD.to_string(), DeploymentIds::from_source(&unit.id).to_value());
            records.push(record);
            Ok(id)
        }
    }
}

/// Credit a record written from `source` to the deploying principal. Source
/// timestamps are kept; a record without a creation time gets the current one.
pub(crate) fn stamp_authorship(record: &mut Document, source: &Document, principal: &RecordId) {
    let by = json!({ "_id": principal.as_str() });
    record.insert("creator".to_string(), by.clone());
    record.insert("owner".to_string(), by.clone());
    if source.get("updater").is_some_and(|u| !u.is_null()) {
        record.insert("updater".to_string(), by);
    }
    let created = source
        .get("created")
        .cloned()
        .unwrap_or_else(|| Value::String(Utc::now().to_rfc3339()));
    record.insert("created".to_string(), created);
    if let Some(updated) = source.get("updated") {
        record.insert("updated".to_string(), updated.clone());
    }
}

/// Write a standalone record: patch the chosen target and add the unit to its
/// deployment-identifier set, or insert a new record. Returns the target id.
pub(crate) async fn write_record(
    store: &dyn RecordStore,
    collection: &str,
    unit: &MigrationUnit,
    target: Option<RecordId>,
    mut record: Document,
) -> Result<RecordId, MigrationError> {
    record.remove("_id");
    record.remove(DID_FIELD);
    match target {
        Some(target_id) => {
            let filter = Filter::by_id(target_id.to_value());
            if store.find_one(collection, &filter).await?.is_none() {
                return Err(missing_target(unit));
            }
            let patch = record
                .into_iter()
                .fold(Patch::new(), |patch, (key, value)| patch.set(key, value))
                .add_to_set(DID_FIELD, unit.id.to_value());
            store.update_one(collection, &filter, &patch).await?;
            Ok(target_id)
        }
        None => {
            let id = RecordId::generate();
            record.insert("_id".to_string(), id.to_value());
            record.insert(DID_FIELD.to_string(), DeploymentIds::from_source(&unit.id).to_value());
            store.insert(collection, record).await?;
            Ok(id)
        }
    }
}
