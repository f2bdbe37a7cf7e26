//! Key/value configuration. One record per key, keyed by the key itself.

use async_trait::async_trait;
use deploy_models::{Dependency, Kind, MatchType, MigrationUnit, PackageOptions, RecordId, Selection};
use record_store::{Document, Filter, Patch, RecordStore};
use serde_json::Value;
use tracing::debug;

use crate::backup::{mismatched, KindBackup};
use crate::contract::did::DID_FIELD;
use crate::contract::matching::{by_identifier, match_unit, Rule};
use crate::contract::selection::{select_docs, SelectQuery};
use crate::contract::{org, payload_of, KindHandler, SourceContext, WriteContext};
use crate::errors::MigrationError;
use crate::handlers::{id_of, missing_source, missing_target, set_source};

const FIELDS: [&str; 2] = ["value", "isPublic"];

fn same_key(unit: &MigrationUnit, record: &Document) -> bool {
    id_of(record).as_ref() == Some(&unit.id)
}

pub struct ConfigHandler;

impl ConfigHandler {
    async fn write(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        for unit in ctx.units_of(Kind::Config) {
            let payload: Document = payload_of(unit)?;
            // An existing key must still be there; only a new key is upserted
            let key = match ctx.chosen_target(unit)? {
                Some(key) => {
                    let found = ctx.store.find_one(org::CONFIG, &Filter::by_id(key.to_value())).await?;
                    if found.is_none() {
                        return Err(missing_target(unit));
                    }
                    key
                }
                None => unit.id.clone(),
            };

            let mut set = Document::new();
            set.insert("value".to_string(), payload.get("value").cloned().unwrap_or(Value::Null));
            set.insert(
                "isPublic".to_string(),
                Value::Bool(payload.get("isPublic").and_then(Value::as_bool).unwrap_or(false)),
            );
            let mut set_on_insert = Document::new();
            set_on_insert.insert("_id".to_string(), key.to_value());

            let filter = Filter::by_id(key.to_value());
            ctx.store.upsert(org::CONFIG, &filter, set, set_on_insert).await?;
            ctx.store
                .update_one(org::CONFIG, &filter, &Patch::new().add_to_set(DID_FIELD, unit.id.to_value()))
                .await?;
            debug!("Config key {} written", key);
            ctx.resolved(unit, key);
        }
        Ok(())
    }
}

#[async_trait]
impl KindHandler for ConfigHandler {
    fn kind(&self) -> Kind {
        Kind::Config
    }

    fn dependencies(&self, _source: &SourceContext<'_>, _record: &Document) -> Result<Vec<Dependency>, MigrationError> {
        Ok(Vec::new())
    }

    async fn source_mapping_docs(
        &self,
        source: &SourceContext<'_>,
        selection: &Selection,
    ) -> Result<Vec<Document>, MigrationError> {
        select_docs(source.store, selection, SelectQuery::new(org::CONFIG)).await
    }

    async fn match_source_mappings(
        &self,
        target: &dyn RecordStore,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        let keys = target.find(org::CONFIG, &Filter::All, &[DID_FIELD, "isPublic"]).await?;
        let rules: [Rule<'_>; 2] = [(MatchType::Identifier, &by_identifier), (MatchType::Name, &same_key)];
        for unit in units {
            match_unit(unit, &keys, "_id", &["isPublic"], &rules);
        }
        Ok(())
    }

    async fn deployment_payload(
        &self,
        source: &SourceContext<'_>,
        _options: &PackageOptions,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        for unit in units {
            let record = source
                .store
                .find_one(org::CONFIG, &Filter::by_id(unit.id.to_value()))
                .await?
                .ok_or_else(|| missing_source(unit))?;
            unit.payload = Some(Value::Object(record));
        }
        Ok(())
    }

    async fn validate_for_target(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        self.write(ctx).await
    }

    async fn deploy(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        self.write(ctx).await
    }

    async fn create_backup(&self, target: &dyn RecordStore) -> Result<Option<KindBackup>, MigrationError> {
        let entries = target.find(org::CONFIG, &Filter::All, &[]).await?;
        Ok(Some(KindBackup::Config { entries }))
    }

    /// Clear every current key, then re-set each backed-up entry
    async fn rollback(&self, target: &dyn RecordStore, backup: &KindBackup) -> Result<(), MigrationError> {
        let KindBackup::Config { entries } = backup else {
            return Err(mismatched(Kind::Config, backup));
        };
        target.delete_many(org::CONFIG, &Filter::All).await?;
        for entry in entries {
            let Some(key) = entry.get("_id").cloned() else {
                continue;
            };
            let mut set = entry.clone();
            set.remove("_id");
            let mut set_on_insert = Document::new();
            set_on_insert.insert("_id".to_string(), key.clone());
            target
                .upsert(org::CONFIG, &Filter::by_id(key), set, set_on_insert)
                .await?;
        }
        Ok(())
    }

    fn update_mapping(&self, unit: &mut MigrationUnit, record: &Document) -> Result<(), MigrationError> {
        set_source(unit, record, &["isPublic"]);
        if let Some(key) = id_of(record) {
            unit.source.insert("name".to_string(), key.to_value());
        }
        Ok(())
    }
}

/// Config keys in a store as `(key, value)` pairs, in storage order
pub async fn entries(store: &dyn RecordStore) -> Result<Vec<(RecordId, Value)>, MigrationError> {
    Ok(store
        .find(org::CONFIG, &Filter::All, &["value"])
        .await?
        .into_iter()
        .filter_map(|r| Some((id_of(&r)?, r.get("value").cloned().unwrap_or(Value::Null))))
        .collect())
}
