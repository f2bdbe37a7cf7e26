//! Message templates. A template is identified by type and name and stored
//! as one record per locale plus a base record without a locale.

use async_trait::async_trait;
use deploy_models::{Dependency, Kind, MatchType, MigrationUnit, PackageOptions, Selection};
use record_store::{Document, Filter, Patch, RecordStore};
use serde_json::Value;
use tracing::debug;

use crate::backup::{backup_records, restore_records, KindBackup};
use crate::contract::did::DID_FIELD;
use crate::contract::matching::{by_identifier, match_unit, same_field, Rule};
use crate::contract::selection::{select_docs, SelectQuery};
use crate::contract::{org, payload_of, pick, str_field, KindHandler, SourceContext, WriteContext};
use crate::errors::MigrationError;
use crate::handlers::{id_of, missing_source, missing_target};

const SOURCE_FIELDS: [&str; 4] = ["name", "type", "builtin", "spec.nickname"];
const SET_FIELDS: [&str; 7] = ["updated", "sequence", "current", "version", "changes", "spec", "builtin"];

fn base_filter() -> Filter {
    Filter::Exists("locale".to_string(), false)
}

fn identity_filter(template_type: &str, name: &str) -> Filter {
    Filter::eq("type", template_type).and(Filter::eq("name", name))
}

fn nickname(record: &Document) -> Option<&str> {
    record.get("spec")?.get(0)?.get("nickname")?.as_str()
}

/// Point `by` at the deploying principal when the record names an author
fn reassign_author(value: Option<&mut Value>, principal: &Value) {
    if let Some(Value::Object(stamp)) = value {
        if stamp.get("by").is_some_and(|by| !by.is_null()) {
            stamp.insert("by".to_string(), principal.clone());
        }
    }
}

pub struct TemplateHandler;

impl TemplateHandler {
    async fn write(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        let principal = ctx.principal.to_value();

        for unit in ctx.units_of(Kind::Template) {
            let records: Vec<Document> = payload_of(unit)?;
            let template_type = str_field(&unit.source, "type");
            let name = str_field(&unit.source, "name");
            let identity = identity_filter(&template_type, &name);

            if let Some(target) = ctx.chosen_target(unit)? {
                if ctx.store.find_one(org::TEMPLATES, &Filter::by_id(target.to_value())).await?.is_none() {
                    return Err(missing_target(unit));
                }
            }

            for mut template in records {
                reassign_author(template.get_mut("updated"), &principal);
                if let Some(Value::Array(changes)) = template.get_mut("changes") {
                    for change in changes.iter_mut() {
                        reassign_author(change.get_mut("created"), &principal);
                        reassign_author(change.get_mut("updated"), &principal);
                    }
                }

                let set = pick(&template, &SET_FIELDS);
                let mut set_on_insert = pick(&template, &["locale"]);
                set_on_insert.insert("type".to_string(), Value::String(template_type.clone()));
                set_on_insert.insert("name".to_string(), Value::String(name.clone()));

                let locale = match template.get("locale") {
                    Some(locale) if !locale.is_null() => Filter::eq("locale", locale.clone()),
                    _ => base_filter(),
                };
                ctx.store
                    .upsert(org::TEMPLATES, &identity.clone().and(locale), set, set_on_insert)
                    .await?;
            }

            ctx.store
                .update_many(org::TEMPLATES, &identity, &Patch::new().add_to_set(DID_FIELD, unit.id.to_value()))
                .await?;

            let base = match ctx.store.find_one(org::TEMPLATES, &identity.clone().and(base_filter())).await? {
                Some(base) => Some(base),
                None => ctx.store.find_one(org::TEMPLATES, &identity).await?,
            };
            if let Some(id) = base.as_ref().and_then(id_of) {
                debug!("Template {} written as {}", unit.label(), id);
                ctx.resolved(unit, id);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl KindHandler for TemplateHandler {
    fn kind(&self) -> Kind {
        Kind::Template
    }

    fn dependencies(&self, _source: &SourceContext<'_>, _record: &Document) -> Result<Vec<Dependency>, MigrationError> {
        Ok(Vec::new())
    }

    async fn source_mapping_docs(
        &self,
        source: &SourceContext<'_>,
        selection: &Selection,
    ) -> Result<Vec<Document>, MigrationError> {
        let query = SelectQuery::new(org::TEMPLATES)
            .fields(&SOURCE_FIELDS)
            .filter(base_filter());
        select_docs(source.store, selection, query).await
    }

    async fn match_source_mappings(
        &self,
        target: &dyn RecordStore,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        let templates = target
            .find(org::TEMPLATES, &base_filter(), &["name", "type", DID_FIELD])
            .await?;
        let by_name = |u: &MigrationUnit, r: &Document| {
            same_field(u, r, "name", "name") && same_field(u, r, "type", "type")
        };
        let rules: [Rule<'_>; 2] = [(MatchType::Identifier, &by_identifier), (MatchType::Name, &by_name)];
        for unit in units {
            match_unit(unit, &templates, "_id", &["name", "type"], &rules);
        }
        Ok(())
    }

    /// Every locale record of the template
    async fn deployment_payload(
        &self,
        source: &SourceContext<'_>,
        _options: &PackageOptions,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        for unit in units {
            let identity = identity_filter(&str_field(&unit.source, "type"), &str_field(&unit.source, "name"));
            let records = source.store.find(org::TEMPLATES, &identity, &[]).await?;
            if records.is_empty() {
                return Err(missing_source(unit));
            }
            unit.payload = Some(Value::Array(records.into_iter().map(Value::Object).collect()));
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
        Ok(Some(backup_records(target, org::TEMPLATES).await?))
    }

    async fn rollback(&self, target: &dyn RecordStore, backup: &KindBackup) -> Result<(), MigrationError> {
        restore_records(target, Kind::Template, backup).await
    }

    fn update_mapping(&self, unit: &mut MigrationUnit, record: &Document) -> Result<(), MigrationError> {
        unit.source = pick(record, &["name", "type", "builtin"]);
        let label = nickname(record)
            .map(str::to_string)
            .unwrap_or_else(|| str_field(record, "name"));
        unit.source.insert("label".to_string(), Value::String(label));
        Ok(())
    }
}
