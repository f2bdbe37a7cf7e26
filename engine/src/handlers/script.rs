//! Scripts: jobs, libraries, routes and triggers

use async_trait::async_trait;
use deploy_models::{Dependency, Kind, MatchType, MigrationUnit, PackageOptions, RecordId, Selection, TargetCandidate};
use record_store::{Document, Filter, RecordStore};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::backup::{backup_records, restore_records, KindBackup};
use crate::contract::acl::{acl_dependencies, acl_to_value, map_acl_to_target, parse_acl};
use crate::contract::matching::{by_identifier, is_blank, match_unit, same_field, Rule};
use crate::contract::selection::{select_docs, SelectQuery};
use crate::contract::{org, payload_of, pick, str_field, KindHandler, SourceContext, Unresolved, WriteContext};
use crate::errors::MigrationError;
use crate::handlers::{id_of, missing_source, stamp_authorship, unique, write_record};

const SOURCE_FIELDS: [&str; 7] = ["label", "name", "type", "principal", "configuration", "requires", "serviceAccounts"];
const MATCH_FIELDS: [&str; 5] = ["did", "label", "type", "configuration", "name"];
const INTERNALS: [&str; 3] = ["bytecode", "bytecodeVersion", "resources"];
const WRITE_FIELDS: [&str; 11] = [
    "label",
    "name",
    "description",
    "active",
    "principal",
    "script",
    "language",
    "optimized",
    "requires",
    "serviceAccounts",
    "compiled",
];
const PRINCIPAL_KINDS: [Kind; 3] = [Kind::Account, Kind::Role, Kind::ServiceAccount];

/// Configuration keys kept per script type; `None` for unknown types
fn configuration_fields(script_type: &str) -> Option<&'static [&'static str]> {
    match script_type {
        "job" => Some(&["name", "cron"]),
        "library" => Some(&["name", "export"]),
        "route" => Some(&["name", "urlEncoded", "plainText", "path", "method", "priority", "acl", "apiKey"]),
        "trigger" => Some(&["name", "object", "event", "inline"]),
        _ => None,
    }
}

/// Configuration keys shown next to a unit
fn descriptor_fields(script_type: &str) -> &'static [&'static str] {
    match script_type {
        "route" => &["path", "method", "apiKey"],
        "trigger" => &["object", "event"],
        "library" => &["export"],
        _ => &[],
    }
}

fn configuration(record: &Document) -> Document {
    record
        .get("configuration")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn same_configuration(unit: &MigrationUnit, record: &Document, keys: &[&str]) -> bool {
    let source = configuration(&unit.source);
    let target = configuration(record);
    keys.iter().all(|key| match (source.get(*key), target.get(*key)) {
        (Some(a), Some(b)) => !is_blank(a) && a == b,
        _ => false,
    })
}

fn script_type(unit: &MigrationUnit) -> String {
    str_field(&unit.source, "type")
}

fn same_trigger(unit: &MigrationUnit, record: &Document) -> bool {
    script_type(unit) == "trigger"
        && same_field(unit, record, "type", "type")
        && same_configuration(unit, record, &["object", "event"])
}

/// Sort weight of a candidate; the rest keep the order they were found in
fn rank(match_type: MatchType) -> u8 {
    match match_type {
        MatchType::ConfigurationAndLabel => 1,
        MatchType::Duplicate => 2,
        MatchType::Configuration => 3,
        _ => 0,
    }
}

pub struct ScriptHandler;

impl ScriptHandler {
    /// The record to write, or `None` when the script type is not deployable
    fn build_record(&self, ctx: &WriteContext<'_>, unit: &MigrationUnit, source: &Document) -> Result<Option<Document>, MigrationError> {
        let script_type = str_field(source, "type");
        let Some(keys) = configuration_fields(&script_type) else {
            return Ok(None);
        };

        let mut record = pick(source, &WRITE_FIELDS);
        let principal = match source.get("principal").and_then(RecordId::from_value) {
            Some(principal) => ctx.map_principal(unit, &principal, &PRINCIPAL_KINDS)?.to_value(),
            None => Value::Null,
        };
        record.insert("principal".to_string(), principal);

        let mut config = pick(&configuration(source), keys);
        if script_type == "route" {
            let acl = parse_acl(config.get("acl"))?;
            config.insert("acl".to_string(), acl_to_value(&map_acl_to_target(&ctx.resolver(), &acl, true)));

            let api_key = match config.get("apiKey").and_then(RecordId::from_value) {
                Some(app) => ctx.map_reference(unit, &app, Kind::App)?.map(|id| id.to_value()),
                None => None,
            };
            config.insert("apiKey".to_string(), api_key.unwrap_or(Value::Null));
        }
        record.insert("configuration".to_string(), Value::Object(config));

        stamp_authorship(&mut record, source, ctx.principal);
        Ok(Some(record))
    }

    async fn write_unit(&self, ctx: &mut WriteContext<'_>, unit: &MigrationUnit) -> Result<(), MigrationError> {
        let source: Document = payload_of(unit)?;
        let target = ctx.chosen_target(unit)?;
        let Some(mut record) = self.build_record(ctx, unit, &source)? else {
            warn!("Skipping script {} of unknown type", unit.label());
            return Ok(());
        };

        if target.is_none() {
            record.insert("type".to_string(), Value::String(str_field(&source, "type")));
        }
        let id = write_record(ctx.store, org::SCRIPTS, unit, target, record).await?;
        debug!("Script {} written as {}", unit.label(), id);
        ctx.resolved(unit, id);
        Ok(())
    }

    /// Libraries go first so scripts requiring them find them in place
    async fn write(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        for libraries in [true, false] {
            for unit in ctx.units_of(Kind::Script) {
                if (script_type(unit) == "library") == libraries {
                    self.write_unit(ctx, unit).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl KindHandler for ScriptHandler {
    fn kind(&self) -> Kind {
        Kind::Script
    }

    fn dependencies(&self, source: &SourceContext<'_>, record: &Document) -> Result<Vec<Dependency>, MigrationError> {
        let mut dependencies = Vec::new();

        if let Some(principal) = record.get("principal").and_then(RecordId::from_value) {
            if let Some(kind) = source.principal_kind(&principal) {
                dependencies.push(Dependency::new(principal, kind));
            }
        }
        dependencies.extend(source.script_dependencies(record));

        let config = configuration(record);
        match str_field(record, "type").as_str() {
            "route" => {
                dependencies.extend(acl_dependencies(&parse_acl(config.get("acl"))?));
                if let Some(app) = config.get("apiKey").and_then(RecordId::from_value) {
                    dependencies.push(Dependency::new(app, Kind::App));
                }
            }
            "trigger" => {
                let object = config.get("object").and_then(Value::as_str).unwrap_or_default();
                if let Some(lookup) = source.object_id(object) {
                    dependencies.push(Dependency::new(lookup.clone(), Kind::Object));
                }
            }
            _ => {}
        }
        Ok(unique(dependencies))
    }

    async fn source_mapping_docs(
        &self,
        source: &SourceContext<'_>,
        selection: &Selection,
    ) -> Result<Vec<Document>, MigrationError> {
        let query = SelectQuery::new(org::SCRIPTS).fields(&SOURCE_FIELDS);
        let mut scripts = select_docs(source.store, selection, query).await?;
        for script in scripts.iter_mut() {
            let requires = script.get("requires").cloned();
            let service_accounts = script.get("serviceAccounts").cloned();
            source.attach_script_references(
                script,
                requires.as_ref(),
                service_accounts.as_ref(),
                Unresolved::Drop,
            );
        }
        Ok(scripts)
    }

    async fn match_source_mappings(
        &self,
        target: &dyn RecordStore,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        let scripts = target.find(org::SCRIPTS, &Filter::All, &MATCH_FIELDS).await?;

        let by_name = |u: &MigrationUnit, r: &Document| same_field(u, r, "name", "name");
        let by_label = |u: &MigrationUnit, r: &Document| {
            script_type(u) == "job" && same_field(u, r, "type", "type") && same_field(u, r, "label", "label")
        };
        let by_configuration_and_label =
            |u: &MigrationUnit, r: &Document| same_trigger(u, r) && same_field(u, r, "label", "label");
        let by_configuration = |u: &MigrationUnit, r: &Document| {
            same_field(u, r, "type", "type")
                && match script_type(u).as_str() {
                    "route" => same_configuration(u, r, &["path", "method"]),
                    "library" => same_configuration(u, r, &["export"]),
                    "trigger" => same_configuration(u, r, &["object", "event"]),
                    _ => false,
                }
        };
        let rules: [Rule<'_>; 5] = [
            (MatchType::Identifier, &by_identifier),
            (MatchType::Name, &by_name),
            (MatchType::Label, &by_label),
            (MatchType::ConfigurationAndLabel, &by_configuration_and_label),
            (MatchType::Configuration, &by_configuration),
        ];

        for unit in units {
            match_unit(unit, &scripts, "_id", &["label", "name", "type", "configuration"], &rules);

            // Triggers may be duplicated, so creating another is always an option
            if scripts.iter().any(|r| same_trigger(unit, r)) {
                unit.add_target(TargetCandidate::new(RecordId::empty(), MatchType::Duplicate, Map::new()));
            }
            unit.targets.sort_by_key(|t| rank(t.match_type));
        }
        Ok(())
    }

    async fn deployment_payload(
        &self,
        source: &SourceContext<'_>,
        _options: &PackageOptions,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        if units.is_empty() {
            return Ok(());
        }
        let ids = units.iter().map(|u| u.id.to_value()).collect();
        let scripts = source.store.find(org::SCRIPTS, &Filter::is_in("_id", ids), &[]).await?;

        for unit in units {
            let mut script = scripts
                .iter()
                .find(|s| id_of(s).as_ref() == Some(&unit.id))
                .cloned()
                .ok_or_else(|| missing_source(unit))?;
            for key in INTERNALS {
                script.remove(key);
            }
            unit.payload = Some(Value::Object(script));
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
        Ok(Some(backup_records(target, org::SCRIPTS).await?))
    }

    async fn rollback(&self, target: &dyn RecordStore, backup: &KindBackup) -> Result<(), MigrationError> {
        restore_records(target, Kind::Script, backup).await
    }

    fn update_mapping(&self, unit: &mut MigrationUnit, record: &Document) -> Result<(), MigrationError> {
        let script_type = str_field(record, "type");
        unit.source = pick(record, &["label", "name", "type"]);
        let descriptors = pick(&configuration(record), descriptor_fields(&script_type));
        unit.source.insert("configuration".to_string(), Value::Object(descriptors));
        Ok(())
    }
}
