//! Saved views

use std::collections::HashMap;

use async_trait::async_trait;
use deploy_models::{Dependency, Kind, MatchType, MigrationUnit, PackageOptions, RecordId, Selection};
use record_store::{Document, Filter, RecordStore};
use serde_json::Value;
use tracing::debug;

use crate::backup::{backup_records, restore_records, KindBackup};
use crate::contract::acl::{acl_dependencies, acl_to_value, map_acl_to_target, parse_acl};
use crate::contract::matching::{by_identifier, match_unit, same_field, Rule};
use crate::contract::selection::{select_docs, SelectQuery};
use crate::contract::{org, payload_of, pick, str_field, KindHandler, SourceContext, WriteContext};
use crate::errors::MigrationError;
use crate::handlers::{id_of, missing_source, missing_target, stamp_authorship, unique, write_record};

const SOURCE_FIELDS: [&str; 7] = ["label", "name", "sourceObject", "principal", "acl", "objectAcl", "script"];
const WRITE_FIELDS: [&str; 13] = [
    "acl",
    "active",
    "description",
    "label",
    "limit",
    "name",
    "objectAcl",
    "paths",
    "postType",
    "principal",
    "query",
    "skip",
    "sourceObject",
];
const PRINCIPAL_KINDS: [Kind; 3] = [Kind::Account, Kind::Role, Kind::ServiceAccount];

/// Script source text, whether stored inline or as a script document
fn script_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Object(script)) => script.get("script").and_then(Value::as_str).unwrap_or_default().to_string(),
        _ => String::new(),
    }
}

pub struct ViewHandler;

impl ViewHandler {
    /// Every chosen target must exist, and no other view, in the target or
    /// earlier in the package, may hold the name
    async fn check_targets(&self, ctx: &WriteContext<'_>) -> Result<(), MigrationError> {
        let existing = ctx.store.find(org::VIEWS, &Filter::All, &["name"]).await?;
        let mut claimed: HashMap<String, Option<RecordId>> = HashMap::new();

        for unit in ctx.units_of(Kind::View) {
            let target = ctx.chosen_target(unit)?;
            if let Some(target_id) = &target {
                if !existing.iter().any(|v| id_of(v).as_ref() == Some(target_id)) {
                    return Err(missing_target(unit));
                }
            }

            let name = match &unit.payload {
                Some(payload) => payload.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                None => str_field(&unit.source, "name"),
            };
            let duplicate = existing.iter().any(|v| {
                v.get("name").and_then(Value::as_str) == Some(name.as_str())
                    && target.as_ref().map_or(true, |t| id_of(v).as_ref() != Some(t))
            });
            // Two units may share a name only when they update the same view
            let repeated = match claimed.get(&name) {
                Some(Some(earlier)) => target.as_ref() != Some(earlier),
                Some(None) => true,
                None => false,
            };
            if duplicate || repeated {
                return Err(MigrationError::Conflict(format!(
                    "Duplicate mapping target view: {}",
                    unit.label()
                )));
            }
            claimed.insert(name, target);
        }
        Ok(())
    }

    fn build_record(&self, ctx: &WriteContext<'_>, unit: &MigrationUnit, source: &Document) -> Result<Document, MigrationError> {
        let mut record = pick(source, &WRITE_FIELDS);

        if let Some(Value::Array(queries)) = record.get_mut("query") {
            for query in queries.iter_mut().filter_map(Value::as_object_mut) {
                query.remove("_id");
                query.remove("variables");
            }
        }

        let principal = match source.get("principal").and_then(RecordId::from_value) {
            Some(principal) => ctx.map_principal(unit, &principal, &PRINCIPAL_KINDS)?.to_value(),
            None => Value::Null,
        };
        record.insert("principal".to_string(), principal);

        let resolver = ctx.resolver();
        let acl = parse_acl(source.get("acl"))?;
        record.insert("acl".to_string(), acl_to_value(&map_acl_to_target(&resolver, &acl, true)));
        let object_acl = parse_acl(source.get("objectAcl"))?;
        record.insert("objectAcl".to_string(), acl_to_value(&map_acl_to_target(&resolver, &object_acl, false)));

        record.insert("script".to_string(), Value::String(script_text(source.get("script"))));
        stamp_authorship(&mut record, source, ctx.principal);
        Ok(record)
    }

    async fn write(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        for unit in ctx.units_of(Kind::View) {
            let source: Document = payload_of(unit)?;
            let target = ctx.chosen_target(unit)?;
            let record = self.build_record(ctx, unit, &source)?;
            let id = write_record(ctx.store, org::VIEWS, unit, target, record).await?;
            debug!("View {} written as {}", unit.label(), id);
            ctx.resolved(unit, id);
        }
        Ok(())
    }
}

#[async_trait]
impl KindHandler for ViewHandler {
    fn kind(&self) -> Kind {
        Kind::View
    }

    fn dependencies(&self, source: &SourceContext<'_>, record: &Document) -> Result<Vec<Dependency>, MigrationError> {
        let mut dependencies = Vec::new();

        let object = record.get("sourceObject").and_then(Value::as_str).unwrap_or_default();
        if let Some(lookup) = source.object_id(object) {
            dependencies.push(Dependency::new(lookup.clone(), Kind::Object));
        }
        if let Some(principal) = record.get("principal").and_then(RecordId::from_value) {
            if let Some(kind) = source.principal_kind(&principal) {
                dependencies.push(Dependency::new(principal, kind));
            }
        }
        dependencies.extend(acl_dependencies(&parse_acl(record.get("acl"))?));
        dependencies.extend(acl_dependencies(&parse_acl(record.get("objectAcl"))?));
        dependencies.extend(source.script_dependencies(record));
        Ok(unique(dependencies))
    }

    async fn source_mapping_docs(
        &self,
        source: &SourceContext<'_>,
        selection: &Selection,
    ) -> Result<Vec<Document>, MigrationError> {
        let query = SelectQuery::new(org::VIEWS).fields(&SOURCE_FIELDS);
        let mut views = select_docs(source.store, selection, query).await?;
        for view in views.iter_mut() {
            source.enrich_script_references(view);
        }
        Ok(views)
    }

    async fn match_source_mappings(
        &self,
        target: &dyn RecordStore,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        let views = target.find(org::VIEWS, &Filter::All, &["did", "label", "name"]).await?;
        let by_name = |u: &MigrationUnit, r: &Document| same_field(u, r, "name", "name");
        let by_label = |u: &MigrationUnit, r: &Document| same_field(u, r, "label", "label");
        let rules: [Rule<'_>; 3] = [
            (MatchType::Identifier, &by_identifier),
            (MatchType::Name, &by_name),
            (MatchType::Label, &by_label),
        ];
        for unit in units {
            match_unit(unit, &views, "_id", &["label", "name"], &rules);
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
        let views = source.store.find(org::VIEWS, &Filter::is_in("_id", ids), &[]).await?;
        for unit in units {
            let view = views
                .iter()
                .find(|v| id_of(v).as_ref() == Some(&unit.id))
                .cloned()
                .ok_or_else(|| missing_source(unit))?;
            unit.payload = Some(Value::Object(view));
        }
        Ok(())
    }

    async fn validate_for_target(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        self.check_targets(ctx).await?;
        self.write(ctx).await
    }

    async fn deploy(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        self.check_targets(ctx).await?;
        self.write(ctx).await
    }

    async fn create_backup(&self, target: &dyn RecordStore) -> Result<Option<KindBackup>, MigrationError> {
        Ok(Some(backup_records(target, org::VIEWS).await?))
    }

    async fn rollback(&self, target: &dyn RecordStore, backup: &KindBackup) -> Result<(), MigrationError> {
        restore_records(target, Kind::View, backup).await
    }

    fn update_mapping(&self, unit: &mut MigrationUnit, record: &Document) -> Result<(), MigrationError> {
        unit.source.insert("label".to_string(), Value::String(str_field(record, "label")));
        unit.source.insert("name".to_string(), Value::String(str_field(record, "name")));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::WriteMode;
    use record_store::MemoryStore;
    use serde_json::json;

    const VIEW: &str = "a00000000000000000000081";
    const ROLE: &str = "a00000000000000000000082";
    const TARGET_ROLE: &str = "b00000000000000000000082";
    const EXISTING: &str = "b00000000000000000000081";

    fn units(target: RecordId) -> Vec<MigrationUnit> {
        let mut view = MigrationUnit::new(RecordId::from(VIEW), Kind::View);
        view.target = Some(target);
        view.source.insert("label".into(), json!("Open cases"));
        view.payload = Some(json!({
            "_id": VIEW,
            "name": "c_open_cases",
            "label": "Open cases",
            "sourceObject": "c_case",
            "acl": [{"type": 3, "target": ROLE, "allow": 4}],
            "objectAcl": [{"type": 3, "target": ROLE, "allow": 4}],
            "query": [{"_id": "q", "name": "where", "value": "{}", "variables": ["x"]}],
            "script": {"script": "return 1", "requires": []}
        }));
        let mut role = MigrationUnit::new(RecordId::from(ROLE), Kind::Role);
        role.target = Some(RecordId::from(TARGET_ROLE));
        vec![view, role]
    }

    async fn target_with_view(name: &str) -> MemoryStore {
        let store = MemoryStore::new();
        let view = json!({"_id": EXISTING, "name": name, "did": []});
        store.insert(org::VIEWS, view.as_object().cloned().unwrap()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_view_write_cleans_queries_and_maps_acl() {
        let units = units(RecordId::empty());
        let target = MemoryStore::new();
        let options = PackageOptions::default();
        let principal = RecordId::from("b00000000000000000000089");
        let mut ctx = WriteContext::new(&target, &units, &options, &principal, WriteMode::Deploying);
        ViewHandler.deploy(&mut ctx).await.unwrap();

        let written = target.records(org::VIEWS).await;
        assert_eq!(written.len(), 1);
        let view = &written[0];
        assert_eq!(view["query"], json!([{"name": "where", "value": "{}"}]));
        assert_eq!(view["acl"], json!([{"type": 3, "target": TARGET_ROLE}]));
        assert_eq!(view["objectAcl"], json!([{"type": 3, "target": TARGET_ROLE, "allow": 4}]));
        assert_eq!(view["script"], json!("return 1"));
        assert_eq!(view["principal"], Value::Null);
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let creating = units(RecordId::empty());
        let target = target_with_view("c_open_cases").await;
        let options = PackageOptions::default();
        let principal = RecordId::from("b00000000000000000000089");
        let mut ctx = WriteContext::new(&target, &creating, &options, &principal, WriteMode::Validating);
        let err = ViewHandler.validate_for_target(&mut ctx).await.unwrap_err();
        assert_eq!(err.code(), "conflict");

        let updating = units(RecordId::from(EXISTING));
        let mut ctx = WriteContext::new(&target, &updating, &options, &principal, WriteMode::Deploying);
        ViewHandler.deploy(&mut ctx).await.unwrap();
        assert_eq!(target.records(org::VIEWS).await[0]["did"], json!([VIEW]));
    }

    #[tokio::test]
    async fn test_missing_target_view() {
        let units = units(RecordId::from("b0000000000000000000008f"));
        let target = MemoryStore::new();
        let options = PackageOptions::default();
        let principal = RecordId::from("b00000000000000000000089");
        let mut ctx = WriteContext::new(&target, &units, &options, &principal, WriteMode::Validating);
        let err = ViewHandler.validate_for_target(&mut ctx).await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn test_same_name_twice_in_package_conflicts() {
        let mut units = units(RecordId::empty());
        let mut twin = units[0].clone();
        twin.id = RecordId::from("a00000000000000000000083");
        if let Some(Value::Object(payload)) = twin.payload.as_mut() {
            payload.insert("_id".into(), json!("a00000000000000000000083"));
        }
        units.push(twin);

        let target = MemoryStore::new();
        let options = PackageOptions::default();
        let principal = RecordId::from("b00000000000000000000089");
        let mut ctx = WriteContext::new(&target, &units, &options, &principal, WriteMode::Deploying);
        let err = ViewHandler.deploy(&mut ctx).await.unwrap_err();
        assert_eq!(err.code(), "conflict");
        assert!(target.records(org::VIEWS).await.is_empty());
    }
}