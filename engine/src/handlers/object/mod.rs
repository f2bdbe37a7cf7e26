//! Object definitions (schemas), keyed by lookup id.
//!
//! Writes happen in two passes. The first creates or updates every top-level
//! record so that `sourceObject` references can be satisfied; the second
//! merges properties, object types and feed definitions. Values that point
//! at other properties are deferred until both passes are done.

pub mod properties;

use async_trait::async_trait;
use deploy_models::{Dependency, Kind, MatchType, MigrationUnit, PackageOptions, RecordId, Selection};
use record_store::{Document, Filter, Patch, RecordStore};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::backup::{backup_records, restore_records, KindBackup};
use crate::contract::acl::{acl_dependencies, acl_to_value, map_acl_to_target, parse_acl, role_dependencies};
use crate::contract::builtins::{is_builtin_object, BUILTIN_OBJECTS};
use crate::contract::did::{DeploymentIds, DID_FIELD};
use crate::contract::matching::{by_identifier, match_unit, same_field, Rule};
use crate::contract::selection::{select_docs, SelectQuery};
use crate::contract::{id_list, org, payload_of, pick, str_field, KindHandler, SourceContext, WriteContext};
use crate::errors::MigrationError;
use crate::handlers::{missing_source, missing_target, stamp_authorship, unique};

use self::properties::{
    apply_deferred, docs_of, remap_locale_ids, strip_top_level_locale_ids, DeferredWrite, LocaleMapping,
    PropertyWriter,
};

const TOP_FIELDS: [&str; 13] = [
    "localized",
    "label",
    "description",
    "active",
    "defaultAcl",
    "createAcl",
    "shareAcl",
    "hasETag",
    "isVersioned",
    "isUnmanaged",
    "shareChain",
    "allowConnections",
    "connectionOptions",
];
const OBJECT_ACLS: [(&str, bool); 3] = [("defaultAcl", false), ("createAcl", true), ("shareAcl", false)];
const DEFINITION_FIELDS: [&str; 5] = ["properties", "objectTypes", "feedDefinition", "locales", "uniqueKey"];
const DEFAULT_COLLECTION: &str = "contexts";

fn by_lookup(lookup: &RecordId) -> Filter {
    Filter::eq("lookup", lookup.to_value())
}

/// Placeholder for a native object definition without a stored extension
fn builtin_placeholder(name: &str, label: &str, lookup: &str) -> Document {
    let placeholder = json!({
        "_id": lookup,
        "lookup": lookup,
        "name": name,
        "label": label,
        "properties": [],
        "objectTypes": [],
        "feedDefinition": [],
        "concrete": false,
    });
    placeholder.as_object().cloned().unwrap_or_default()
}

fn object_dependency(source: &SourceContext<'_>, name: Option<&Value>) -> Option<Dependency> {
    let name = name.and_then(Value::as_str)?;
    source
        .object_id(name)
        .map(|lookup| Dependency::new(lookup.clone(), Kind::Object))
}

/// Dependencies of a property list, including nested properties and set documents
fn property_dependencies(
    source: &SourceContext<'_>,
    properties: &[Document],
    dependencies: &mut Vec<Dependency>,
) -> Result<(), MigrationError> {
    for property in properties {
        dependencies.extend(acl_dependencies(&parse_acl(property.get("acl"))?));
        match str_field(property, "type").as_str() {
            "Reference" => {
                dependencies.extend(object_dependency(source, property.get("sourceObject")));
                dependencies.extend(acl_dependencies(&parse_acl(property.get("defaultAcl"))?));
                dependencies.extend(acl_dependencies(&parse_acl(property.get("pacl"))?));
                dependencies.extend(role_dependencies(&id_list(property.get("roles"))));
            }
            "ObjectId" => {
                dependencies.extend(object_dependency(source, property.get("sourceObject")));
            }
            "List" => {
                dependencies.extend(object_dependency(source, property.get("sourceObject")));
                dependencies.extend(acl_dependencies(&parse_acl(property.get("defaultAcl"))?));
                dependencies.extend(acl_dependencies(&parse_acl(property.get("createAcl"))?));
                dependencies.extend(role_dependencies(&id_list(property.get("roles"))));
            }
            "String" => {
                let localization = property.get("localization").and_then(|l| l.get("acl"));
                dependencies.extend(acl_dependencies(&parse_acl(localization)?));
            }
            _ => {}
        }
        property_dependencies(source, &docs_of(property, "properties"), dependencies)?;
        for set_doc in docs_of(property, "documents") {
            property_dependencies(source, &docs_of(&set_doc, "properties"), dependencies)?;
        }
    }
    Ok(())
}

pub struct ObjectHandler;

impl ObjectHandler {
    /// First pass: the top-level record
    async fn write_object(&self, ctx: &mut WriteContext<'_>, unit: &MigrationUnit) -> Result<(), MigrationError> {
        let source: Document = payload_of(unit)?;
        let target = ctx.chosen_target(unit)?;

        let mut record = pick(&source, &TOP_FIELDS);
        {
            let resolver = ctx.resolver();
            for (key, for_create) in OBJECT_ACLS {
                let entries = parse_acl(source.get(key))?;
                record.insert(key.to_string(), acl_to_value(&map_acl_to_target(&resolver, &entries, for_create)));
            }
        }
        stamp_authorship(&mut record, &source, ctx.principal);

        let existing = match &target {
            Some(lookup) => ctx.store.find_one(org::OBJECTS, &by_lookup(lookup)).await?,
            None => None,
        };
        let lookup = match (target, existing) {
            (Some(lookup), Some(_)) => {
                let patch = record
                    .into_iter()
                    .fold(Patch::new(), |patch, (key, value)| patch.set(key, value))
                    .add_to_set(DID_FIELD, unit.id.to_value());
                ctx.store.update_one(org::OBJECTS, &by_lookup(&lookup), &patch).await?;
                lookup
            }
            (Some(lookup), None) if is_builtin_object(lookup.as_str()) => {
                self.create_object(ctx, unit, &source, record, lookup).await?
            }
            (Some(_), None) => return Err(missing_target(unit)),
            (None, _) => self.create_object(ctx, unit, &source, record, RecordId::generate()).await?,
        };

        debug!("Object {} written as {}", unit.label(), lookup);
        ctx.resolved(unit, lookup);
        Ok(())
    }

    async fn create_object(
        &self,
        ctx: &WriteContext<'_>,
        unit: &MigrationUnit,
        source: &Document,
        mut record: Document,
        lookup: RecordId,
    ) -> Result<RecordId, MigrationError> {
        let collection = org::value_at(source, "dataset.collection")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_COLLECTION);
        record.insert("_id".to_string(), RecordId::generate().to_value());
        record.insert("lookup".to_string(), lookup.to_value());
        record.insert("name".to_string(), Value::String(str_field(source, "name")));
        record.insert("dataset".to_string(), json!({ "collection": collection }));
        record.insert(DID_FIELD.to_string(), DeploymentIds::from_source(&unit.id).to_value());
        for field in ["properties", "objectTypes", "feedDefinition"] {
            record.insert(field.to_string(), Value::Array(Vec::new()));
        }
        ctx.store.insert(org::OBJECTS, record).await?;
        Ok(lookup)
    }

    /// Second pass: properties, object types, feeds, locales and unique key.
    /// Returns the writes that must wait for every object.
    async fn write_definitions(&self, ctx: &WriteContext<'_>, unit: &MigrationUnit) -> Result<Vec<DeferredWrite>, MigrationError> {
        let source: Document = payload_of(unit)?;
        let lookup = ctx
            .resolutions
            .get(Kind::Object, &unit.id)
            .cloned()
            .ok_or_else(|| missing_target(unit))?;
        let filter = by_lookup(&lookup);
        let mut object = ctx
            .store
            .find_one(org::OBJECTS, &filter)
            .await?
            .ok_or_else(|| missing_target(unit))?;

        let mut writer = PropertyWriter::new(ctx.resolver(), unit.label(), lookup);
        let mut property_locales: Vec<LocaleMapping> = Vec::new();
        let mut type_locales: Vec<LocaleMapping> = Vec::new();

        writer.write_properties(&docs_of(&source, "properties"), &mut object, &[], Some(&mut property_locales))?;
        writer.write_object_types(&source, &mut object, &mut type_locales)?;
        writer.write_feed_definitions(&source, &mut object)?;

        let localized = source.get("localized").and_then(Value::as_bool) != Some(false);
        if let Some(mut locales) = source.get("locales").filter(|l| localized && l.is_object()).cloned() {
            if let Some(properties) = locales.get_mut("properties") {
                remap_locale_ids(properties, &property_locales);
            }
            if let Some(object_types) = locales.get_mut("objectTypes") {
                remap_locale_ids(object_types, &type_locales);
            }
            strip_top_level_locale_ids(&mut locales);
            object.insert("locales".to_string(), locales);
        }
        if let Some(unique_key) = source.get("uniqueKey") {
            object.insert("uniqueKey".to_string(), unique_key.clone());
        }

        let patch = DEFINITION_FIELDS
            .iter()
            .filter_map(|field| object.get(*field).map(|value| (*field, value.clone())))
            .fold(Patch::new(), |patch, (field, value)| patch.set(field, value));
        ctx.store.update_one(org::OBJECTS, &filter, &patch).await?;

        Ok(writer.deferred)
    }

    async fn write(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        let concrete: Vec<&MigrationUnit> = ctx.units_of(Kind::Object).filter(|u| u.is_concrete()).collect();

        for unit in &concrete {
            self.write_object(ctx, unit).await?;
        }

        let mut deferred = Vec::new();
        for unit in &concrete {
            deferred.extend(self.write_definitions(ctx, unit).await?);
        }
        if !deferred.is_empty() {
            info!("Applying {} deferred property writes", deferred.len());
        }
        apply_deferred(ctx.store, deferred).await
    }
}

#[async_trait]
impl KindHandler for ObjectHandler {
    fn kind(&self) -> Kind {
        Kind::Object
    }

    fn dependencies(&self, source: &SourceContext<'_>, record: &Document) -> Result<Vec<Dependency>, MigrationError> {
        let mut dependencies = Vec::new();
        for (key, _) in OBJECT_ACLS {
            dependencies.extend(acl_dependencies(&parse_acl(record.get(key))?));
        }
        property_dependencies(source, &docs_of(record, "properties"), &mut dependencies)?;

        for feed in docs_of(record, "feedDefinition") {
            for key in ["contextReadAcl", "postCreateAcl", "postInstanceAcl"] {
                dependencies.extend(acl_dependencies(&parse_acl(feed.get(key))?));
            }
            for segment_field in ["body", "comments"] {
                for segment in docs_of(&feed, segment_field) {
                    property_dependencies(source, &docs_of(&segment, "properties"), &mut dependencies)?;
                }
            }
        }
        for object_type in docs_of(record, "objectTypes") {
            property_dependencies(source, &docs_of(&object_type, "properties"), &mut dependencies)?;
        }
        Ok(unique(dependencies))
    }

    /// Stored definitions, plus placeholders for selected native objects
    /// that have no stored extension
    async fn source_mapping_docs(
        &self,
        source: &SourceContext<'_>,
        selection: &Selection,
    ) -> Result<Vec<Document>, MigrationError> {
        let query = SelectQuery::new(org::OBJECTS).id_field("lookup");
        let mut objects = select_docs(source.store, selection, query).await?;
        for object in objects.iter_mut() {
            object.insert("concrete".to_string(), Value::Bool(true));
        }

        for (name, label, lookup) in BUILTIN_OBJECTS {
            let stored = objects.iter().any(|o| o.get("lookup").and_then(Value::as_str) == Some(lookup));
            if !stored && selection.admits(&RecordId::from(lookup)) {
                objects.push(builtin_placeholder(name, label, lookup));
            }
        }
        Ok(objects)
    }

    async fn match_source_mappings(
        &self,
        target: &dyn RecordStore,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        let mut objects = target
            .find(org::OBJECTS, &Filter::All, &["did", "lookup", "name", "label"])
            .await?;
        for (name, label, lookup) in BUILTIN_OBJECTS {
            if !objects.iter().any(|o| o.get("lookup").and_then(Value::as_str) == Some(lookup)) {
                objects.push(builtin_placeholder(name, label, lookup));
            }
        }

        let by_name = |u: &MigrationUnit, r: &Document| same_field(u, r, "name", "name");
        let rules: [Rule<'_>; 2] = [(MatchType::Identifier, &by_identifier), (MatchType::Name, &by_name)];
        for unit in units {
            match_unit(unit, &objects, "lookup", &["lookup", "name", "label"], &rules);
            if !unit.is_concrete() {
                unit.target = match unit.targets.as_slice() {
                    [only] => Some(only.id.clone()),
                    [] => Some(unit.id.clone()),
                    _ => unit.target.take(),
                };
            }
        }
        Ok(())
    }

    async fn deployment_payload(
        &self,
        source: &SourceContext<'_>,
        _options: &PackageOptions,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        let lookups: Vec<Value> = units.iter().filter(|u| u.is_concrete()).map(|u| u.id.to_value()).collect();
        if lookups.is_empty() {
            return Ok(());
        }
        let objects = source.store.find(org::OBJECTS, &Filter::is_in("lookup", lookups), &[]).await?;

        for unit in units.into_iter().filter(|u| u.is_concrete()) {
            let object = objects
                .iter()
                .find(|o| o.get("lookup").and_then(Value::as_str) == Some(unit.id.as_str()))
                .cloned()
                .ok_or_else(|| missing_source(unit))?;
            unit.payload = Some(Value::Object(object));
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
        Ok(Some(backup_records(target, org::OBJECTS).await?))
    }

    async fn rollback(&self, target: &dyn RecordStore, backup: &KindBackup) -> Result<(), MigrationError> {
        restore_records(target, Kind::Object, backup).await
    }

    fn update_mapping(&self, unit: &mut MigrationUnit, record: &Document) -> Result<(), MigrationError> {
        unit.source = pick(record, &["lookup", "name", "label"]);
        let concrete = record.get("concrete").and_then(Value::as_bool).unwrap_or(true);
        unit.source.insert("concrete".to_string(), Value::Bool(concrete));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use record_store::MemoryStore;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_native_objects_are_injected_as_placeholders() {
        let store = MemoryStore::new();
        let stored = json!({"_id": "x1", "lookup": "a000000000000000000000c1", "name": "c_case", "label": "Case"});
        store.insert(org::OBJECTS, doc(stored)).await.unwrap();
        let source = SourceContext::load(&store).await.unwrap();

        let docs = ObjectHandler.source_mapping_docs(&source, &Selection::all()).await.unwrap();
        assert_eq!(docs.len(), 1 + BUILTIN_OBJECTS.len());
        assert_eq!(docs[0]["_id"], json!("a000000000000000000000c1"));
        assert_eq!(docs[0]["concrete"], json!(true));
        assert_eq!(docs[1]["name"], json!("account"));
        assert_eq!(docs[1]["concrete"], json!(false));

        let none = ObjectHandler.source_mapping_docs(&source, &Selection::none()).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_placeholder_targets_are_assigned() {
        let target = MemoryStore::new();
        let (name, label, lookup) = BUILTIN_OBJECTS[0];
        let mut unit = MigrationUnit::new(RecordId::from(lookup), Kind::Object);
        ObjectHandler
            .update_mapping(&mut unit, &builtin_placeholder(name, label, lookup))
            .unwrap();
        assert!(!unit.is_concrete());

        ObjectHandler.match_source_mappings(&target, vec![&mut unit]).await.unwrap();
        assert_eq!(unit.targets.len(), 1);
        assert_eq!(unit.target, Some(RecordId::from(lookup)));
    }

    #[tokio::test]
    async fn test_dependencies_follow_references_and_acl() {
        let store = MemoryStore::new();
        let note = json!({"_id": "x2", "lookup": "a000000000000000000000c2", "name": "c_note"});
        store.insert(org::OBJECTS, doc(note)).await.unwrap();
        let source = SourceContext::load(&store).await.unwrap();

        let record = doc(json!({
            "lookup": "a000000000000000000000c1",
            "defaultAcl": [{"type": 3, "target": "a000000000000000000000d1", "allow": 4}],
            "properties": [
                {"name": "c_note", "type": "Reference", "sourceObject": "c_note"},
                {"name": "c_owner", "type": "Reference", "sourceObject": "account"},
                {"name": "c_meta", "type": "Document", "properties": [
                    {"name": "c_tags", "type": "List", "sourceObject": "c_unknown", "roles": ["a000000000000000000000d2"]}
                ]}
            ]
        }));
        let deps = ObjectHandler.dependencies(&source, &record).unwrap();
        assert_eq!(
            deps,
            vec![
                Dependency::new(RecordId::from("a000000000000000000000d1"), Kind::Role),
                Dependency::new(RecordId::from("a000000000000000000000c2"), Kind::Object),
                Dependency::new(RecordId::from(BUILTIN_OBJECTS[0].2), Kind::Object),
                Dependency::new(RecordId::from("a000000000000000000000d2"), Kind::Role),
            ]
        );
    }
}
