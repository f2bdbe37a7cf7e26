//! Shared contract for kind handlers.
//!
//! Every kind implements [`KindHandler`]. Operations a handler does not
//! override fail with [`MigrationError::Unimplemented`] so a missing override
//! is diagnosable at the first call.

pub mod acl;
pub mod builtins;
pub mod did;
pub mod matching;
pub mod org;
pub mod resolve;
pub mod selection;

use std::collections::HashMap;

use async_trait::async_trait;
use deploy_models::{Dependency, Kind, MigrationUnit, PackageOptions, RecordId, Selection};
use record_store::{Document, Filter, RecordStore};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::backup::KindBackup;
use crate::contract::builtins::{is_builtin_principal, BUILTIN_OBJECTS};
use crate::contract::resolve::{PrincipalIndex, Resolution, ResolutionTable, Resolver};
use crate::errors::MigrationError;

/// Whether a write pass persists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Dry run against a scratch copy of the target
    Validating,
    Deploying,
}

/// Read-only view of the source environment with lookups handlers share
pub struct SourceContext<'a> {
    pub store: &'a dyn RecordStore,
    pub org: Document,
    object_ids: HashMap<String, RecordId>,
    library_ids: HashMap<String, RecordId>,
    template_ids: HashMap<(String, String), RecordId>,
}

impl<'a> SourceContext<'a> {
    pub async fn load(store: &'a dyn RecordStore) -> Result<Self, MigrationError> {
        let org = org::load_org(store).await?;

        let mut object_ids: HashMap<String, RecordId> = BUILTIN_OBJECTS
            .iter()
            .map(|(name, _, lookup)| (name.to_string(), RecordId::from(*lookup)))
            .collect();
        for object in store.find(org::OBJECTS, &Filter::All, &["name", "lookup"]).await? {
            if let (Some(name), Some(lookup)) = (
                object.get("name").and_then(Value::as_str),
                object.get("lookup").and_then(RecordId::from_any_value),
            ) {
                object_ids.insert(name.to_string(), lookup);
            }
        }

        let mut library_ids = HashMap::new();
        let libraries = store
            .find(
                org::SCRIPTS,
                &Filter::eq("type", "library"),
                &["configuration.export"],
            )
            .await?;
        for library in libraries {
            let export = org::value_at(&library, "configuration.export").and_then(Value::as_str);
            if let (Some(export), Some(id)) = (export, library.get("_id").and_then(RecordId::from_any_value)) {
                library_ids.entry(export.to_string()).or_insert(id);
            }
        }

        let mut template_ids = HashMap::new();
        let base_templates = Filter::Exists("locale".to_string(), false);
        for template in store.find(org::TEMPLATES, &base_templates, &["type", "name"]).await? {
            let key = (str_field(&template, "type"), str_field(&template, "name"));
            if let Some(id) = template.get("_id").and_then(RecordId::from_any_value) {
                template_ids.entry(key).or_insert(id);
            }
        }

        Ok(Self {
            store,
            org,
            object_ids,
            library_ids,
            template_ids,
        })
    }

    /// Lookup id of an object definition by name
    pub fn object_id(&self, name: &str) -> Option<&RecordId> {
        self.object_ids.get(name)
    }

    /// Id of the library script with this export
    pub fn library_id(&self, export: &str) -> Option<&RecordId> {
        self.library_ids.get(export)
    }

    /// Representative id of the template with this type and name
    pub fn template_id(&self, template_type: &str, name: &str) -> Option<&RecordId> {
        self.template_ids
            .get(&(template_type.to_string(), name.to_string()))
    }

    pub fn service_account_id(&self, name: &str) -> Option<RecordId> {
        org::read_docs(&self.org, org::SERVICE_ACCOUNTS)
            .iter()
            .find(|sa| sa.get("name").and_then(Value::as_str) == Some(name))
            .and_then(|sa| sa.get("_id").and_then(RecordId::from_any_value))
    }

    fn has_embedded(&self, path: &str, id: &RecordId) -> bool {
        org::read_docs(&self.org, path)
            .iter()
            .any(|doc| doc.get("_id").and_then(Value::as_str) == Some(id.as_str()))
    }

    /// Kind of a principal referenced by id; `None` for built-ins
    pub fn principal_kind(&self, id: &RecordId) -> Option<Kind> {
        if is_builtin_principal(id.as_str()) {
            None
        } else if self.has_embedded(org::SERVICE_ACCOUNTS, id) {
            Some(Kind::ServiceAccount)
        } else if self.has_embedded(org::ROLES, id) {
            Some(Kind::Role)
        } else {
            Some(Kind::Account)
        }
    }

    /// Dependencies for the `scriptIds` and `serviceAccountIds` a record was
    /// enriched with during enumeration
    pub fn script_dependencies(&self, record: &Document) -> Vec<Dependency> {
        let mut dependencies = Vec::new();
        for (field, kind) in [("scriptIds", Kind::Script), ("serviceAccountIds", Kind::ServiceAccount)] {
            for id in string_list(record.get(field)) {
                dependencies.push(Dependency::new(RecordId::from(id), kind));
            }
        }
        dependencies
    }

    /// Resolve `script.requires` exports and `script.serviceAccounts` names to
    /// ids. Unknown names are kept as-is so the package build reports them as
    /// missing dependencies.
    pub fn enrich_script_references(&self, record: &mut Document) {
        let script = record.get("script").cloned().unwrap_or(Value::Null);
        self.attach_script_references(
            record,
            script.get("requires"),
            script.get("serviceAccounts"),
            Unresolved::Keep,
        );
    }

    /// Store the ids of required library exports and service account names
    /// as `scriptIds` and `serviceAccountIds`
    pub fn attach_script_references(
        &self,
        record: &mut Document,
        requires: Option<&Value>,
        service_accounts: Option<&Value>,
        unresolved: Unresolved,
    ) {
        let resolve = |name: String, id: Option<RecordId>| match (id, unresolved) {
            (Some(id), _) => Some(id.to_value()),
            (None, Unresolved::Keep) => Some(Value::String(name)),
            (None, Unresolved::Drop) => None,
        };
        let script_ids: Vec<Value> = string_list(requires)
            .into_iter()
            .filter_map(|export| {
                let id = self.library_id(&export).cloned();
                resolve(export, id)
            })
            .collect();
        let service_account_ids: Vec<Value> = string_list(service_accounts)
            .into_iter()
            .filter_map(|name| {
                let id = self.service_account_id(&name);
                resolve(name, id)
            })
            .collect();
        record.insert("scriptIds".to_string(), Value::Array(script_ids));
        record.insert("serviceAccountIds".to_string(), Value::Array(service_account_ids));
    }
}

/// Treatment of a library export or service account name with no source record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unresolved {
    /// Keep the raw name, so the build fails on it as a missing dependency
    Keep,
    /// Leave it out of the dependencies
    Drop,
}

/// Mutable state threaded through one validate or deploy run
pub struct WriteContext<'a> {
    /// Target store, or a scratch copy of it when validating
    pub store: &'a dyn RecordStore,
    pub units: &'a [MigrationUnit],
    pub options: &'a PackageOptions,
    /// Recorded as creator and updater of written records
    pub principal: &'a RecordId,
    pub mode: WriteMode,
    pub resolutions: ResolutionTable,
    pub principals: PrincipalIndex,
}

impl<'a> WriteContext<'a> {
    pub fn new(
        store: &'a dyn RecordStore,
        units: &'a [MigrationUnit],
        options: &'a PackageOptions,
        principal: &'a RecordId,
        mode: WriteMode,
    ) -> Self {
        Self {
            store,
            units,
            options,
            principal,
            mode,
            resolutions: ResolutionTable::seeded(units),
            principals: PrincipalIndex::default(),
        }
    }

    pub fn validating(&self) -> bool {
        self.mode == WriteMode::Validating
    }

    pub fn units_of(&self, kind: Kind) -> impl Iterator<Item = &'a MigrationUnit> + 'a {
        self.units.iter().filter(move |u| u.kind == kind)
    }

    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(self.units, &self.resolutions, &self.principals)
    }

    /// Reload target roles and service accounts before a kind is written
    pub async fn refresh_principals(&mut self) -> Result<(), MigrationError> {
        self.principals = PrincipalIndex::load(self.store).await?;
        Ok(())
    }

    /// Record what a unit resolved to so later units can find it
    pub fn resolved(&mut self, unit: &MigrationUnit, target: RecordId) {
        self.resolutions.record(unit.kind, unit.id.clone(), target);
    }

    /// The target a unit writes to: the resolved id, or `None` for create-new
    pub fn chosen_target(&self, unit: &MigrationUnit) -> Result<Option<RecordId>, MigrationError> {
        match &unit.target {
            Some(target) if target.is_empty_sentinel() => Ok(None),
            Some(target) => Ok(Some(target.clone())),
            None => Err(MigrationError::InvalidArgument(format!(
                "No target chosen for {} {}",
                unit.kind,
                unit.label()
            ))),
        }
    }

    /// Map a principal reference. Built-ins pass; when validating, a principal
    /// whose unit is not created yet maps to the anonymous principal.
    pub fn map_principal(
        &self,
        unit: &MigrationUnit,
        principal: &RecordId,
        kinds: &[Kind],
    ) -> Result<RecordId, MigrationError> {
        if is_builtin_principal(principal.as_str()) {
            return Ok(principal.clone());
        }
        let resolver = self.resolver();
        match resolver.resolve(principal, kinds) {
            Resolution::Resolved(target) => Ok(target),
            Resolution::Pending if self.validating() => Ok(builtins::anonymous()),
            _ => resolver.target_of(principal, kinds).ok_or_else(|| {
                MigrationError::NotFound(format!(
                    "Missing mapping target principal for {} {}: {}",
                    unit.kind,
                    unit.label(),
                    principal
                ))
            }),
        }
    }
}

impl WriteContext<'_> {
    /// Target id of a non-principal reference such as an app or object.
    /// `None` means the referenced unit is created later in a validating run.
    pub fn map_reference(
        &self,
        unit: &MigrationUnit,
        reference: &RecordId,
        kind: Kind,
    ) -> Result<Option<RecordId>, MigrationError> {
        match self.resolver().resolve(reference, &[kind]) {
            Resolution::Resolved(target) => Ok(Some(target)),
            Resolution::Pending if self.validating() => Ok(None),
            Resolution::Pending => Err(MigrationError::NotFound(format!(
                "Unresolved mapping target {} for {} {}: {}",
                kind,
                unit.kind,
                unit.label(),
                reference
            ))),
            Resolution::Missing => Err(MigrationError::NotFound(format!(
                "Missing mapping source {} for {} {}: {}",
                kind,
                unit.kind,
                unit.label(),
                reference
            ))),
        }
    }

    /// Remap a role list for a unit being written. Built-ins pass; when
    /// validating, roles whose unit is not created yet are skipped; any other
    /// unresolved role fails.
    pub fn map_unit_roles(
        &self,
        unit: &MigrationUnit,
        roles: &[RecordId],
    ) -> Result<Vec<RecordId>, MigrationError> {
        let resolver = self.resolver();
        let mut mapped = Vec::new();
        for role in roles {
            if is_builtin_principal(role.as_str()) {
                mapped.push(role.clone());
                continue;
            }
            match resolver.resolve(role, &[Kind::Role]) {
                Resolution::Resolved(target) => mapped.push(target),
                Resolution::Pending if self.validating() => {}
                _ => match resolver.role(role) {
                    Some(target) => mapped.push(target),
                    None => {
                        return Err(MigrationError::NotFound(format!(
                            "Missing mapping target role for {} {}: {}",
                            unit.kind,
                            unit.label(),
                            role
                        )))
                    }
                },
            }
        }
        Ok(mapped)
    }
}

/// Deserialize a unit's payload
pub fn payload_of<T: DeserializeOwned>(unit: &MigrationUnit) -> Result<T, MigrationError> {
    let payload = unit.payload.as_ref().ok_or_else(|| {
        MigrationError::NotFound(format!("Missing payload for {} {}", unit.kind, unit.label()))
    })?;
    Ok(serde_json::from_value(payload.clone())?)
}

pub fn str_field(record: &Document, key: &str) -> String {
    record
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Strings of a JSON array; anything else reads as empty
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Id-shaped strings of a JSON array
pub fn id_list(value: Option<&Value>) -> Vec<RecordId> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(RecordId::from_value).collect(),
        _ => Vec::new(),
    }
}

/// Copy the listed keys of a record that are present
pub fn pick(record: &Document, keys: &[&str]) -> Document {
    keys.iter()
        .filter_map(|key| record.get(*key).map(|v| (key.to_string(), v.clone())))
        .collect()
}

pub fn unimplemented(kind: Kind, operation: &'static str) -> MigrationError {
    MigrationError::Unimplemented { kind, operation }
}

/// Per-kind migration contract
#[async_trait]
pub trait KindHandler: Send + Sync {
    fn kind(&self) -> Kind;

    /// Cross-references of one source record
    fn dependencies(
        &self,
        _source: &SourceContext<'_>,
        _record: &Document,
    ) -> Result<Vec<Dependency>, MigrationError> {
        Err(unimplemented(self.kind(), "dependencies"))
    }

    /// Candidate source records honoring the selection
    async fn source_mapping_docs(
        &self,
        _source: &SourceContext<'_>,
        _selection: &Selection,
    ) -> Result<Vec<Document>, MigrationError> {
        Err(unimplemented(self.kind(), "source_mapping_docs"))
    }

    /// Recompute each unit's target candidates
    async fn match_source_mappings(
        &self,
        _target: &dyn RecordStore,
        _units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        Err(unimplemented(self.kind(), "match_source_mappings"))
    }

    /// Fill each unit's payload from the source
    async fn deployment_payload(
        &self,
        _source: &SourceContext<'_>,
        _options: &PackageOptions,
        _units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        Err(unimplemented(self.kind(), "deployment_payload"))
    }

    /// Run the write against a scratch target and surface errors
    async fn validate_for_target(&self, _ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        Err(unimplemented(self.kind(), "validate_for_target"))
    }

    async fn deploy(&self, _ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        Err(unimplemented(self.kind(), "deploy"))
    }

    /// Snapshot of the kind's target state; `None` for kinds never written
    async fn create_backup(&self, _target: &dyn RecordStore) -> Result<Option<KindBackup>, MigrationError> {
        Err(unimplemented(self.kind(), "create_backup"))
    }

    async fn rollback(&self, _target: &dyn RecordStore, _backup: &KindBackup) -> Result<(), MigrationError> {
        Err(unimplemented(self.kind(), "rollback"))
    }

    /// Refresh a unit's display snapshot from a loaded source record
    fn update_mapping(&self, _unit: &mut MigrationUnit, _record: &Document) -> Result<(), MigrationError> {
        Err(unimplemented(self.kind(), "update_mapping"))
    }
}
