//! Roles, embedded in the org record

use async_trait::async_trait;
use deploy_models::{Dependency, Kind, MatchType, MigrationUnit, PackageOptions, RecordId, Selection};
use record_store::{Document, RecordStore};
use serde_json::Value;
use tracing::debug;

use crate::backup::{backup_embedded, restore_embedded, KindBackup};
use crate::contract::acl::role_dependencies;
use crate::contract::builtins::is_builtin_role;
use crate::contract::matching::{by_identifier, match_unit, same_field, Rule};
use crate::contract::selection::select_embedded;
use crate::contract::{id_list, org, payload_of, pick, KindHandler, SourceContext, WriteContext};
use crate::errors::MigrationError;
use crate::handlers::{embedded_payloads, id_of, position_of, target_docs, upsert_embedded};

fn user_roles(org_record: &Document) -> Vec<Document> {
    org::read_docs(org_record, org::ROLES)
        .into_iter()
        .filter(|r| id_of(r).is_some_and(|id| !is_builtin_role(id.as_str())))
        .collect()
}

pub struct RoleHandler;

impl RoleHandler {
    async fn write(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        let org_record = org::load_org(ctx.store).await?;
        let mut roles = org::read_docs(&org_record, org::ROLES);
        let mut written: Vec<(&MigrationUnit, RecordId, Document)> = Vec::new();

        // Records first so includes can point at roles created in this pass
        for unit in ctx.units_of(Kind::Role) {
            let payload: Document = payload_of(unit)?;
            let target = ctx.chosen_target(unit)?;
            let record = pick(&payload, &["name", "code"]);
            let id = upsert_embedded(&mut roles, unit, target.as_ref(), record)?;
            debug!("Role {} written as {}", unit.label(), id);
            ctx.resolved(unit, id.clone());
            written.push((unit, id, payload));
        }

        for (unit, id, payload) in &written {
            let include = ctx.map_unit_roles(unit, &id_list(payload.get("include")))?;
            if let Some(index) = position_of(&roles, id) {
                let include = include.iter().map(RecordId::to_value).collect();
                roles[index].insert("include".to_string(), Value::Array(include));
            }
        }

        org::save_array(ctx.store, org::ROLES, &roles).await
    }
}

#[async_trait]
impl KindHandler for RoleHandler {
    fn kind(&self) -> Kind {
        Kind::Role
    }

    fn dependencies(&self, _source: &SourceContext<'_>, record: &Document) -> Result<Vec<Dependency>, MigrationError> {
        Ok(role_dependencies(&id_list(record.get("include"))))
    }

    async fn source_mapping_docs(
        &self,
        source: &SourceContext<'_>,
        selection: &Selection,
    ) -> Result<Vec<Document>, MigrationError> {
        Ok(select_embedded(user_roles(&source.org), selection))
    }

    async fn match_source_mappings(
        &self,
        target: &dyn RecordStore,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        let roles: Vec<Document> = target_docs(target, org::ROLES)
            .await?
            .into_iter()
            .filter(|r| id_of(r).is_some_and(|id| !is_builtin_role(id.as_str())))
            .collect();

        let by_code = |u: &MigrationUnit, r: &Document| same_field(u, r, "name", "code");
        let by_name = |u: &MigrationUnit, r: &Document| same_field(u, r, "label", "name");
        let rules: [Rule<'_>; 3] = [
            (MatchType::Identifier, &by_identifier),
            (MatchType::Name, &by_code),
            (MatchType::Label, &by_name),
        ];
        for unit in units {
            match_unit(unit, &roles, "_id", &["name", "code"], &rules);
        }
        Ok(())
    }

    async fn deployment_payload(
        &self,
        source: &SourceContext<'_>,
        _options: &PackageOptions,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        embedded_payloads(source, org::ROLES, units)
    }

    async fn validate_for_target(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        self.write(ctx).await
    }

    async fn deploy(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        self.write(ctx).await
    }

    async fn create_backup(&self, target: &dyn RecordStore) -> Result<Option<KindBackup>, MigrationError> {
        Ok(Some(backup_embedded(target, org::ROLES).await?))
    }

    async fn rollback(&self, target: &dyn RecordStore, backup: &KindBackup) -> Result<(), MigrationError> {
        restore_embedded(target, Kind::Role, backup).await
    }

    fn update_mapping(&self, unit: &mut MigrationUnit, record: &Document) -> Result<(), MigrationError> {
        unit.source.clear();
        if let Some(name) = record.get("name") {
            unit.source.insert("label".to_string(), name.clone());
        }
        if let Some(code) = record.get("code") {
            unit.source.insert("name".to_string(), code.clone());
        }
        Ok(())
    }
}
