//! Accounts. Never written; they exist only to be matched so that principal
//! references elsewhere in a package can be remapped.

use async_trait::async_trait;
use deploy_models::{Dependency, Kind, MatchType, MigrationUnit, PackageOptions, Selection};
use record_store::{Document, Filter, RecordStore};
use serde_json::Value;

use crate::backup::KindBackup;
use crate::contract::builtins::{ADMINISTRATOR_ROLE, DEVELOPER_ROLE};
use crate::contract::matching::{match_unit, same_field, Rule};
use crate::contract::selection::{select_docs, SelectQuery};
use crate::contract::{org, KindHandler, SourceContext, WriteContext};
use crate::errors::MigrationError;
use crate::handlers::{missing_target, set_source};

const FIELDS: [&str; 4] = ["name", "email", "mobile", "roles"];

fn has_role(record: &Document, role: &str) -> bool {
    match record.get("roles") {
        Some(Value::Array(roles)) => roles.iter().any(|r| r.as_str() == Some(role)),
        _ => false,
    }
}

pub struct AccountHandler;

#[async_trait]
impl KindHandler for AccountHandler {
    fn kind(&self) -> Kind {
        Kind::Account
    }

    fn dependencies(&self, _source: &SourceContext<'_>, _record: &Document) -> Result<Vec<Dependency>, MigrationError> {
        Ok(Vec::new())
    }

    async fn source_mapping_docs(
        &self,
        source: &SourceContext<'_>,
        selection: &Selection,
    ) -> Result<Vec<Document>, MigrationError> {
        select_docs(source.store, selection, SelectQuery::new(org::ACCOUNTS).fields(&FIELDS)).await
    }

    async fn match_source_mappings(
        &self,
        target: &dyn RecordStore,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        let accounts = target.find(org::ACCOUNTS, &Filter::All, &FIELDS).await?;

        let by_email = |u: &MigrationUnit, r: &Document| same_field(u, r, "email", "email");
        let by_mobile = |u: &MigrationUnit, r: &Document| same_field(u, r, "mobile", "mobile");
        let matching_admin = |u: &MigrationUnit, r: &Document| {
            has_role(&u.source, ADMINISTRATOR_ROLE) && has_role(r, ADMINISTRATOR_ROLE)
        };
        let matching_developer = |u: &MigrationUnit, r: &Document| {
            has_role(&u.source, DEVELOPER_ROLE) && has_role(r, DEVELOPER_ROLE)
        };
        let admin = |_: &MigrationUnit, r: &Document| has_role(r, ADMINISTRATOR_ROLE);
        let developer = |_: &MigrationUnit, r: &Document| has_role(r, DEVELOPER_ROLE);
        let rules: [Rule<'_>; 6] = [
            (MatchType::Email, &by_email),
            (MatchType::Mobile, &by_mobile),
            (MatchType::MatchingAdministratorRole, &matching_admin),
            (MatchType::MatchingDeveloperRole, &matching_developer),
            (MatchType::AdministratorRole, &admin),
            (MatchType::DeveloperRole, &developer),
        ];

        for unit in units {
            match_unit(unit, &accounts, "_id", &FIELDS, &rules);
        }
        Ok(())
    }

    async fn deployment_payload(
        &self,
        _source: &SourceContext<'_>,
        _options: &PackageOptions,
        _units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        Ok(())
    }

    /// An account must map onto one that already exists in the target
    async fn validate_for_target(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        for unit in ctx.units_of(Kind::Account) {
            let Some(target) = ctx.chosen_target(unit)? else {
                return Err(MigrationError::InvalidArgument(format!(
                    "Accounts cannot be created; choose an existing target for {}",
                    unit.label()
                )));
            };
            if ctx
                .store
                .find_one(org::ACCOUNTS, &Filter::by_id(target.to_value()))
                .await?
                .is_none()
            {
                return Err(missing_target(unit));
            }
        }
        Ok(())
    }

    async fn deploy(&self, _ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        Ok(())
    }

    async fn create_backup(&self, _target: &dyn RecordStore) -> Result<Option<KindBackup>, MigrationError> {
        Ok(None)
    }

    async fn rollback(&self, _target: &dyn RecordStore, _backup: &KindBackup) -> Result<(), MigrationError> {
        Ok(())
    }

    fn update_mapping(&self, unit: &mut MigrationUnit, record: &Document) -> Result<(), MigrationError> {
        set_source(unit, record, &["name", "email", "mobile"]);
        let roles: Vec<Value> = match record.get("roles") {
            Some(Value::Array(roles)) => roles
                .iter()
                .filter(|r| matches!(r.as_str(), Some(ADMINISTRATOR_ROLE) | Some(DEVELOPER_ROLE)))
                .cloned()
                .collect(),
            _ => Vec::new(),
        };
        unit.source.insert("roles".to_string(), Value::Array(roles));
        if let Some(label) = full_name(record) {
            unit.source.insert("label".to_string(), Value::String(label));
        }
        Ok(())
    }
}

fn full_name(record: &Document) -> Option<String> {
    let name = record.get("name")?;
    let parts: Vec<&str> = ["first", "last"]
        .iter()
        .filter_map(|key| name.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        record.get("email").and_then(Value::as_str).map(str::to_string)
    } else {
        Some(parts.join(" "))
    }
}
