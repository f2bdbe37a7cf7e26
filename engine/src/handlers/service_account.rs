//! Service accounts, embedded in the org record

use async_trait::async_trait;
use deploy_models::{Dependency, Kind, MatchType, MigrationUnit, PackageOptions, RecordId, Selection};
use record_store::{Document, RecordStore};
use serde_json::Value;
use tracing::debug;

use crate::backup::{backup_embedded, restore_embedded, KindBackup};
use crate::contract::acl::role_dependencies;
use crate::contract::matching::{by_identifier, match_unit, same_field, Rule};
use crate::contract::selection::select_embedded;
use crate::contract::{id_list, org, payload_of, pick, KindHandler, SourceContext, WriteContext};
use crate::errors::MigrationError;
use crate::handlers::{embedded_payloads, set_source, target_docs, upsert_embedded};

pub struct ServiceAccountHandler;

impl ServiceAccountHandler {
    async fn write(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        let org_record = org::load_org(ctx.store).await?;
        let mut accounts = org::read_docs(&org_record, org::SERVICE_ACCOUNTS);

        for unit in ctx.units_of(Kind::ServiceAccount) {
            let payload: Document = payload_of(unit)?;
            let target = ctx.chosen_target(unit)?;

            let mut record = pick(&payload, &["name", "label", "locked"]);
            let roles = ctx.map_unit_roles(unit, &id_list(payload.get("roles")))?;
            record.insert(
                "roles".to_string(),
                Value::Array(roles.iter().map(RecordId::to_value).collect()),
            );

            let id = upsert_embedded(&mut accounts, unit, target.as_ref(), record)?;
            debug!("Service account {} written as {}", unit.label(), id);
            ctx.resolved(unit, id);
            org::save_array(ctx.store, org::SERVICE_ACCOUNTS, &accounts).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl KindHandler for ServiceAccountHandler {
    fn kind(&self) -> Kind {
        Kind::ServiceAccount
    }

    fn dependencies(&self, _source: &SourceContext<'_>, record: &Document) -> Result<Vec<Dependency>, MigrationError> {
        Ok(role_dependencies(&id_list(record.get("roles"))))
    }

    async fn source_mapping_docs(
        &self,
        source: &SourceContext<'_>,
        selection: &Selection,
    ) -> Result<Vec<Document>, MigrationError> {
        let accounts = org::read_docs(&source.org, org::SERVICE_ACCOUNTS);
        Ok(select_embedded(accounts, selection))
    }

    async fn match_source_mappings(
        &self,
        target: &dyn RecordStore,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        let accounts = target_docs(target, org::SERVICE_ACCOUNTS).await?;
        let by_name = |u: &MigrationUnit, r: &Document| same_field(u, r, "name", "name");
        let rules: [Rule<'_>; 2] = [(MatchType::Identifier, &by_identifier), (MatchType::Name, &by_name)];
        for unit in units {
            match_unit(unit, &accounts, "_id", &["name", "label"], &rules);
        }
        Ok(())
    }

    async fn deployment_payload(
        &self,
        source: &SourceContext<'_>,
        _options: &PackageOptions,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        embedded_payloads(source, org::SERVICE_ACCOUNTS, units)
    }

    async fn validate_for_target(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        self.write(ctx).await
    }

    async fn deploy(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        self.write(ctx).await
    }

    async fn create_backup(&self, target: &dyn RecordStore) -> Result<Option<KindBackup>, MigrationError> {
        Ok(Some(backup_embedded(target, org::SERVICE_ACCOUNTS).await?))
    }

    async fn rollback(&self, target: &dyn RecordStore, backup: &KindBackup) -> Result<(), MigrationError> {
        restore_embedded(target, Kind::ServiceAccount, backup).await
    }

    fn update_mapping(&self, unit: &mut MigrationUnit, record: &Document) -> Result<(), MigrationError> {
        set_source(unit, record, &["name", "label"]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::WriteMode;
    use record_store::MemoryStore;
    use serde_json::json;

    const SOURCE_SA: &str = "a00000000000000000000011";
    const SOURCE_ROLE: &str = "a00000000000000000000012";
    const LATER_ROLE: &str = "a00000000000000000000013";
    const TARGET_ROLE: &str = "b00000000000000000000012";

    fn units() -> Vec<MigrationUnit> {
        let mut account = MigrationUnit::new(RecordId::from(SOURCE_SA), Kind::ServiceAccount);
        account.target = Some(RecordId::empty());
        account.source.insert("name".into(), json!("c_bot"));
        account.payload = Some(json!({
            "_id": SOURCE_SA, "name": "c_bot", "label": "Bot", "locked": true,
            "roles": [SOURCE_ROLE, LATER_ROLE, "000000000000000000000004"]
        }));

        let mut role = MigrationUnit::new(RecordId::from(SOURCE_ROLE), Kind::Role);
        role.target = Some(RecordId::from(TARGET_ROLE));
        let mut later = MigrationUnit::new(RecordId::from(LATER_ROLE), Kind::Role);
        later.target = Some(RecordId::empty());
        vec![account, role, later]
    }

    #[tokio::test]
    async fn test_pending_roles_skipped_only_when_validating() {
        let units = units();
        let options = PackageOptions::default();
        let principal = RecordId::from("p");

        let scratch = MemoryStore::new();
        let mut ctx = WriteContext::new(&scratch, &units, &options, &principal, WriteMode::Validating);
        ServiceAccountHandler.validate_for_target(&mut ctx).await.unwrap();
        let written = org::load_array::<Value>(&scratch, org::SERVICE_ACCOUNTS).await.unwrap();
        assert_eq!(written[0]["roles"], json!([TARGET_ROLE, "000000000000000000000004"]));
        assert_eq!(written[0]["locked"], json!(true));

        let target = MemoryStore::new();
        let mut ctx = WriteContext::new(&target, &units, &options, &principal, WriteMode::Deploying);
        let err = ServiceAccountHandler.deploy(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains(LATER_ROLE));
    }
}
