//! Access policies, embedded in the org record

use async_trait::async_trait;
use deploy_models::{Dependency, Kind, MatchType, MigrationUnit, PackageOptions, Selection};
use record_store::{Document, RecordStore};
use serde_json::Value;
use tracing::debug;

use crate::backup::{backup_embedded, restore_embedded, KindBackup};
use crate::contract::acl::{acl_dependencies, acl_to_value, map_acl_to_target, parse_acl};
use crate::contract::matching::{by_identifier, match_unit, same_field, Rule};
use crate::contract::selection::select_embedded;
use crate::contract::{id_list, org, payload_of, KindHandler, SourceContext, WriteContext};
use crate::errors::MigrationError;
use crate::handlers::{embedded_payloads, set_source, target_docs, unique, upsert_embedded};

const APP_LISTS: [&str; 2] = ["appWhitelist", "appBlacklist"];
const ACL_LISTS: [&str; 2] = ["aclWhitelist", "aclBlacklist"];

pub struct PolicyHandler;

impl PolicyHandler {
    async fn write(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        let org_record = org::load_org(ctx.store).await?;
        let mut policies = org::read_docs(&org_record, org::POLICIES);

        for unit in ctx.units_of(Kind::Policy) {
            let mut policy: Document = payload_of(unit)?;
            let target = ctx.chosen_target(unit)?;
            policy.remove("regexp");

            for list in APP_LISTS {
                let mut mapped = Vec::new();
                for app in id_list(policy.get(list)) {
                    if let Some(target_app) = ctx.map_reference(unit, &app, Kind::App)? {
                        mapped.push(target_app.to_value());
                    }
                }
                policy.insert(list.to_string(), Value::Array(mapped));
            }

            for list in ACL_LISTS {
                let entries = parse_acl(policy.get(list))?;
                let mapped = map_acl_to_target(&ctx.resolver(), &entries, true);
                policy.insert(list.to_string(), acl_to_value(&mapped));
            }

            let script = policy
                .get("script")
                .and_then(|s| s.get("script"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            policy.insert("script".to_string(), Value::String(script));

            let id = upsert_embedded(&mut policies, unit, target.as_ref(), policy)?;
            debug!("Policy {} written as {}", unit.label(), id);
            ctx.resolved(unit, id);
            org::save_array(ctx.store, org::POLICIES, &policies).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl KindHandler for PolicyHandler {
    fn kind(&self) -> Kind {
        Kind::Policy
    }

    fn dependencies(&self, source: &SourceContext<'_>, record: &Document) -> Result<Vec<Dependency>, MigrationError> {
        let mut dependencies = Vec::new();
        for list in APP_LISTS {
            for app in id_list(record.get(list)) {
                dependencies.push(Dependency::new(app, Kind::App));
            }
        }
        for list in ACL_LISTS {
            dependencies.extend(acl_dependencies(&parse_acl(record.get(list))?));
        }
        dependencies.extend(source.script_dependencies(record));
        Ok(unique(dependencies))
    }

    async fn source_mapping_docs(
        &self,
        source: &SourceContext<'_>,
        selection: &Selection,
    ) -> Result<Vec<Document>, MigrationError> {
        let mut policies = select_embedded(org::read_docs(&source.org, org::POLICIES), selection);
        for policy in policies.iter_mut() {
            source.enrich_script_references(policy);
        }
        Ok(policies)
    }

    async fn match_source_mappings(
        &self,
        target: &dyn RecordStore,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        let policies = target_docs(target, org::POLICIES).await?;
        let by_name = |u: &MigrationUnit, r: &Document| same_field(u, r, "name", "name");
        let by_label = |u: &MigrationUnit, r: &Document| same_field(u, r, "label", "label");
        let rules: [Rule<'_>; 3] = [
            (MatchType::Identifier, &by_identifier),
            (MatchType::Name, &by_name),
            (MatchType::Label, &by_label),
        ];
        for unit in units {
            match_unit(unit, &policies, "_id", &["label", "name"], &rules);
        }
        Ok(())
    }

    async fn deployment_payload(
        &self,
        source: &SourceContext<'_>,
        _options: &PackageOptions,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        embedded_payloads(source, org::POLICIES, units)
    }

    async fn validate_for_target(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        self.write(ctx).await
    }

    async fn deploy(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        self.write(ctx).await
    }

    async fn create_backup(&self, target: &dyn RecordStore) -> Result<Option<KindBackup>, MigrationError> {
        Ok(Some(backup_embedded(target, org::POLICIES).await?))
    }

    async fn rollback(&self, target: &dyn RecordStore, backup: &KindBackup) -> Result<(), MigrationError> {
        restore_embedded(target, Kind::Policy, backup).await
    }

    fn update_mapping(&self, unit: &mut MigrationUnit, record: &Document) -> Result<(), MigrationError> {
        set_source(unit, record, &["label", "name"]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::WriteMode;
    use deploy_models::RecordId;
    use record_store::MemoryStore;
    use serde_json::json;

    const POLICY: &str = "a00000000000000000000031";
    const KNOWN_APP: &str = "a00000000000000000000032";
    const TARGET_APP: &str = "b00000000000000000000032";
    const ACCOUNT: &str = "a00000000000000000000033";

    fn units() -> Vec<MigrationUnit> {
        let mut policy = MigrationUnit::new(RecordId::from(POLICY), Kind::Policy);
        policy.target = Some(RecordId::empty());
        policy.source.insert("label".into(), json!("Office hours"));
        policy.payload = Some(json!({
            "_id": POLICY,
            "label": "Office hours",
            "regexp": "^/x",
            "appWhitelist": [KNOWN_APP],
            "aclWhitelist": [{"type": 1, "target": ACCOUNT, "allow": 4}],
            "script": {"script": "return true", "requires": []}
        }));
        let mut app = MigrationUnit::new(RecordId::from(KNOWN_APP), Kind::App);
        app.target = Some(RecordId::from(TARGET_APP));
        vec![policy, app]
    }

    #[tokio::test]
    async fn test_policy_write_remaps_and_cleans() {
        let units = units();
        let target = MemoryStore::new();
        let options = PackageOptions::default();
        let principal = RecordId::from("p");
        let mut ctx = WriteContext::new(&target, &units, &options, &principal, WriteMode::Deploying);
        PolicyHandler.deploy(&mut ctx).await.unwrap();

        let written = org::load_array::<Value>(&target, org::POLICIES).await.unwrap();
        assert_eq!(written.len(), 1);
        assert!(written[0].get("regexp").is_none());
        assert_eq!(written[0]["appWhitelist"], json!([TARGET_APP]));
        assert_eq!(written[0]["aclWhitelist"], json!([]));
        assert_eq!(written[0]["script"], json!("return true"));
        assert_eq!(written[0]["did"], json!([POLICY]));
    }

    #[tokio::test]
    async fn test_dependencies_cover_apps_acl_and_libraries() {
        let store = MemoryStore::new();
        let source = SourceContext::load(&store).await.unwrap();
        let mut record = units()[0].payload.clone().unwrap().as_object().cloned().unwrap();
        record.insert("script".into(), json!({"script": "", "requires": ["c_missing_lib"]}));
        source.enrich_script_references(&mut record);

        let deps = PolicyHandler.dependencies(&source, &record).unwrap();
        assert_eq!(
            deps,
            vec![
                Dependency::new(RecordId::from(KNOWN_APP), Kind::App),
                Dependency::new(RecordId::from(ACCOUNT), Kind::Account),
                Dependency::new(RecordId::from("c_missing_lib"), Kind::Script),
            ]
        );
    }
}
