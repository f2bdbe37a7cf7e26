//! Apps and their API clients, embedded in the org record

use async_trait::async_trait;
use deploy_models::{Dependency, Kind, MatchType, MigrationUnit, PackageOptions, RecordId, Selection};
use record_store::{Document, RecordStore};
use serde_json::Value;
use tracing::{debug, info};

use crate::backup::{backup_embedded, restore_embedded, KindBackup};
use crate::contract::builtins::is_builtin_principal;
use crate::contract::matching::{by_identifier, match_unit, same_field, Rule};
use crate::contract::selection::select_embedded;
use crate::contract::{org, payload_of, KindHandler, SourceContext, WriteContext};
use crate::errors::MigrationError;
use crate::handlers::{missing_source, position_of, set_source, target_docs, upsert_embedded};
use crate::utils::generate_key;

const DEFAULT_MAX_APPS: u64 = 10;
const PUSH_CERTIFICATES: [&str; 4] = ["APNs", "FCM", "GCM", "TPNS"];
const CLIENT_SECRETS: [&str; 3] = ["key", "secret", "rsa"];

fn first_client(app: &Document) -> Option<&Document> {
    app.get("clients")?.get(0)?.as_object()
}

fn sessions(app: &Document) -> Option<&Value> {
    first_client(app)?.get("sessions")
}

fn max_apps(org_record: &Document) -> u64 {
    org::value_at(org_record, org::MAX_APPS)
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_MAX_APPS)
}

pub struct AppHandler;

impl AppHandler {
    async fn write(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        let org_record = org::load_org(ctx.store).await?;
        let mut apps = org::read_docs(&org_record, org::APPS);

        for unit in ctx.units_of(Kind::App) {
            let mut app: Document = payload_of(unit)?;
            let target = ctx.chosen_target(unit)?;

            let mut client = first_client(&app)
                .cloned()
                .ok_or_else(|| MigrationError::NotFound(format!("Missing mapping source app client: {}", unit.label())))?;
            for secret in CLIENT_SECRETS {
                client.remove(secret);
            }

            match &target {
                Some(target_id) => {
                    let index = position_of(&apps, target_id).ok_or_else(|| {
                        MigrationError::NotFound(format!("Missing mapping target app: {}", unit.label()))
                    })?;
                    let existing = first_client(&apps[index]).ok_or_else(|| {
                        MigrationError::NotFound(format!("Missing mapping target app client: {}", unit.label()))
                    })?;
                    for key in ["_id", "key", "sessions"] {
                        match existing.get(key) {
                            Some(value) => client.insert(key.to_string(), value.clone()),
                            None => client.remove(key),
                        };
                    }
                }
                None => {
                    client.insert("_id".to_string(), RecordId::generate().to_value());
                    client.insert("key".to_string(), Value::String(generate_key()));
                }
            }

            if let Some(principal) = client.get("principalId").and_then(RecordId::from_value) {
                if !is_builtin_principal(principal.as_str()) {
                    let mapped = ctx.map_principal(unit, &principal, &[Kind::Account, Kind::ServiceAccount])?;
                    client.insert("principalId".to_string(), mapped.to_value());
                }
            }

            app.insert("clients".to_string(), Value::Array(vec![Value::Object(client)]));
            let id = upsert_embedded(&mut apps, unit, target.as_ref(), app)?;
            debug!("App {} written as {}", unit.label(), id);
            ctx.resolved(unit, id);
            org::save_array(ctx.store, org::APPS, &apps).await?;
        }
        Ok(())
    }

    /// Quota, target existence and client compatibility checks
    async fn check_targets(&self, ctx: &WriteContext<'_>) -> Result<(), MigrationError> {
        let org_record = org::load_org(ctx.store).await?;
        let apps = org::read_docs(&org_record, org::APPS);
        let limit = max_apps(&org_record);
        let mut creates = 0u64;

        for unit in ctx.units_of(Kind::App) {
            let Some(target_id) = ctx.chosen_target(unit)? else {
                creates += 1;
                if creates + apps.len() as u64 > limit {
                    return Err(MigrationError::AccessDenied(format!(
                        "Adding an app would breach the limit of {} apps.",
                        limit
                    )));
                }
                continue;
            };

            let index = position_of(&apps, &target_id).ok_or_else(|| {
                MigrationError::NotFound(format!(
                    "An app selected as a target for {} no longer exists: {}",
                    unit.label(),
                    target_id
                ))
            })?;

            let payload: Document = payload_of(unit)?;
            let compatible = match (sessions(&payload), sessions(&apps[index])) {
                (Some(source), Some(target)) => source == target,
                (None, None) => first_client(&payload).is_some() && first_client(&apps[index]).is_some(),
                _ => false,
            };
            if !compatible {
                return Err(MigrationError::InvalidArgument(format!(
                    "An app selected as a target for {} has an incompatible client configuration: {}",
                    unit.label(),
                    target_id
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl KindHandler for AppHandler {
    fn kind(&self) -> Kind {
        Kind::App
    }

    fn dependencies(&self, source: &SourceContext<'_>, record: &Document) -> Result<Vec<Dependency>, MigrationError> {
        let mut dependencies: Vec<Dependency> = Vec::new();
        let clients = match record.get("clients") {
            Some(Value::Array(clients)) => clients.as_slice(),
            _ => &[],
        };
        for client in clients {
            let Some(principal) = client.get("principalId").and_then(RecordId::from_value) else {
                continue;
            };
            if is_builtin_principal(principal.as_str()) {
                continue;
            }
            let kind = match source.principal_kind(&principal) {
                Some(Kind::ServiceAccount) => Kind::ServiceAccount,
                _ => Kind::Account,
            };
            let dependency = Dependency::new(principal, kind);
            if !dependencies.contains(&dependency) {
                dependencies.push(dependency);
            }
        }
        Ok(dependencies)
    }

    async fn source_mapping_docs(
        &self,
        source: &SourceContext<'_>,
        selection: &Selection,
    ) -> Result<Vec<Document>, MigrationError> {
        Ok(select_embedded(org::read_docs(&source.org, org::APPS), selection))
    }

    async fn match_source_mappings(
        &self,
        target: &dyn RecordStore,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        let apps = target_docs(target, org::APPS).await?;
        let by_name = |u: &MigrationUnit, r: &Document| same_field(u, r, "name", "name");
        let by_label = |u: &MigrationUnit, r: &Document| {
            same_field(u, r, "label", "label") && u.source.get("sessions") == sessions(r)
        };
        let rules: [Rule<'_>; 3] = [
            (MatchType::Identifier, &by_identifier),
            (MatchType::Name, &by_name),
            (MatchType::Label, &by_label),
        ];
        for unit in units {
            match_unit(unit, &apps, "_id", &["label", "name"], &rules);
        }
        Ok(())
    }

    async fn deployment_payload(
        &self,
        source: &SourceContext<'_>,
        options: &PackageOptions,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        let apps = org::read_docs(&source.org, org::APPS);
        for unit in units {
            let index = position_of(&apps, &unit.id).ok_or_else(|| missing_source(unit))?;
            let mut app = apps[index].clone();
            if !options.preserve_certs {
                for certificate in PUSH_CERTIFICATES {
                    app.remove(certificate);
                }
            }
            if let Some(Value::Array(clients)) = app.get_mut("clients") {
                for client in clients.iter_mut().filter_map(Value::as_object_mut) {
                    for secret in CLIENT_SECRETS {
                        client.remove(secret);
                    }
                }
            }
            unit.payload = Some(Value::Object(app));
        }
        Ok(())
    }

    async fn validate_for_target(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        self.check_targets(ctx).await?;
        self.write(ctx).await
    }

    async fn deploy(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        self.write(ctx).await?;
        info!("Deployed {} apps", ctx.units_of(Kind::App).count());
        Ok(())
    }

    async fn create_backup(&self, target: &dyn RecordStore) -> Result<Option<KindBackup>, MigrationError> {
        Ok(Some(backup_embedded(target, org::APPS).await?))
    }

    async fn rollback(&self, target: &dyn RecordStore, backup: &KindBackup) -> Result<(), MigrationError> {
        restore_embedded(target, Kind::App, backup).await
    }

    fn update_mapping(&self, unit: &mut MigrationUnit, record: &Document) -> Result<(), MigrationError> {
        set_source(unit, record, &["label", "name"]);
        if let Some(sessions) = sessions(record) {
            unit.source.insert("sessions".to_string(), sessions.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::WriteMode;
    use record_store::MemoryStore;
    use serde_json::json;

    const SOURCE_APP: &str = "a00000000000000000000021";
    const TARGET_APP: &str = "b00000000000000000000021";

    async fn target_with(apps: Value, max_apps: u64) -> MemoryStore {
        let store = MemoryStore::new();
        let org_record = json!({"_id": "org", "apps": apps, "configuration": {"maxApps": max_apps}});
        store
            .insert(org::ORG, org_record.as_object().cloned().unwrap())
            .await
            .unwrap();
        store
    }

    fn app_unit(target: &str, sessions: bool) -> MigrationUnit {
        let mut unit = MigrationUnit::new(RecordId::from(SOURCE_APP), Kind::App);
        unit.target = Some(RecordId::from(target));
        unit.source.insert("label".into(), json!("Portal"));
        unit.payload = Some(json!({
            "_id": SOURCE_APP, "label": "Portal", "name": "c_portal",
            "clients": [{"_id": "a00000000000000000000022", "sessions": sessions, "label": "web"}]
        }));
        unit
    }

    #[tokio::test]
    async fn test_quota_breach_is_access_denied() {
        let target = target_with(json!([{"_id": TARGET_APP, "clients": []}]), 1).await;
        let units = vec![app_unit(RecordId::EMPTY, true)];
        let options = PackageOptions::default();
        let principal = RecordId::from("p");
        let mut ctx = WriteContext::new(&target, &units, &options, &principal, WriteMode::Validating);

        let err = AppHandler.validate_for_target(&mut ctx).await.unwrap_err();
        assert_eq!(err.code(), "access_denied");
        assert!(err.to_string().contains("limit of 1 apps"));
    }

    #[tokio::test]
    async fn test_session_mismatch_is_invalid() {
        let target = target_with(
            json!([{"_id": TARGET_APP, "clients": [{"_id": "c", "sessions": false, "key": "k"}]}]),
            10,
        )
        .await;
        let units = vec![app_unit(TARGET_APP, true)];
        let options = PackageOptions::default();
        let principal = RecordId::from("p");
        let mut ctx = WriteContext::new(&target, &units, &options, &principal, WriteMode::Validating);

        let err = AppHandler.validate_for_target(&mut ctx).await.unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
        assert!(err.to_string().contains("incompatible client configuration"));
    }

    #[tokio::test]
    async fn test_update_keeps_target_client_identity() {
        let target = target_with(
            json!([{"_id": TARGET_APP, "did": ["x"], "clients": [{"_id": "c-1", "sessions": true, "key": "k-1"}]}]),
            10,
        )
        .await;
        let units = vec![app_unit(TARGET_APP, true)];
        let options = PackageOptions::default();
        let principal = RecordId::from("p");
        let mut ctx = WriteContext::new(&target, &units, &options, &principal, WriteMode::Deploying);
        AppHandler.deploy(&mut ctx).await.unwrap();

        let apps = org::load_array::<Value>(&target, org::APPS).await.unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0]["name"], json!("c_portal"));
        assert_eq!(apps[0]["did"], json!(["x", SOURCE_APP]));
        assert_eq!(apps[0]["clients"][0]["_id"], json!("c-1"));
        assert_eq!(apps[0]["clients"][0]["key"], json!("k-1"));
        assert_eq!(apps[0]["clients"][0]["label"], json!("web"));
    }

    #[tokio::test]
    async fn test_payload_strips_certificates_and_secrets() {
        let source_store = target_with(
            json!([{"_id": SOURCE_APP, "APNs": {"cert": "x"}, "FCM": {}, "clients": [{"key": "k", "secret": "s", "rsa": {}, "sessions": true}]}]),
            10,
        )
        .await;
        let source = SourceContext::load(&source_store).await.unwrap();
        let mut unit = MigrationUnit::new(RecordId::from(SOURCE_APP), Kind::App);

        AppHandler
            .deployment_payload(&source, &PackageOptions::default(), vec![&mut unit])
            .await
            .unwrap();
        assert_eq!(
            unit.payload,
            Some(json!({"_id": SOURCE_APP, "clients": [{"sessions": true}]}))
        );

        AppHandler
            .deployment_payload(&source, &PackageOptions { preserve_certs: true }, vec![&mut unit])
            .await
            .unwrap();
        assert!(unit.payload.as_ref().unwrap().get("APNs").is_some());
    }
}
