//! Notification settings, embedded in the org configuration

use async_trait::async_trait;
use deploy_models::{Dependency, Kind, MatchType, MigrationUnit, PackageOptions, Selection};
use record_store::{Document, Filter, RecordStore};
use serde_json::Value;
use tracing::{debug, warn};

use crate::backup::{backup_embedded, restore_embedded, KindBackup};
use crate::contract::matching::{by_identifier, match_unit, same_field, Rule};
use crate::contract::selection::select_embedded;
use crate::contract::{org, payload_of, str_field, KindHandler, SourceContext, WriteContext};
use crate::errors::MigrationError;
use crate::handlers::{embedded_payloads, set_source, target_docs, unique, upsert_embedded};

fn endpoints(record: &Document) -> Vec<Document> {
    org::read_docs(record, "endpoints")
}

/// Endpoint name and template name, when the endpoint uses a custom template
fn template_ref(endpoint: &Document) -> Option<(String, String)> {
    let template = endpoint.get("template").and_then(Value::as_str)?;
    Some((str_field(endpoint, "name"), template.to_string()))
}

pub struct NotificationHandler;

impl NotificationHandler {
    async fn write(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        let templates = ctx.store.find(org::TEMPLATES, &Filter::All, &["type", "name"]).await?;
        let in_target = |endpoint_type: &str, name: &str| {
            templates
                .iter()
                .any(|t| t.get("type").and_then(Value::as_str) == Some(endpoint_type)
                    && t.get("name").and_then(Value::as_str) == Some(name))
        };

        let org_record = org::load_org(ctx.store).await?;
        let mut notifications = org::read_docs(&org_record, org::NOTIFICATIONS);

        for unit in ctx.units_of(Kind::Notification) {
            let mut notification: Document = payload_of(unit)?;
            let target = ctx.chosen_target(unit)?;

            let mut kept = Vec::new();
            for endpoint in endpoints(&notification) {
                let Some((endpoint_type, template)) = template_ref(&endpoint) else {
                    kept.push(Value::Object(endpoint));
                    continue;
                };
                let mapped = ctx.units_of(Kind::Template).any(|t| {
                    t.source.get("name").and_then(Value::as_str) == Some(template.as_str())
                        && t.source.get("type").and_then(Value::as_str) == Some(endpoint_type.as_str())
                });
                if !mapped {
                    return Err(MigrationError::NotFound(format!(
                        "Missing source-mapped template for notification endpoint {} of {}",
                        endpoint_type,
                        unit.label()
                    )));
                }
                if in_target(&endpoint_type, &template) {
                    kept.push(Value::Object(endpoint));
                } else {
                    debug!(
                        "Dropping {} endpoint of {}; template {} is not in the target",
                        endpoint_type,
                        unit.label(),
                        template
                    );
                }
            }

            if kept.is_empty() {
                warn!("Skipping notification {} with no deployable endpoints", unit.label());
                continue;
            }
            notification.insert("endpoints".to_string(), Value::Array(kept));
            notification.remove("templates");

            let id = upsert_embedded(&mut notifications, unit, target.as_ref(), notification)?;
            ctx.resolved(unit, id);
            org::save_array(ctx.store, org::NOTIFICATIONS, &notifications).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl KindHandler for NotificationHandler {
    fn kind(&self) -> Kind {
        Kind::Notification
    }

    fn dependencies(&self, source: &SourceContext<'_>, record: &Document) -> Result<Vec<Dependency>, MigrationError> {
        let dependencies = endpoints(record)
            .iter()
            .filter_map(template_ref)
            .filter_map(|(endpoint_type, name)| source.template_id(&endpoint_type, &name).cloned())
            .map(|id| Dependency::new(id, Kind::Template))
            .collect();
        Ok(unique(dependencies))
    }

    async fn source_mapping_docs(
        &self,
        source: &SourceContext<'_>,
        selection: &Selection,
    ) -> Result<Vec<Document>, MigrationError> {
        let mut notifications = select_embedded(org::read_docs(&source.org, org::NOTIFICATIONS), selection);
        for notification in notifications.iter_mut() {
            let templates: Vec<Value> = endpoints(notification)
                .iter()
                .filter_map(template_ref)
                .filter_map(|(endpoint_type, name)| source.template_id(&endpoint_type, &name))
                .map(|id| id.to_value())
                .collect();
            notification.insert("templates".to_string(), Value::Array(templates));
        }
        Ok(notifications)
    }

    async fn match_source_mappings(
        &self,
        target: &dyn RecordStore,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        let notifications = target_docs(target, org::NOTIFICATIONS).await?;
        let by_name = |u: &MigrationUnit, r: &Document| same_field(u, r, "name", "name");
        let rules: [Rule<'_>; 2] = [(MatchType::Identifier, &by_identifier), (MatchType::Name, &by_name)];
        for unit in units {
            match_unit(unit, &notifications, "_id", &["label", "name"], &rules);
        }
        Ok(())
    }

    async fn deployment_payload(
        &self,
        source: &SourceContext<'_>,
        _options: &PackageOptions,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        embedded_payloads(source, org::NOTIFICATIONS, units)
    }

    async fn validate_for_target(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        self.write(ctx).await
    }

    async fn deploy(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        self.write(ctx).await
    }

    async fn create_backup(&self, target: &dyn RecordStore) -> Result<Option<KindBackup>, MigrationError> {
        Ok(Some(backup_embedded(target, org::NOTIFICATIONS).await?))
    }

    async fn rollback(&self, target: &dyn RecordStore, backup: &KindBackup) -> Result<(), MigrationError> {
        restore_embedded(target, Kind::Notification, backup).await
    }

    fn update_mapping(&self, unit: &mut MigrationUnit, record: &Document) -> Result<(), MigrationError> {
        set_source(unit, record, &["label", "name"]);
        Ok(())
    }
}
