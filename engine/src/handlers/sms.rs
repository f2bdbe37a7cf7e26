//! Numeric-messaging endpoints, embedded in the org configuration

use async_trait::async_trait;
use deploy_models::{Dependency, Kind, MatchType, MigrationUnit, PackageOptions, Selection};
use record_store::{Document, RecordStore};
use serde_json::Value;

use crate::backup::{backup_embedded, restore_embedded, KindBackup};
use crate::contract::matching::{by_identifier, match_unit, same_field, Rule};
use crate::contract::selection::select_embedded;
use crate::contract::{org, payload_of, pick, KindHandler, SourceContext, WriteContext};
use crate::errors::MigrationError;
use crate::handlers::{embedded_payloads, position_of, set_source, target_docs, upsert_embedded};

pub struct SmsHandler;

impl SmsHandler {
    async fn write(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        let org_record = org::load_org(ctx.store).await?;
        let mut numbers = org::read_docs(&org_record, org::SMS_NUMBERS);

        for unit in ctx.units_of(Kind::Sms) {
            let payload: Document = payload_of(unit)?;
            let target = ctx.chosen_target(unit)?;
            let is_default = payload.get("isDefault").and_then(Value::as_bool).unwrap_or(false);

            let mut record = pick(&payload, &["name", "number"]);
            record.insert("isDefault".to_string(), Value::Bool(is_default));
            let id = upsert_embedded(&mut numbers, unit, target.as_ref(), record)?;

            // Only one number can be the default
            if is_default {
                for number in numbers.iter_mut() {
                    number.insert("isDefault".to_string(), Value::Bool(false));
                }
                if let Some(index) = position_of(&numbers, &id) {
                    numbers[index].insert("isDefault".to_string(), Value::Bool(true));
                }
            }

            ctx.resolved(unit, id);
            org::save_array(ctx.store, org::SMS_NUMBERS, &numbers).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl KindHandler for SmsHandler {
    fn kind(&self) -> Kind {
        Kind::Sms
    }

    fn dependencies(&self, _source: &SourceContext<'_>, _record: &Document) -> Result<Vec<Dependency>, MigrationError> {
        Ok(Vec::new())
    }

    async fn source_mapping_docs(
        &self,
        source: &SourceContext<'_>,
        selection: &Selection,
    ) -> Result<Vec<Document>, MigrationError> {
        Ok(select_embedded(org::read_docs(&source.org, org::SMS_NUMBERS), selection))
    }

    async fn match_source_mappings(
        &self,
        target: &dyn RecordStore,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        let numbers = target_docs(target, org::SMS_NUMBERS).await?;
        let by_name = |u: &MigrationUnit, r: &Document| same_field(u, r, "name", "name");
        let by_number = |u: &MigrationUnit, r: &Document| same_field(u, r, "number", "number");
        let rules: [Rule<'_>; 3] = [
            (MatchType::Identifier, &by_identifier),
            (MatchType::Name, &by_name),
            (MatchType::Number, &by_number),
        ];
        for unit in units {
            match_unit(unit, &numbers, "_id", &["name", "number"], &rules);
        }
        Ok(())
    }

    async fn deployment_payload(
        &self,
        source: &SourceContext<'_>,
        _options: &PackageOptions,
        units: Vec<&mut MigrationUnit>,
    ) -> Result<(), MigrationError> {
        embedded_payloads(source, org::SMS_NUMBERS, units)
    }

    async fn validate_for_target(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        self.write(ctx).await
    }

    async fn deploy(&self, ctx: &mut WriteContext<'_>) -> Result<(), MigrationError> {
        self.write(ctx).await
    }

    async fn create_backup(&self, target: &dyn RecordStore) -> Result<Option<KindBackup>, MigrationError> {
        Ok(Some(backup_embedded(target, org::SMS_NUMBERS).await?))
    }

    async fn rollback(&self, target: &dyn RecordStore, backup: &KindBackup) -> Result<(), MigrationError> {
        restore_embedded(target, Kind::Sms, backup).await
    }

    fn update_mapping(&self, unit: &mut MigrationUnit, record: &Document) -> Result<(), MigrationError> {
        set_source(unit, record, &["name", "number"]);
        if !unit.source.contains_key("name") {
            if let Some(number) = record.get("number") {
                unit.source.insert("label".to_string(), number.clone());
            }
        }
        Ok(())
    }
}
