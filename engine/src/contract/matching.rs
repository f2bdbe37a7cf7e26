//! Candidate matching helpers

use deploy_models::{MatchType, MigrationUnit, RecordId, TargetCandidate};
use record_store::Document;
use serde_json::Value;

use crate::contract::did::DeploymentIds;

/// A heuristic: the match type it produces and its test
pub type Rule<'a> = (MatchType, &'a (dyn Fn(&MigrationUnit, &Document) -> bool + Sync));

/// Build a candidate from a target record, copying the listed display fields
pub fn candidate(
    record: &Document,
    id_field: &str,
    match_type: MatchType,
    display: &[&str],
) -> Option<TargetCandidate> {
    let id = record.get(id_field).and_then(RecordId::from_any_value)?;
    let fields = display
        .iter()
        .filter_map(|key| record.get(*key).map(|v| (key.to_string(), v.clone())))
        .collect();
    Some(TargetCandidate::new(id, match_type, fields))
}

/// Clear the unit's candidates and recompute them. Rules are applied in
/// precedence order; a record matched by an earlier rule is not repeated.
pub fn match_unit(
    unit: &mut MigrationUnit,
    records: &[Document],
    id_field: &str,
    display: &[&str],
    rules: &[Rule<'_>],
) {
    unit.targets.clear();
    for (match_type, test) in rules {
        for record in records {
            if test(&*unit, record) {
                if let Some(candidate) = candidate(record, id_field, *match_type, display) {
                    unit.add_target(candidate);
                }
            }
        }
    }
}

/// The record's deployment-identifier set lists the unit's source id
pub fn by_identifier(unit: &MigrationUnit, record: &Document) -> bool {
    DeploymentIds::read(record).contains(&unit.id)
}

/// Non-empty, equal values at `source_key` of the unit's snapshot and `target_key` of the record
pub fn same_field(unit: &MigrationUnit, record: &Document, source_key: &str, target_key: &str) -> bool {
    match (unit.source.get(source_key), record.get(target_key)) {
        (Some(a), Some(b)) => !is_blank(a) && a == b,
        _ => false,
    }
}

pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
