//! Target choice rules and automatic target policies

use deploy_models::{MatchType, MigrationUnit, RecordId};
use serde::{Deserialize, Serialize};

use crate::errors::MigrationError;

/// How `apply_policy` fills targets that are still unchosen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPolicy {
    /// Take the best-ranked candidate; create when there is none
    #[default]
    FirstCandidate,

    /// Reuse only records a previous run deployed (identifier matches) and
    /// create the rest where creating is allowed
    CreateMissing,
}

/// Create-new is offered when nothing matched or the kind allows duplicates
pub fn allows_create(unit: &MigrationUnit) -> bool {
    unit.targets.is_empty() || unit.targets.iter().any(|t| t.match_type == MatchType::Duplicate)
}

/// Check that `id` is a legal target for the unit
pub fn check_choice(unit: &MigrationUnit, id: &RecordId) -> Result<(), MigrationError> {
    if id.is_empty_sentinel() {
        if allows_create(unit) {
            return Ok(());
        }
        return Err(MigrationError::InvalidArgument(format!(
            "Cannot create a new {} for {}: choose one of its {} candidates",
            unit.kind,
            unit.label(),
            unit.targets.len()
        )));
    }
    if unit.targets.iter().any(|t| &t.id == id) {
        return Ok(());
    }
    Err(MigrationError::InvalidArgument(format!(
        "{} is not a candidate target for {} {}",
        id,
        unit.kind,
        unit.label()
    )))
}

/// The target a policy picks for a unit
pub fn policy_target(unit: &MigrationUnit, policy: TargetPolicy) -> RecordId {
    let first = || unit.targets.first().map(|t| t.id.clone());
    match policy {
        TargetPolicy::FirstCandidate => first().unwrap_or_else(RecordId::empty),
        TargetPolicy::CreateMissing => unit
            .targets
            .iter()
            .find(|t| t.match_type == MatchType::Identifier)
            .map(|t| t.id.clone())
            .or_else(|| if allows_create(unit) { None } else { first() })
            .unwrap_or_else(RecordId::empty),
    }
}
