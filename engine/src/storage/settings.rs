//! Settings file management

use std::collections::BTreeMap;

use deploy_models::{Kind, PackageOptions, RecordId, Selection};
use serde::{Deserialize, Serialize};

use crate::contract::builtins as principals;
use crate::deploy::plan::TargetPolicy;
use crate::logs::LogLevel;

/// Run settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,

    /// Account in the target environment recorded as creator and updater
    #[serde(default = "default_principal")]
    pub principal_id: RecordId,

    /// Source selection per kind
    #[serde(default)]
    pub selections: BTreeMap<Kind, Selection>,

    /// Package options
    #[serde(default)]
    pub options: PackageOptions,

    /// How targets are chosen when planning
    #[serde(default)]
    pub target_policy: TargetPolicy,

    /// Run a validating pass before deploying
    #[serde(default = "default_true")]
    pub validate_before_deploy: bool,

    /// Restore the pre-run backup when a deploy fails
    #[serde(default)]
    pub rollback_on_failure: bool,
}

fn default_true() -> bool {
    true
}

fn default_principal() -> RecordId {
    RecordId::from(principals::ANONYMOUS)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            principal_id: default_principal(),
            selections: BTreeMap::new(),
            options: PackageOptions::default(),
            target_policy: TargetPolicy::default(),
            validate_before_deploy: true,
            rollback_on_failure: false,
        }
    }
}
