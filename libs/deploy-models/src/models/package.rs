//! Deployment packages

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ids::RecordId;
use crate::models::kind::Kind;
use crate::models::selection::Selection;
use crate::models::unit::MigrationUnit;

/// Run-scoped options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageOptions {
    /// Keep platform push certificates in app payloads
    #[serde(default)]
    pub preserve_certs: bool,
}

/// Where a package is in its lifecycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStage {
    /// Selections are being edited
    #[default]
    Configuration,

    /// Source units are loaded
    SourceMappings,

    /// Target candidates are computed and being chosen
    TargetMappings,

    /// Every unit has a target; ready to validate and deploy
    Deployment,

    /// Committed to the target
    Deployed,

    /// A commit failed part way
    Failed,

    /// Restored from backup after a failure
    RolledBack,
}

/// The unit of work: ordered migration units plus run-scoped options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentPackage {
    #[serde(rename = "_id")]
    pub id: RecordId,

    pub created: DateTime<Utc>,

    #[serde(default)]
    pub stage: PackageStage,

    /// Selection per kind; kinds not listed select nothing
    #[serde(default)]
    pub configuration: BTreeMap<Kind, Selection>,

    #[serde(default)]
    pub options: PackageOptions,

    #[serde(default)]
    pub units: Vec<MigrationUnit>,
}

impl DeploymentPackage {
    pub fn new(configuration: BTreeMap<Kind, Selection>, options: PackageOptions) -> Self {
        Self {
            id: RecordId::generate(),
            created: Utc::now(),
            stage: PackageStage::Configuration,
            configuration,
            options,
            units: Vec::new(),
        }
    }

    pub fn selection(&self, kind: Kind) -> Selection {
        self.configuration.get(&kind).cloned().unwrap_or_default()
    }

    pub fn units_of(&self, kind: Kind) -> impl Iterator<Item = &MigrationUnit> {
        self.units.iter().filter(move |u| u.kind == kind)
    }

    pub fn units_of_mut(&mut self, kind: Kind) -> Vec<&mut MigrationUnit> {
        self.units.iter_mut().filter(|u| u.kind == kind).collect()
    }

    pub fn find_unit(&self, id: &RecordId, kind: Kind) -> Option<&MigrationUnit> {
        self.units.iter().find(|u| u.kind == kind && &u.id == id)
    }
}
