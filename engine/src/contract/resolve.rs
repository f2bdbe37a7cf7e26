//! Dependency mapping lookups and the per-run resolution table

use std::collections::HashMap;

use deploy_models::{Kind, MigrationUnit, RecordId};
use record_store::RecordStore;
use serde::Deserialize;

use crate::contract::did::DeploymentIds;
use crate::contract::org;
use crate::errors::MigrationError;

/// The unit in `units` for a source id, restricted to `kinds` when non-empty
pub fn find_mapping<'a>(
    source_id: &RecordId,
    units: &'a [MigrationUnit],
    kinds: &[Kind],
) -> Option<&'a MigrationUnit> {
    units
        .iter()
        .find(|u| &u.id == source_id && (kinds.is_empty() || kinds.contains(&u.kind)))
}

/// Source id to target id, per kind, for everything resolved so far in a run
#[derive(Debug, Clone, Default)]
pub struct ResolutionTable {
    entries: HashMap<(Kind, RecordId), RecordId>,
}

impl ResolutionTable {
    /// Start from every unit that already names a concrete target
    pub fn seeded(units: &[MigrationUnit]) -> Self {
        let mut table = Self::default();
        for unit in units {
            if let Some(target) = unit.target.as_ref().filter(|t| !t.is_empty_sentinel()) {
                table.record(unit.kind, unit.id.clone(), target.clone());
            }
        }
        table
    }

    pub fn record(&mut self, kind: Kind, source: RecordId, target: RecordId) {
        self.entries.insert((kind, source), target);
    }

    pub fn get(&self, kind: Kind, source: &RecordId) -> Option<&RecordId> {
        self.entries.get(&(kind, source.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(Kind, RecordId), &RecordId)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Deserialize)]
struct Principal {
    #[serde(rename = "_id")]
    id: RecordId,
    #[serde(default)]
    did: DeploymentIds,
}

/// Target roles and service accounts indexed by the source ids in their deployment-identifier sets
#[derive(Debug, Clone, Default)]
pub struct PrincipalIndex {
    by_source: HashMap<RecordId, (Kind, RecordId)>,
}

impl PrincipalIndex {
    pub async fn load(store: &dyn RecordStore) -> Result<Self, MigrationError> {
        let org = org::load_org(store).await?;
        let mut index = Self::default();
        for (kind, path) in [(Kind::Role, org::ROLES), (Kind::ServiceAccount, org::SERVICE_ACCOUNTS)] {
            let principals: Vec<Principal> = org::read_array(&org, path)?;
            for principal in principals {
                for source in principal.did.iter() {
                    index
                        .by_source
                        .insert(source.clone(), (kind, principal.id.clone()));
                }
            }
        }
        Ok(index)
    }

    pub fn find(&self, source: &RecordId, kinds: &[Kind]) -> Option<RecordId> {
        self.by_source
            .get(source)
            .filter(|(kind, _)| kinds.is_empty() || kinds.contains(kind))
            .map(|(_, target)| target.clone())
    }
}

/// Outcome of looking up a source id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Resolved to a target id
    Resolved(RecordId),

    /// A unit exists but chose create-new and nothing has been created yet
    Pending,

    /// No unit in the package
    Missing,
}

/// Read-only lookups over the package, the resolution table and target principals
#[derive(Clone, Copy)]
pub struct Resolver<'a> {
    units: &'a [MigrationUnit],
    table: &'a ResolutionTable,
    principals: &'a PrincipalIndex,
}

impl<'a> Resolver<'a> {
    pub fn new(
        units: &'a [MigrationUnit],
        table: &'a ResolutionTable,
        principals: &'a PrincipalIndex,
    ) -> Self {
        Self {
            units,
            table,
            principals,
        }
    }

    pub fn resolve(&self, source: &RecordId, kinds: &[Kind]) -> Resolution {
        match find_mapping(source, self.units, kinds) {
            Some(unit) => match self.table.get(unit.kind, &unit.id) {
                Some(target) => Resolution::Resolved(target.clone()),
                None => Resolution::Pending,
            },
            None => Resolution::Missing,
        }
    }

    /// The resolved target, falling back to target roles and service accounts
    /// that already list the source id
    pub fn target_of(&self, source: &RecordId, kinds: &[Kind]) -> Option<RecordId> {
        match self.resolve(source, kinds) {
            Resolution::Resolved(target) => Some(target),
            _ => self.principals.find(source, kinds),
        }
    }

    pub fn account(&self, source: &RecordId) -> Option<RecordId> {
        self.target_of(source, &[Kind::Account])
    }

    pub fn role(&self, source: &RecordId) -> Option<RecordId> {
        self.target_of(source, &[Kind::Role])
    }

    pub fn units(&self) -> &'a [MigrationUnit] {
        self.units
    }
}
