//! Drives a deployment package from selection to commit

use std::collections::BTreeMap;

use deploy_models::{
    DeploymentPackage, Kind, MigrationUnit, PackageOptions, PackageStage, RecordId, SelectMode, Selection,
};
use record_store::{Document, MemoryStore, RecordStore};
use tracing::{debug, error, info, warn};

use crate::backup::archive::{self, PackageBackup};
use crate::contract::{org, SourceContext, WriteContext, WriteMode};
use crate::deploy::plan::{check_choice, policy_target, TargetPolicy};
use crate::deploy::stage::{StageEvent, StageMachine};
use crate::errors::MigrationError;
use crate::handlers::{handler_for, id_of};

/// Owns one package and the stage it is in
#[derive(Debug)]
pub struct PackageRunner {
    package: DeploymentPackage,
    stage: StageMachine,

    /// Recorded as creator and updater of written records
    principal: RecordId,
}

impl PackageRunner {
    /// Resume a saved package
    pub fn new(package: DeploymentPackage, principal: RecordId) -> Self {
        let stage = StageMachine::resume(package.stage.clone());
        Self {
            package,
            stage,
            principal,
        }
    }

    /// Enumerate the selected source records of every kind and close the
    /// package over their declared dependencies
    pub async fn build_package(
        source: &dyn RecordStore,
        configuration: BTreeMap<Kind, Selection>,
        options: PackageOptions,
        principal: RecordId,
    ) -> Result<Self, MigrationError> {
        let mut runner = Self::new(DeploymentPackage::new(configuration, options), principal);
        let context = SourceContext::load(source).await?;

        let mut units = Vec::new();
        for kind in Kind::DEPLOY_ORDER {
            let selection = runner.package.selection(kind);
            if selection.selects_nothing() {
                continue;
            }
            for record in handler_for(kind).source_mapping_docs(&context, &selection).await? {
                units.push(new_unit(&context, kind, &record, true)?);
            }
        }

        let selected = units.len();
        close_dependencies(&context, &mut units, &mut runner.package.configuration).await?;
        units.sort_by_key(|u| u.kind.deploy_rank());
        info!(
            "Package {} built: {} selected units, {} pulled in as dependencies",
            runner.package.id,
            selected,
            units.len() - selected
        );

        runner.package.units = units;
        runner.transition(StageEvent::SourcesLoaded)?;
        Ok(runner)
    }

    pub fn package(&self) -> &DeploymentPackage {
        &self.package
    }

    pub fn into_package(self) -> DeploymentPackage {
        self.package
    }

    pub fn stage(&self) -> &PackageStage {
        self.stage.stage()
    }

    fn transition(&mut self, event: StageEvent) -> Result<(), MigrationError> {
        self.stage.process(event).map_err(MigrationError::StageError)?;
        self.package.stage = self.stage.stage().clone();
        Ok(())
    }

    fn unresolved(&self) -> impl Iterator<Item = &MigrationUnit> {
        self.package.units.iter().filter(|u| u.target.is_none())
    }

    fn resolve_if_complete(&mut self) -> Result<(), MigrationError> {
        if self.unresolved().next().is_none() && self.stage.can_choose_targets() {
            self.transition(StageEvent::TargetsResolved)?;
        }
        Ok(())
    }

    /// Compute target candidates for every unit that has no target yet
    pub async fn match_targets(&mut self, target: &dyn RecordStore) -> Result<(), MigrationError> {
        for kind in Kind::DEPLOY_ORDER {
            let units: Vec<&mut MigrationUnit> = self
                .package
                .units_of_mut(kind)
                .into_iter()
                .filter(|u| u.target.is_none())
                .collect();
            if units.is_empty() {
                continue;
            }
            debug!("Matching {} {} units", units.len(), kind);
            handler_for(kind).match_source_mappings(target, units).await?;
        }
        self.transition(StageEvent::TargetsMatched)?;
        self.resolve_if_complete()
    }

    /// Choose a target for one unit: a candidate id, or the create-new sentinel
    pub fn choose_target(&mut self, kind: Kind, id: &RecordId, target: RecordId) -> Result<(), MigrationError> {
        if !self.stage.can_choose_targets() {
            return Err(MigrationError::StageError(format!(
                "Targets cannot be chosen in stage {:?}",
                self.stage.stage()
            )));
        }
        let unit = self
            .package
            .units
            .iter_mut()
            .find(|u| u.kind == kind && &u.id == id)
            .ok_or_else(|| MigrationError::NotFound(format!("{} unit {}", kind, id)))?;
        check_choice(unit, &target)?;
        debug!("Chose target {} for {} {}", target, kind, unit.label());
        unit.target = Some(target);
        self.resolve_if_complete()
    }

    /// Fill every unchosen target by policy
    pub fn apply_policy(&mut self, policy: TargetPolicy) -> Result<(), MigrationError> {
        if !self.stage.can_choose_targets() {
            return Err(MigrationError::StageError(format!(
                "Targets cannot be chosen in stage {:?}",
                self.stage.stage()
            )));
        }
        for unit in self.package.units.iter_mut().filter(|u| u.target.is_none()) {
            unit.target = Some(policy_target(unit, policy));
        }
        self.resolve_if_complete()
    }

    /// Fetch the deployable snapshot of every unit
    pub async fn load_payloads(&mut self, source: &dyn RecordStore) -> Result<(), MigrationError> {
        if let Some(unit) = self
            .package
            .units
            .iter()
            .find(|u| u.target.is_none() && !(u.kind == Kind::Object && !u.is_concrete()))
        {
            return Err(MigrationError::InvalidArgument(format!(
                "No target chosen for {} {}",
                unit.kind,
                unit.label()
            )));
        }

        let context = SourceContext::load(source).await?;
        let options = self.package.options.clone();
        for kind in Kind::DEPLOY_ORDER {
            let units = self.package.units_of_mut(kind);
            if !units.is_empty() {
                handler_for(kind).deployment_payload(&context, &options, units).await?;
            }
        }
        Ok(())
    }

    /// Run every kind in validating mode against a scratch copy of the target
    pub async fn validate(&self, target: &dyn RecordStore) -> Result<(), MigrationError> {
        let scratch = MemoryStore::fork_from(target, &org::COLLECTIONS).await?;
        let mut units = self.package.units.clone();
        write_kinds(&scratch, &mut units, &self.package.options, &self.principal, WriteMode::Validating).await?;
        info!("Package {} validated", self.package.id);
        Ok(())
    }

    /// Commit every kind in deploy order. The first error stops the run and
    /// nothing already written is undone.
    pub async fn deploy(&mut self, target: &dyn RecordStore) -> Result<(), MigrationError> {
        if self.stage.stage() != &PackageStage::Deployment {
            return Err(MigrationError::StageError(format!(
                "Package {} is not ready to deploy: {:?}",
                self.package.id,
                self.stage.stage()
            )));
        }

        let result = write_kinds(
            target,
            &mut self.package.units,
            &self.package.options,
            &self.principal,
            WriteMode::Deploying,
        )
        .await;
        match result {
            Ok(()) => {
                info!("Package {} deployed", self.package.id);
                self.transition(StageEvent::DeploySucceeded)
            }
            Err(e) => {
                error!("Package {} failed to deploy: {}", self.package.id, e);
                self.transition(StageEvent::DeployFailed(e.to_string()))?;
                Err(e)
            }
        }
    }

    pub async fn create_backup(&self, target: &dyn RecordStore) -> Result<PackageBackup, MigrationError> {
        archive::create_backup(target).await
    }

    pub async fn rollback(&mut self, target: &dyn RecordStore, backup: &PackageBackup) -> Result<(), MigrationError> {
        archive::rollback(target, backup).await?;
        if matches!(self.stage.stage(), PackageStage::Deployed | PackageStage::Failed) {
            self.transition(StageEvent::RolledBack)?;
        }
        Ok(())
    }

    /// Back up, optionally validate, then deploy. A failed deploy is rolled
    /// back when asked to.
    pub async fn run(
        &mut self,
        target: &dyn RecordStore,
        validate_first: bool,
        rollback_on_failure: bool,
    ) -> Result<PackageBackup, MigrationError> {
        let backup = self.create_backup(target).await?;
        if validate_first {
            self.validate(target).await?;
        }
        if let Err(e) = self.deploy(target).await {
            if rollback_on_failure {
                warn!("Restoring pre-run state of package {}", self.package.id);
                self.rollback(target, &backup).await?;
            }
            return Err(e);
        }
        Ok(backup)
    }
}

fn new_unit(
    context: &SourceContext<'_>,
    kind: Kind,
    record: &Document,
    selected: bool,
) -> Result<MigrationUnit, MigrationError> {
    let id = id_of(record).ok_or_else(|| MigrationError::InvalidArgument(format!("{} record without an id", kind)))?;
    let handler = handler_for(kind);
    let mut unit = MigrationUnit::new(id, kind);
    handler.update_mapping(&mut unit, record)?;
    unit.dependencies = handler.dependencies(context, record)?;
    unit.selected = selected;
    Ok(unit)
}

/// Make a selection admit one more id
fn widen(selection: &mut Selection, id: &RecordId) {
    match selection.select {
        SelectMode::All => {}
        SelectMode::None => *selection = Selection::include(vec![id.clone()]),
        SelectMode::Include => {
            if !selection.ids.contains(id) {
                selection.ids.push(id.clone());
            }
        }
        SelectMode::Exclude => selection.ids.retain(|excluded| excluded != id),
    }
}

/// Pull every declared dependency missing from `units` in as an unselected
/// unit, repeating for the dependencies of those units
async fn close_dependencies(
    context: &SourceContext<'_>,
    units: &mut Vec<MigrationUnit>,
    configuration: &mut BTreeMap<Kind, Selection>,
) -> Result<(), MigrationError> {
    let mut index = 0;
    while index < units.len() {
        let dependencies = units[index].dependencies.clone();
        for dependency in dependencies {
            if units.iter().any(|u| u.kind == dependency.kind && u.id == dependency.id) {
                continue;
            }
            let selection = Selection::include(vec![dependency.id.clone()]);
            let record = handler_for(dependency.kind)
                .source_mapping_docs(context, &selection)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    MigrationError::InvalidArgument(format!(
                        "Missing dependency {} ({}) for {}",
                        dependency.id,
                        dependency.kind,
                        units[index].label()
                    ))
                })?;

            debug!("Including {} {} required by {}", dependency.kind, dependency.id, units[index].label());
            widen(configuration.entry(dependency.kind).or_default(), &dependency.id);
            units.push(new_unit(context, dependency.kind, &record, false)?);
        }
        index += 1;
    }
    Ok(())
}

/// Write each kind in deploy order. Every kind gets a context seeded from the
/// current unit targets; ids created by a kind are copied back into the units
/// before the next kind runs.
async fn write_kinds(
    store: &dyn RecordStore,
    units: &mut [MigrationUnit],
    options: &PackageOptions,
    principal: &RecordId,
    mode: WriteMode,
) -> Result<(), MigrationError> {
    for kind in Kind::DEPLOY_ORDER {
        let count = units.iter().filter(|u| u.kind == kind).count();
        if count == 0 {
            continue;
        }

        let (resolutions, result) = {
            let mut ctx = WriteContext::new(store, &*units, options, principal, mode);
            ctx.refresh_principals().await?;
            let handler = handler_for(kind);
            let result = match mode {
                WriteMode::Validating => handler.validate_for_target(&mut ctx).await,
                WriteMode::Deploying => handler.deploy(&mut ctx).await,
            };
            (ctx.resolutions, result)
        };

        for ((resolved_kind, source), target) in resolutions.iter() {
            if let Some(unit) = units
                .iter_mut()
                .find(|u| u.kind == *resolved_kind && &u.id == source && u.is_create())
            {
                unit.target = Some(target.clone());
            }
        }

        result?;
        info!("{} {} {} units", if mode == WriteMode::Validating { "Validated" } else { "Deployed" }, count, kind);
    }
    Ok(())
}
