//! Package stage machine

use deploy_models::PackageStage;

/// Something that happened to a package
#[derive(Debug, Clone)]
pub enum StageEvent {
    /// Source units enumerated and closed over their dependencies
    SourcesLoaded,

    /// Target candidates computed
    TargetsMatched,

    /// Every unit has a target
    TargetsResolved,

    /// Deploy committed every kind
    DeploySucceeded,

    /// Deploy stopped on an error
    DeployFailed(String),

    /// Pre-run backup restored
    RolledBack,

    /// Back to editing selections
    Reset,
}

/// Tracks the stage of one package
#[derive(Debug, Clone)]
pub struct StageMachine {
    stage: PackageStage,
    error: Option<String>,
}

impl StageMachine {
    pub fn new() -> Self {
        Self::resume(PackageStage::Configuration)
    }

    /// Continue from a stage recorded on a saved package
    pub fn resume(stage: PackageStage) -> Self {
        Self { stage, error: None }
    }

    pub fn stage(&self) -> &PackageStage {
        &self.stage
    }

    /// Error of the last failed deploy
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition stage
    pub fn process(&mut self, event: StageEvent) -> Result<(), String> {
        let next = match (&self.stage, &event) {
            (PackageStage::Configuration, StageEvent::SourcesLoaded) => PackageStage::SourceMappings,

            (PackageStage::SourceMappings, StageEvent::TargetsMatched)
            | (PackageStage::TargetMappings, StageEvent::TargetsMatched)
            | (PackageStage::Deployment, StageEvent::TargetsMatched) => PackageStage::TargetMappings,

            (PackageStage::TargetMappings, StageEvent::TargetsResolved)
            | (PackageStage::Deployment, StageEvent::TargetsResolved) => PackageStage::Deployment,

            (PackageStage::Deployment, StageEvent::DeploySucceeded) => {
                self.error = None;
                PackageStage::Deployed
            }
            (PackageStage::Deployment, StageEvent::DeployFailed(err)) => {
                self.error = Some(err.clone());
                PackageStage::Failed
            }

            // Retry after fixing targets
            (PackageStage::Failed, StageEvent::TargetsResolved) => PackageStage::Deployment,

            (PackageStage::Deployed, StageEvent::RolledBack) | (PackageStage::Failed, StageEvent::RolledBack) => {
                PackageStage::RolledBack
            }

            (_, StageEvent::Reset) => {
                self.error = None;
                PackageStage::Configuration
            }

            (stage, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", stage, event));
            }
        };

        self.stage = next;
        Ok(())
    }

    /// Targets may still be edited
    pub fn can_choose_targets(&self) -> bool {
        matches!(self.stage, PackageStage::TargetMappings | PackageStage::Deployment)
    }
}

impl Default for StageMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut machine = StageMachine::new();
        machine.process(StageEvent::SourcesLoaded).unwrap();
        machine.process(StageEvent::TargetsMatched).unwrap();
        assert!(machine.can_choose_targets());
        machine.process(StageEvent::TargetsResolved).unwrap();
        machine.process(StageEvent::DeploySucceeded).unwrap();
        assert_eq!(machine.stage(), &PackageStage::Deployed);
    }

    #[test]
    fn test_failure_keeps_error_until_reset() {
        let mut machine = StageMachine::resume(PackageStage::Deployment);
        machine.process(StageEvent::DeployFailed("boom".into())).unwrap();
        assert_eq!(machine.stage(), &PackageStage::Failed);
        assert_eq!(machine.error(), Some("boom"));

        machine.process(StageEvent::RolledBack).unwrap();
        machine.process(StageEvent::Reset).unwrap();
        assert_eq!(machine.stage(), &PackageStage::Configuration);
        assert!(machine.error().is_none());
    }

    #[test]
    fn test_deploy_requires_resolved_targets() {
        let mut machine = StageMachine::resume(PackageStage::TargetMappings);
        assert!(machine.process(StageEvent::DeploySucceeded).is_err());
        assert_eq!(machine.stage(), &PackageStage::TargetMappings);
    }
}
