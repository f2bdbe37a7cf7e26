//! Serializable models describing an envshift deployment package.
//!
//! These types are the wire format shared between the engine and whatever
//! orchestrator builds, stores and reviews packages.

pub mod models;

pub use models::ids::RecordId;
pub use models::kind::Kind;
pub use models::package::{DeploymentPackage, PackageOptions, PackageStage};
pub use models::selection::{SelectMode, Selection};
pub use models::unit::{Dependency, MatchType, MigrationUnit, TargetCandidate};
