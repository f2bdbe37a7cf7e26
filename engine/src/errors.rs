//! Error types for the migration engine

use deploy_models::Kind;
use record_store::StoreError;
use thiserror::Error;

/// Main error type for the migration engine
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Missing source record, chosen target record or dependency mapping
    #[error("Not found: {0}")]
    NotFound(String),

    /// Incompatible shapes between a source record and its chosen target
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Quota and permission limits
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Duplicate names for kinds that forbid them
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{operation} is not implemented for {kind} units")]
    Unimplemented {
        kind: Kind,
        operation: &'static str,
    },

    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Stage error: {0}")]
    StageError(String),

    #[error("Backup error: {0}")]
    BackupError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MigrationError {
    /// Stable short code for reports
    pub fn code(&self) -> &'static str {
        match self {
            MigrationError::NotFound(_) => "not_found",
            MigrationError::InvalidArgument(_) => "invalid_argument",
            MigrationError::AccessDenied(_) => "access_denied",
            MigrationError::Conflict(_) => "conflict",
            MigrationError::Unimplemented { .. } => "unimplemented",
            MigrationError::StoreError(_) => "store",
            MigrationError::IoError(_) => "io",
            MigrationError::JsonError(_) => "json",
            MigrationError::ConfigError(_) => "config",
            MigrationError::StageError(_) => "stage",
            MigrationError::BackupError(_) => "backup",
            MigrationError::Internal(_) => "internal",
        }
    }
}

impl From<anyhow::Error> for MigrationError {
    fn from(err: anyhow::Error) -> Self {
        MigrationError::Internal(err.to_string())
    }
}
