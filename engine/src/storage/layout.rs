//! Storage layout configuration

use std::path::PathBuf;

use deploy_models::RecordId;

use crate::errors::MigrationError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Encoded package backups
pub const BACKUP_EXTENSION: &str = "b64";

/// Where the tool keeps its settings, backups and logs
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the backups directory
    pub fn backups_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("backups"))
    }

    /// Backup file for one package run
    pub fn backup_file(&self, package_id: &RecordId) -> File {
        self.backups_dir().file(&format!("{}.{}", package_id, BACKUP_EXTENSION))
    }

    /// Saved deployment packages
    pub fn packages_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("packages"))
    }

    pub fn package_file(&self, package_id: &RecordId) -> File {
        self.packages_dir().file(&format!("{}.json", package_id))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), MigrationError> {
        self.backups_dir().create().await?;
        self.packages_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }

    /// Saved backups, newest first
    pub async fn list_backups(&self) -> Result<Vec<File>, MigrationError> {
        self.backups_dir().files_by_age(BACKUP_EXTENSION).await
    }

    /// Most recently written backup, if any
    pub async fn latest_backup(&self) -> Result<Option<File>, MigrationError> {
        Ok(self.list_backups().await?.into_iter().next())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new(PathBuf::from(".envshift"))
    }
}
