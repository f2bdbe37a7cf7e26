//! Store snapshots, deployment packages and encoded backups on disk

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use deploy_models::DeploymentPackage;
use record_store::{MemoryStore, StoreSnapshot};
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;

use crate::backup::archive::PackageBackup;
use crate::errors::MigrationError;

#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Settings or any other JSON document. Parse failures name the file.
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, MigrationError> {
        let contents = self.read().await?;
        serde_json::from_str(&contents)
            .map_err(|e| MigrationError::ConfigError(format!("{}: {}", self.path.display(), e)))
    }

    /// Load a tenant snapshot into an in-memory store
    pub async fn read_snapshot(&self) -> Result<MemoryStore, MigrationError> {
        let snapshot: StoreSnapshot = self.read_json().await?;
        Ok(MemoryStore::from_snapshot(snapshot))
    }

    pub async fn write_snapshot(&self, store: &MemoryStore) -> Result<(), MigrationError> {
        self.write_json(&store.snapshot().await).await
    }

    pub async fn read_package(&self) -> Result<DeploymentPackage, MigrationError> {
        self.read_json().await
    }

    pub async fn write_package(&self, package: &DeploymentPackage) -> Result<(), MigrationError> {
        self.write_json(package).await
    }

    /// Decode an archive and check its digest
    pub async fn read_backup(&self) -> Result<PackageBackup, MigrationError> {
        let encoded = self.read().await?;
        PackageBackup::decode(&encoded).map_err(|e| match e {
            MigrationError::BackupError(msg) => {
                MigrationError::BackupError(format!("{}: {}", self.path.display(), msg))
            }
            other => other,
        })
    }

    pub async fn write_backup(&self, backup: &PackageBackup) -> Result<(), MigrationError> {
        self.replace(backup.encode()?.as_bytes()).await
    }

    async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), MigrationError> {
        let contents = serde_json::to_vec_pretty(value)?;
        self.replace(&contents).await
    }

    async fn read(&self) -> Result<String, MigrationError> {
        fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.io_error(e))
    }

    /// Write next to the file, then rename over it, so a reader never sees a
    /// half-written package or backup
    async fn replace(&self, contents: &[u8]) -> Result<(), MigrationError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| self.io_error(e))?;
        }
        let mut partial = OsString::from(self.path.as_os_str());
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        fs::write(&partial, contents).await.map_err(|e| self.io_error(e))?;
        fs::rename(&partial, &self.path).await.map_err(|e| self.io_error(e))?;
        Ok(())
    }

    fn io_error(&self, err: io::Error) -> MigrationError {
        MigrationError::IoError(io::Error::new(err.kind(), format!("{}: {}", self.path.display(), err)))
    }
}
