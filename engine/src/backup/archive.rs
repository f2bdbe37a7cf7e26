//! Whole-package backup archive

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use deploy_models::Kind;
use futures::future::try_join_all;
use record_store::RecordStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backup::KindBackup;
use crate::errors::MigrationError;
use crate::handlers::handler_for;
use crate::utils::sha256_hash;

/// Pre-run state of every kind a package can write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageBackup {
    pub taken_at: DateTime<Utc>,
    pub kinds: BTreeMap<Kind, KindBackup>,

    /// SHA-256 of the serialized `kinds`
    pub digest: String,
}

impl PackageBackup {
    pub fn new(kinds: BTreeMap<Kind, KindBackup>) -> Result<Self, MigrationError> {
        let digest = digest_of(&kinds)?;
        Ok(Self {
            taken_at: Utc::now(),
            kinds,
            digest,
        })
    }

    /// Check the snapshot against its digest
    pub fn verify(&self) -> Result<(), MigrationError> {
        let actual = digest_of(&self.kinds)?;
        if actual != self.digest {
            return Err(MigrationError::BackupError(format!(
                "Backup digest mismatch: expected {}, found {}",
                self.digest, actual
            )));
        }
        Ok(())
    }

    /// Base64 transport form
    pub fn encode(&self) -> Result<String, MigrationError> {
        let bytes = serde_json::to_vec(self)?;
        Ok(STANDARD.encode(bytes))
    }

    pub fn decode(encoded: &str) -> Result<Self, MigrationError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| MigrationError::BackupError(format!("Invalid backup encoding: {}", e)))?;
        let backup: Self = serde_json::from_slice(&bytes)?;
        backup.verify()?;
        Ok(backup)
    }
}

fn digest_of(kinds: &BTreeMap<Kind, KindBackup>) -> Result<String, MigrationError> {
    let bytes = serde_json::to_vec(kinds)?;
    Ok(sha256_hash(&bytes))
}

/// Snapshot every kind. Snapshots are read-only and gathered concurrently.
pub async fn create_backup(target: &dyn RecordStore) -> Result<PackageBackup, MigrationError> {
    let snapshots = try_join_all(Kind::DEPLOY_ORDER.iter().map(|kind| async move {
        let backup = handler_for(*kind).create_backup(target).await?;
        Ok::<_, MigrationError>((*kind, backup))
    }))
    .await?;

    let mut kinds = BTreeMap::new();
    for (kind, backup) in snapshots {
        if let Some(backup) = backup {
            debug!("Backed up {}: {}", kind, backup.describe());
            kinds.insert(kind, backup);
        }
    }
    info!("Backup captured for {} kinds", kinds.len());
    PackageBackup::new(kinds)
}

/// Restore every kind in the backup, one at a time
pub async fn rollback(target: &dyn RecordStore, backup: &PackageBackup) -> Result<(), MigrationError> {
    backup.verify()?;
    for kind in Kind::DEPLOY_ORDER.iter().rev() {
        if let Some(snapshot) = backup.kinds.get(kind) {
            info!("Rolling back {}: {}", kind, snapshot.describe());
            handler_for(*kind).rollback(target, snapshot).await?;
        }
    }
    Ok(())
}
