//! Directories the tool files packages and backups into

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;

use crate::errors::MigrationError;
use crate::filesys::file::File;

#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn create(&self) -> Result<(), MigrationError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    /// Files with this extension, newest first. A directory that was never
    /// created holds none.
    pub async fn files_by_age(&self, extension: &str) -> Result<Vec<File>, MigrationError> {
        let mut entries = match fs::read_dir(&self.path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                found.push((metadata.modified()?, path));
            }
        }
        // Newest first; names break ties so the order is stable
        found.sort_by(|(a_at, a), (b_at, b)| b_at.cmp(a_at).then_with(|| b.cmp(a)));
        Ok(found.into_iter().map(|(_, path)| File::new(path)).collect())
    }
}
