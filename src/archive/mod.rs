//! Archive storage root: naming, listing, clearing and fetching finished archives

use crate::error::{ArchiverError, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

pub const ARCHIVE_EXTENSION: &str = ".tar.gz";

/// Replace path separators and tag colons so the identifier is a safe file stem
pub fn sanitize_image_name(image: &str) -> String {
    image.replace(['/', ':'], "_")
}

pub fn archive_file_name(image: &str) -> String {
    format!("{}{}", sanitize_image_name(image), ARCHIVE_EXTENSION)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ArchiveStore {
    root: PathBuf,
}

impl ArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn archive_path(&self, image: &str) -> PathBuf {
        self.root.join(archive_file_name(image))
    }

    /// Size of an existing, non-empty archive for `image`
    pub async fn existing(&self, image: &str) -> Option<u64> {
        let metadata = tokio::fs::metadata(self.archive_path(image)).await.ok()?;
        (metadata.is_file() && metadata.len() > 0).then_some(metadata.len())
    }

    /// Finished archives, newest first
    pub async fn list(&self) -> Result<Vec<ArchiveEntry>> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found: Vec<(SystemTime, ArchiveEntry)> = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(ARCHIVE_EXTENSION) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((
                created,
                ArchiveEntry {
                    name,
                    size: metadata.len(),
                    created_at: format_timestamp(created),
                    path: entry.path(),
                },
            ));
        }

        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));
        Ok(found.into_iter().map(|(_, entry)| entry).collect())
    }

    /// Delete every archive in the root; other files are left alone
    pub async fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in self.list().await? {
            tokio::fs::remove_file(&entry.path).await.map_err(|e| {
                warn!(path = %entry.path.display(), error = %e, "failed to delete archive");
                e
            })?;
            removed += 1;
        }
        info!(removed, root = %self.root.display(), "cleared archives");
        Ok(removed)
    }

    /// Open an archive for reading, refusing anything outside the storage root
    pub async fn fetch(&self, path: &Path) -> Result<(tokio::fs::File, u64)> {
        let resolved = self.resolve(path).await?;
        let file = tokio::fs::File::open(&resolved).await?;
        let size = file.metadata().await?.len();
        Ok((file, size))
    }

    async fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let resolved = match tokio::fs::canonicalize(path).await {
            Ok(p) => p,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ArchiverError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let root = tokio::fs::canonicalize(&self.root).await?;
        if !resolved.starts_with(&root) {
            return Err(ArchiverError::AccessDenied(path.to_path_buf()));
        }
        if !tokio::fs::metadata(&resolved).await?.is_file() {
            return Err(ArchiverError::NotFound(path.display().to_string()));
        }
        Ok(resolved)
    }
}

fn format_timestamp(time: SystemTime) -> String {
    let local: DateTime<Local> = time.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}
