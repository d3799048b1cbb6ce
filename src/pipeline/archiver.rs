//! Saves a resolved image into a private temporary tar file

use crate::error::{ArchiverError, Result, TimeoutPhase};
use crate::runtime::ContainerRuntime;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Uncompressed image tar; the file is removed when this value is dropped
#[derive(Debug)]
pub struct SavedImage {
    pub file: TempPath,
    pub size: u64,
    pub digest: String,
}

impl SavedImage {
    pub fn path(&self) -> &Path {
        &self.file
    }
}

pub struct Archiver {
    runtime: Arc<dyn ContainerRuntime>,
    scratch_dir: PathBuf,
    timeout: Duration,
}

impl Archiver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, scratch_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            runtime,
            scratch_dir,
            timeout,
        }
    }

    /// Export `image` into a scratch file, reporting bytes written after each chunk.
    ///
    /// The save budget is measured from the first byte received. Until then the
    /// export may take up to one full budget to start producing data.
    pub async fn save<F>(&self, image: &str, mut on_written: F) -> Result<SavedImage>
    where
        F: FnMut(u64) + Send,
    {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let temp = tempfile::Builder::new()
            .prefix(".image-save-")
            .suffix(".tar")
            .tempfile_in(&self.scratch_dir)?;
        let (file, path) = temp.into_parts();
        let mut writer = tokio::fs::File::from_std(file);
        debug!(image, path = %path.display(), "exporting image to scratch file");

        let mut chunks = self.runtime.export(image).await?;
        let mut hasher = Sha256::new();
        let mut size = 0u64;
        let mut first_byte: Option<Instant> = None;

        loop {
            let wait = match first_byte {
                Some(started) => self
                    .timeout
                    .checked_sub(started.elapsed())
                    .ok_or_else(|| self.timed_out())?,
                None => self.timeout,
            };
            let next = tokio::time::timeout(wait, chunks.next())
                .await
                .map_err(|_| self.timed_out())?;
            let Some(chunk) = next else { break };
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }

            let started = *first_byte.get_or_insert_with(Instant::now);
            if started.elapsed() > self.timeout {
                return Err(self.timed_out());
            }
            writer.write_all(&chunk).await?;
            hasher.update(&chunk);
            size += chunk.len() as u64;
            on_written(size);
        }

        writer.flush().await?;
        drop(writer);

        if size == 0 {
            return Err(ArchiverError::Runtime(format!("saved image {} is empty", image)));
        }

        Ok(SavedImage {
            file: path,
            size,
            digest: format!("sha256:{}", hex::encode(hasher.finalize())),
        })
    }

    fn timed_out(&self) -> ArchiverError {
        ArchiverError::timeout(TimeoutPhase::Save, self.timeout)
    }
}
