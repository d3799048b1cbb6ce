//! Acquisition pipeline: admission, download, save and compression of one image
//!
//! [`ArchiveService`] is the facade a transport talks to. Each admitted task runs
//! as its own tokio task and walks the phases
//! `Starting -> Downloading -> Saving -> Compressing -> Complete | Error`,
//! writing every observable change into the shared [`ProgressStore`].

pub mod aggregator;
pub mod archiver;
pub mod compressor;
pub mod registry;

pub use aggregator::{Applied, LayerAggregator};
pub use archiver::{Archiver, SavedImage};
pub use compressor::{Compressed, CompressionMethod, Compressor, ProgressSink};
pub use registry::{TaskInfo, TaskRegistry, TaskState};

use crate::archive::{ArchiveEntry, ArchiveStore};
use crate::config::AppConfig;
use crate::error::{ArchiverError, Result};
use crate::output::format_size;
use crate::progress::{bands, ProgressRecord, ProgressStore, Status};
use crate::runtime::{ContainerRuntime, DockerRuntime, PullEvent};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of a finished acquisition
#[derive(Debug, Clone)]
pub struct Completion {
    pub path: PathBuf,
    pub size: u64,
    pub digest: Option<String>,
    pub method: Option<CompressionMethod>,
}

/// Handle to an admitted acquisition; dropping it does not cancel the task
#[derive(Debug)]
pub struct AcquisitionHandle {
    pub image: String,
    pub task_id: Uuid,
    handle: JoinHandle<Result<PathBuf>>,
}

impl AcquisitionHandle {
    /// Wait for the task to reach a terminal state
    pub async fn wait(self) -> Result<PathBuf> {
        self.handle.await?
    }
}

#[derive(Clone)]
pub struct ArchiveService {
    inner: Arc<Inner>,
}

struct Inner {
    config: AppConfig,
    runtime: Arc<dyn ContainerRuntime>,
    store: ProgressStore,
    registry: TaskRegistry,
    archives: ArchiveStore,
    archiver: Arc<Archiver>,
    compressor: Arc<Compressor>,
}

impl ArchiveService {
    pub fn new(config: AppConfig, runtime: Arc<dyn ContainerRuntime>) -> Result<Self> {
        config.validate()?;
        let archiver = Archiver::new(runtime.clone(), config.scratch_dir(), config.save_timeout);
        let compressor = Compressor::new(config.compression.clone());
        let archives = ArchiveStore::new(config.downloads_dir.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                runtime,
                store: ProgressStore::new(),
                registry: TaskRegistry::new(),
                archives,
                archiver: Arc::new(archiver),
                compressor: Arc::new(compressor),
            }),
        })
    }

    /// Service backed by the local Docker daemon
    pub fn connect(config: AppConfig) -> Result<Self> {
        let runtime = DockerRuntime::connect()?;
        Self::new(config, Arc::new(runtime))
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &ProgressStore {
        &self.inner.store
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    pub fn archives(&self) -> &ArchiveStore {
        &self.inner.archives
    }

    /// Admit an acquisition for `image` and start it in the background
    pub fn start_acquisition(&self, image: &str) -> Result<AcquisitionHandle> {
        let image = image.trim();
        if image.is_empty() {
            return Err(ArchiverError::Config("image identifier must not be empty".into()));
        }

        let store = &self.inner.store;
        let task_id = self
            .inner
            .registry
            .admit(image, |task_id| store.reset(image, task_id))
            .inspect_err(|e| warn!(image, error = %e, "acquisition rejected"))?;
        info!(image, %task_id, "acquisition admitted");

        let inner = self.inner.clone();
        let owned = image.to_string();
        let handle = tokio::spawn(async move { run_task(inner, owned, task_id).await });

        Ok(AcquisitionHandle {
            image: image.to_string(),
            task_id,
            handle,
        })
    }

    /// Current record, or a `NotFound` placeholder for unknown identifiers
    pub fn get_progress(&self, image: &str) -> ProgressRecord {
        let image = image.trim();
        self.inner
            .store
            .get(image)
            .unwrap_or_else(|| ProgressRecord::not_found(image))
    }

    pub async fn list_archives(&self) -> Result<Vec<ArchiveEntry>> {
        self.inner.archives.list().await
    }

    pub async fn clear_archives(&self) -> Result<usize> {
        self.inner.archives.clear().await
    }

    pub async fn fetch_archive(&self, path: &Path) -> Result<(tokio::fs::File, u64)> {
        self.inner.archives.fetch(path).await
    }
}

async fn run_task(inner: Arc<Inner>, image: String, task_id: Uuid) -> Result<PathBuf> {
    let started = Instant::now();
    let outcome = run_pipeline(&inner, &image, task_id).await;

    // registry first, so a poller that sees a terminal record can re-admit immediately
    match outcome {
        Ok(done) => {
            inner.registry.finish(&image, task_id, TaskState::Complete);
            inner.store.update_task(&image, task_id, |record| {
                if let Some(digest) = &done.digest {
                    record.push_log(format!("Image digest: {}", digest));
                }
                if let Some(method) = done.method {
                    record.push_log(format!("Compressed with {} compressor", method));
                }
                record.push_log(format!(
                    "Archive ready: {} ({})",
                    done.path.display(),
                    format_size(done.size)
                ));
                record.complete(done.path.clone(), format!("Archive ready ({})", format_size(done.size)));
            });
            info!(
                image,
                %task_id,
                path = %done.path.display(),
                size = done.size,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "acquisition complete"
            );
            Ok(done.path)
        }
        Err(err) => {
            inner.registry.finish(&image, task_id, TaskState::Failed);
            inner.store.update_task(&image, task_id, |record| record.fail(&err));
            error!(image, %task_id, kind = ?err.kind(), error = %err, "acquisition failed");
            Err(err)
        }
    }
}

async fn run_pipeline(inner: &Arc<Inner>, image: &str, task_id: Uuid) -> Result<Completion> {
    let store = &inner.store;
    let pause = inner.config.phase_interval;
    let destination = inner.archives.archive_path(image);

    if inner.config.reuse_existing {
        if let Some(size) = inner.archives.existing(image).await {
            info!(image, path = %destination.display(), "reusing existing archive");
            store.update_task(image, task_id, |r| {
                r.push_log(format!("Reusing existing archive {}", destination.display()))
            });
            return Ok(Completion {
                path: destination,
                size,
                digest: None,
                method: None,
            });
        }
    }

    download(inner, image, task_id).await?;
    tokio::time::sleep(pause).await;

    store.update_task(image, task_id, |r| {
        r.enter(Status::Saving, "Saving image");
        r.advance(bands::SAVING);
        r.push_log("Saving image to temporary tar");
    });
    inner.archives.ensure_root().await?;

    // save and compress on their own task so child-process I/O never blocks this one
    let worker = {
        let inner = inner.clone();
        let image = image.to_string();
        tokio::spawn(async move { save_and_compress(inner, image, task_id, destination).await })
    };
    worker.await?
}

async fn download(inner: &Inner, image: &str, task_id: Uuid) -> Result<()> {
    let store = &inner.store;
    let pause = inner.config.phase_interval;

    if inner.runtime.image_exists(image).await? {
        debug!(image, "image present locally, skipping pull");
        store.update_task(image, task_id, |r| {
            r.enter(Status::Downloading, "Image found locally");
            r.advance(bands::LOCAL_IMAGE_FIRST);
            r.push_log("Image already present locally, skipping download");
        });
        tokio::time::sleep(pause).await;
        store.update_task(image, task_id, |r| r.advance(bands::LOCAL_IMAGE_SECOND));
        return Ok(());
    }

    store.update_task(image, task_id, |r| {
        r.enter(Status::Downloading, "Pulling image");
        r.advance(bands::DOWNLOAD_FLOOR);
        r.push_log(format!("Pulling {}", image));
    });

    let mut events = inner.runtime.pull(image).await?;
    let mut aggregator = LayerAggregator::new();

    while let Some(event) = events.next().await {
        match event? {
            PullEvent::Message(message) => {
                store.update_task(image, task_id, |r| r.push_log(message));
            }
            PullEvent::Layer(layer) => {
                let applied = aggregator.apply(&layer);
                let snapshot = aggregator.snapshot(&layer.layer_id);
                let detail = format!(
                    "Downloading layers ({}/{} complete)",
                    aggregator.completed_layers(),
                    aggregator.total_layers()
                );
                store.update_task(image, task_id, |r| {
                    if let Some(snapshot) = snapshot {
                        r.layers.insert(layer.layer_id.clone(), snapshot);
                    }
                    if applied.first_seen || applied.reached_terminal {
                        r.push_log(format!("Layer {}: {}", layer.layer_id, layer.status));
                    }
                    r.enter(Status::Downloading, detail);
                    r.advance(applied.overall);
                });
            }
        }
    }

    info!(image, layers = aggregator.total_layers(), "pull finished");
    store.update_task(image, task_id, |r| {
        r.push_log(format!("Pull complete ({} layers)", aggregator.total_layers()))
    });
    Ok(())
}

async fn save_and_compress(
    inner: Arc<Inner>,
    image: String,
    task_id: Uuid,
    destination: PathBuf,
) -> Result<Completion> {
    let store = inner.store.clone();

    let saved = {
        let image = image.as_str();
        let store = &store;
        inner
            .archiver
            .save(image, move |written| {
                store.update_task(image, task_id, |r| {
                    r.describe(format!("Saving image ({})", format_size(written)));
                });
            })
            .await?
    };
    info!(image, size = saved.size, digest = %saved.digest, "image saved");
    store.update_task(&image, task_id, |r| {
        r.push_log(format!("Saved {} uncompressed", format_size(saved.size)))
    });

    tokio::time::sleep(inner.config.phase_interval).await;
    store.update_task(&image, task_id, |r| {
        r.enter(Status::Compressing, "Compressing archive");
        r.advance(bands::COMPRESS_LOW);
        r.push_log(format!(
            "Compressing with {} ({} threads)",
            inner.compressor.settings().program,
            inner.compressor.settings().threads
        ));
    });

    let sink: ProgressSink = {
        let store = store.clone();
        let image = image.clone();
        Arc::new(move |percent| {
            store.update_task(&image, task_id, |r| {
                r.describe(format!("Compressing archive ({}%)", percent));
                r.advance(bands::compression(percent));
            });
        })
    };
    let compressed = inner.compressor.compress(saved.path(), &destination, sink).await?;
    // scratch tar is removed here
    drop(saved.file);

    tokio::time::sleep(inner.config.phase_interval).await;
    Ok(Completion {
        path: compressed.path,
        size: compressed.size,
        digest: Some(saved.digest),
        method: Some(compressed.method),
    })
}
