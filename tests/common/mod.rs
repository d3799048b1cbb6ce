//! Scripted container runtime and helpers shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use docker_image_archiver::error::ArchiverError;
use docker_image_archiver::runtime::{ExportStream, PullStream};
use docker_image_archiver::{AcquisitionHandle, AppConfig, ArchiveService, ContainerRuntime, PullEvent, Status};
use futures::{stream, StreamExt};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Plays back a fixed pull script and exports a fixed tar
#[derive(Default)]
pub struct ScriptedRuntime {
    pub present: bool,
    pub pull_script: Vec<(Duration, PullEvent)>,
    pub pull_error: Option<String>,
    pub export: Vec<u8>,
    /// Pause before each 512-byte export chunk
    pub export_delay: Duration,
    pub pulls: AtomicUsize,
    pub exports: AtomicUsize,
}

impl ScriptedRuntime {
    pub fn remote(pull_script: Vec<(Duration, PullEvent)>) -> Self {
        Self {
            pull_script,
            export: image_tar(),
            ..Self::default()
        }
    }

    pub fn local() -> Self {
        Self {
            present: true,
            export: image_tar(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn image_exists(&self, _image: &str) -> docker_image_archiver::Result<bool> {
        Ok(self.present)
    }

    async fn pull(&self, _image: &str) -> docker_image_archiver::Result<PullStream> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let events = stream::iter(self.pull_script.clone()).then(|(delay, event)| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, ArchiverError>(event)
        });
        Ok(match self.pull_error.clone() {
            Some(message) => events
                .chain(stream::once(async move { Err(ArchiverError::Runtime(message)) }))
                .boxed(),
            None => events.boxed(),
        })
    }

    async fn export(&self, _image: &str) -> docker_image_archiver::Result<ExportStream> {
        self.exports.fetch_add(1, Ordering::SeqCst);
        let chunks: Vec<Bytes> = self.export.chunks(512).map(Bytes::copy_from_slice).collect();
        let delay = self.export_delay;
        Ok(stream::iter(chunks)
            .then(move |chunk| async move {
                tokio::time::sleep(delay).await;
                Ok::<_, ArchiverError>(chunk)
            })
            .boxed())
    }
}

/// A small docker-save style tar with a manifest and one layer
pub fn image_tar() -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    append(
        &mut builder,
        "manifest.json",
        br#"[{"Config":"config.json","RepoTags":["alpine:latest"],"Layers":["layer.tar"]}]"#,
    );
    append(&mut builder, "config.json", br#"{"architecture":"amd64","os":"linux"}"#);
    append(&mut builder, "layer.tar", &vec![7u8; 4096]);
    builder.into_inner().unwrap()
}

fn append(builder: &mut tar::Builder<Vec<u8>>, name: &str, data: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, data).unwrap();
}

/// Entry names of a produced `.tar.gz`
pub fn archive_entries(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().display().to_string();
            let mut sink = Vec::new();
            entry.read_to_end(&mut sink).unwrap();
            name
        })
        .collect()
}

/// Fast phases, `gzip -c` as the parallel compressor, everything under `root`
pub fn test_config(root: &Path) -> AppConfig {
    let mut config = AppConfig::new(root.join("downloads"));
    config.scratch_dir = Some(root.join("scratch"));
    config.phase_interval = Duration::from_millis(50);
    config.compression.program = "gzip".into();
    config.compression.args = Some(vec!["-c".into()]);
    config.compression.sample_interval = Duration::from_millis(20);
    config.compression.exit_grace = Duration::from_secs(10);
    config
}

pub fn service(config: AppConfig, runtime: ScriptedRuntime) -> (ArchiveService, Arc<ScriptedRuntime>) {
    let runtime = Arc::new(runtime);
    let service = ArchiveService::new(config, runtime.clone()).unwrap();
    (service, runtime)
}

/// Poll like a remote caller until the task is terminal; returns each distinct (status, progress)
pub async fn observe(service: &ArchiveService, handle: &AcquisitionHandle) -> Vec<(Status, u8)> {
    let mut seen: Vec<(Status, u8)> = Vec::new();
    loop {
        let record = service.get_progress(&handle.image);
        let current = (record.status, record.progress);
        if seen.last() != Some(&current) {
            seen.push(current);
        }
        if record.status.is_terminal() {
            return seen;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn statuses(seen: &[(Status, u8)]) -> Vec<Status> {
    let mut out: Vec<Status> = Vec::new();
    for (status, _) in seen {
        if out.last() != Some(status) {
            out.push(*status);
        }
    }
    out
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}
