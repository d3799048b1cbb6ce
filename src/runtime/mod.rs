//! Container runtime boundary
//!
//! The pipeline only sees the [`ContainerRuntime`] trait and the closed
//! [`PullEvent`] type; the runtime's native event shape stays inside the
//! implementation.

pub mod docker;

pub use docker::DockerRuntime;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;

pub type PullStream = BoxStream<'static, Result<PullEvent>>;
pub type ExportStream = BoxStream<'static, Result<Bytes>>;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether the image is already present in the local image store
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pull the image, yielding one event per layer status change
    async fn pull(&self, image: &str) -> Result<PullStream>;

    /// Serialize the image as an uncompressed tar stream
    async fn export(&self, image: &str) -> Result<ExportStream>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerStatus {
    PullingFsLayer,
    Waiting,
    Downloading,
    VerifyingChecksum,
    DownloadComplete,
    Extracting,
    PullComplete,
    AlreadyExists,
}

impl LayerStatus {
    /// Parse the runtime's status token; `None` for non-layer statuses
    pub fn parse(token: &str) -> Option<Self> {
        let status = match token.trim() {
            "Pulling fs layer" => LayerStatus::PullingFsLayer,
            "Waiting" => LayerStatus::Waiting,
            "Downloading" => LayerStatus::Downloading,
            "Verifying Checksum" => LayerStatus::VerifyingChecksum,
            "Download complete" => LayerStatus::DownloadComplete,
            "Extracting" => LayerStatus::Extracting,
            "Pull complete" => LayerStatus::PullComplete,
            "Already exists" => LayerStatus::AlreadyExists,
            _ => return None,
        };
        Some(status)
    }

    /// Layers in a terminal status are pinned at 100%
    pub fn is_terminal(&self) -> bool {
        matches!(self, LayerStatus::PullComplete | LayerStatus::AlreadyExists)
    }
}

impl fmt::Display for LayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            LayerStatus::PullingFsLayer => "Pulling fs layer",
            LayerStatus::Waiting => "Waiting",
            LayerStatus::Downloading => "Downloading",
            LayerStatus::VerifyingChecksum => "Verifying Checksum",
            LayerStatus::DownloadComplete => "Download complete",
            LayerStatus::Extracting => "Extracting",
            LayerStatus::PullComplete => "Pull complete",
            LayerStatus::AlreadyExists => "Already exists",
        };
        f.write_str(token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerEvent {
    pub layer_id: String,
    pub status: LayerStatus,
    pub current: Option<u64>,
    pub total: Option<u64>,
}

impl LayerEvent {
    pub fn new(layer_id: impl Into<String>, status: LayerStatus) -> Self {
        Self {
            layer_id: layer_id.into(),
            status,
            current: None,
            total: None,
        }
    }

    pub fn with_bytes(mut self, current: u64, total: u64) -> Self {
        self.current = Some(current);
        self.total = Some(total);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullEvent {
    Layer(LayerEvent),
    /// Image-level status line such as "Digest: sha256:..."
    Message(String),
}
