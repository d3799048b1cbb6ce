//! Docker Engine implementation of [`ContainerRuntime`] on top of bollard

use super::{ContainerRuntime, ExportStream, LayerEvent, LayerStatus, PullEvent, PullStream};
use crate::error::{ArchiverError, Result};
use async_trait::async_trait;
use bollard::Docker;
use bollard::image::CreateImageOptions;
use bollard::models::CreateImageInfo;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt, TryStreamExt};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform's default socket
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn pull(&self, image: &str) -> Result<PullStream> {
        let (from_image, tag) = split_reference(image);
        let docker = self.docker.clone();
        let (mut tx, rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(async move {
            let options = CreateImageOptions {
                from_image,
                tag,
                ..Default::default()
            };
            let mut events = docker.create_image(Some(options), None, None);
            while let Some(item) = events.next().await {
                let converted = match item {
                    Ok(info) => match convert_pull_info(info) {
                        Ok(Some(event)) => Ok(event),
                        Ok(None) => continue,
                        Err(e) => Err(e),
                    },
                    Err(e) => Err(ArchiverError::from(e)),
                };
                let failed = converted.is_err();
                if tx.send(converted).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(rx.boxed())
    }

    async fn export(&self, image: &str) -> Result<ExportStream> {
        let docker = self.docker.clone();
        let image = image.to_string();
        let (mut tx, rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(async move {
            let mut chunks = docker.export_image(&image).map_err(ArchiverError::from);
            while let Some(chunk) = chunks.next().await {
                let failed = chunk.is_err();
                if tx.send(chunk).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(rx.boxed())
    }
}

/// Split `repository[:tag]` so the engine never falls back to pulling every tag
pub fn split_reference(image: &str) -> (String, String) {
    if image.contains('@') {
        return (image.to_string(), String::new());
    }
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(offset) => {
            let colon = name_start + offset;
            (image[..colon].to_string(), image[colon + 1..].to_string())
        }
        None => (image.to_string(), "latest".to_string()),
    }
}

fn convert_pull_info(info: CreateImageInfo) -> Result<Option<PullEvent>> {
    if let Some(error) = info.error {
        return Err(ArchiverError::Runtime(error));
    }
    let Some(status) = info.status else {
        return Ok(None);
    };

    match (info.id, LayerStatus::parse(&status)) {
        (Some(id), Some(layer_status)) => {
            let mut event = LayerEvent::new(id, layer_status);
            if let Some(detail) = info.progress_detail {
                event.current = detail.current.and_then(|v| u64::try_from(v).ok());
                event.total = detail.total.and_then(|v| u64::try_from(v).ok());
            }
            Ok(Some(PullEvent::Layer(event)))
        }
        (Some(id), None) => Ok(Some(PullEvent::Message(format!("{}: {}", id, status)))),
        (None, _) => Ok(Some(PullEvent::Message(status))),
    }
}
