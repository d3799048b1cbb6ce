//! Docker Image Archiver Library
//!
//! Pulls container images through the Docker Engine API, saves them to a private
//! scratch tar and compresses that into `<storage root>/<image>.tar.gz`, keeping a
//! pollable progress record per image while doing so.

pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod runtime;

pub use archive::{ArchiveEntry, ArchiveStore};
pub use config::{AppConfig, CompressionSettings};
pub use error::{ArchiverError, FailureKind, Result};
pub use output::OutputManager;
pub use pipeline::{AcquisitionHandle, ArchiveService};
pub use progress::{ProgressRecord, ProgressStore, Status};
pub use runtime::{ContainerRuntime, LayerEvent, LayerStatus, PullEvent};
