//! Error types for the acquisition pipeline
//!
//! Every stage returns [`Result`]; the task folds the error into the image's
//! progress record through [`ArchiverError::kind`] and [`ArchiverError::diagnostics`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, ArchiverError>;

/// Pipeline phase a timeout budget belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPhase {
    Save,
    Compression,
    /// Bounded wait for the compressor to exit after its input was closed
    CompressorExit,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutPhase::Save => write!(f, "save"),
            TimeoutPhase::Compression => write!(f, "compression"),
            TimeoutPhase::CompressorExit => write!(f, "compressor exit grace"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiverError {
    #[error("an acquisition for {0} is already running")]
    AlreadyRunning(String),

    #[error("{phase} timeout exceeded ({}s budget)", budget.as_secs_f64())]
    Timeout { phase: TimeoutPhase, budget: Duration },

    #[error("compressor failed: {message}")]
    ProcessFailure { message: String, diagnostics: String },

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("access denied: {} is outside the archive root", .0.display())]
    AccessDenied(PathBuf),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Closed stage-result tag recorded on a failed task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    ProcessFailure,
    Runtime,
    Io,
}

impl ArchiverError {
    pub fn timeout(phase: TimeoutPhase, budget: Duration) -> Self {
        ArchiverError::Timeout { phase, budget }
    }

    pub fn process_failure(message: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        ArchiverError::ProcessFailure {
            message: message.into(),
            diagnostics: diagnostics.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ArchiverError::Timeout { .. } => FailureKind::Timeout,
            ArchiverError::ProcessFailure { .. } | ArchiverError::Worker(_) => {
                FailureKind::ProcessFailure
            }
            ArchiverError::Runtime(_) | ArchiverError::NotFound(_) => FailureKind::Runtime,
            _ => FailureKind::Io,
        }
    }

    /// Captured child-process output, if any
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            ArchiverError::ProcessFailure { diagnostics, .. } if !diagnostics.trim().is_empty() => {
                Some(diagnostics.as_str())
            }
            _ => None,
        }
    }
}

impl From<bollard::errors::Error> for ArchiverError {
    fn from(err: bollard::errors::Error) -> Self {
        ArchiverError::Runtime(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ArchiverError {
    fn from(err: tokio::task::JoinError) -> Self {
        ArchiverError::Worker(err.to_string())
    }
}
