//! Per-image progress record polled by callers

use crate::error::{ArchiverError, FailureKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Log length that triggers truncation
pub const LOG_CAPACITY: usize = 200;
/// Entries kept after truncation
pub const LOG_RETAIN: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Starting,
    Downloading,
    Saving,
    Compressing,
    Complete,
    Error,
    NotFound,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Complete | Status::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Starting => "starting",
            Status::Downloading => "downloading",
            Status::Saving => "saving",
            Status::Compressing => "compressing",
            Status::Complete => "complete",
            Status::Error => "error",
            Status::NotFound => "not_found",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Download state of one layer, only present during the download phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerProgress {
    pub status: String,
    pub percent: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    pub status: Status,
    pub progress: u8,
    pub detail: String,
    pub log: Vec<LogEntry>,
    pub layers: BTreeMap<String, LayerProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<PathBuf>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// Fresh record for a newly admitted task
    pub fn starting(image: &str, task_id: Uuid) -> Self {
        Self {
            image: image.to_string(),
            task_id: Some(task_id),
            status: Status::Starting,
            progress: 0,
            detail: "Preparing".to_string(),
            log: Vec::new(),
            layers: BTreeMap::new(),
            failure: None,
            archive: None,
            updated_at: Utc::now(),
        }
    }

    /// Placeholder returned for identifiers that were never admitted
    pub fn not_found(image: &str) -> Self {
        Self {
            image: image.to_string(),
            task_id: None,
            status: Status::NotFound,
            progress: 0,
            detail: "No acquisition known for this image".to_string(),
            log: Vec::new(),
            layers: BTreeMap::new(),
            failure: None,
            archive: None,
            updated_at: Utc::now(),
        }
    }

    pub fn push_log(&mut self, message: impl Into<String>) {
        self.log.push(LogEntry {
            timestamp: Utc::now(),
            message: message.into(),
        });
        if self.log.len() > LOG_CAPACITY {
            let excess = self.log.len() - LOG_RETAIN;
            self.log.drain(..excess);
        }
        self.touch();
    }

    /// Raise progress, never lowering it and never moving a terminal record
    pub fn advance(&mut self, progress: u8) {
        if self.status.is_terminal() {
            return;
        }
        self.progress = self.progress.max(progress.min(100));
        self.touch();
    }

    pub fn enter(&mut self, status: Status, detail: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.detail = detail.into();
        self.touch();
    }

    /// Update the step description without changing status
    pub fn describe(&mut self, detail: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.detail = detail.into();
        self.touch();
    }

    pub fn complete(&mut self, archive: PathBuf, detail: impl Into<String>) {
        self.progress = 100;
        self.status = Status::Complete;
        self.detail = detail.into();
        self.archive = Some(archive);
        self.failure = None;
        self.touch();
    }

    pub fn fail(&mut self, err: &ArchiverError) {
        self.status = Status::Error;
        self.detail = err.to_string();
        self.failure = Some(err.kind());
        self.push_log(format!("Error: {}", err));
        if let Some(diagnostics) = err.diagnostics() {
            for line in diagnostics.lines().filter(|l| !l.trim().is_empty()) {
                self.push_log(format!("compressor: {}", line.trim_end()));
            }
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
