//! Admission control: at most one non-terminal task per image identifier

use crate::error::{ArchiverError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Complete,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Running)
    }
}

#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub task_id: Uuid,
    pub state: TaskState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<String, TaskInfo>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new task, running `on_admit` while the slot is still locked.
    ///
    /// Terminal entries (complete or failed) are overwritten; a running entry
    /// rejects the request with [`ArchiverError::AlreadyRunning`].
    pub fn admit<F>(&self, image: &str, on_admit: F) -> Result<Uuid>
    where
        F: FnOnce(Uuid),
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = tasks.get(image) {
            if !existing.state.is_terminal() {
                debug!(image, task_id = %existing.task_id, "rejecting duplicate acquisition");
                return Err(ArchiverError::AlreadyRunning(image.to_string()));
            }
        }

        let task_id = Uuid::new_v4();
        tasks.insert(
            image.to_string(),
            TaskInfo {
                task_id,
                state: TaskState::Running,
                started_at: Utc::now(),
                finished_at: None,
            },
        );
        on_admit(task_id);
        Ok(task_id)
    }

    /// Move a task to a terminal state; ignored if the slot belongs to another task
    pub fn finish(&self, image: &str, task_id: Uuid, state: TaskState) -> bool {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        match tasks.get_mut(image) {
            Some(info) if info.task_id == task_id => {
                info.state = state;
                info.finished_at = Some(Utc::now());
                true
            }
            _ => {
                warn!(image, %task_id, "finish for unknown task ignored");
                false
            }
        }
    }

    pub fn get(&self, image: &str) -> Option<TaskInfo> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.get(image).cloned()
    }

    pub fn running(&self) -> Vec<String> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let mut running: Vec<String> = tasks
            .iter()
            .filter(|(_, info)| !info.state.is_terminal())
            .map(|(image, _)| image.clone())
            .collect();
        running.sort();
        running
    }
}
