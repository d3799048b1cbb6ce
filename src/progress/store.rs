//! Concurrency-safe map from image identifier to its progress record
//!
//! The outer map lock is only held to look up or replace an entry; each record
//! sits behind its own lock, so updates for one image never wait on another.

use super::record::ProgressRecord;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use uuid::Uuid;

type Entry = Arc<Mutex<ProgressRecord>>;

#[derive(Debug, Clone, Default)]
pub struct ProgressStore {
    records: Arc<RwLock<HashMap<String, Entry>>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current record
    pub fn get(&self, image: &str) -> Option<ProgressRecord> {
        let entry = self.entry(image)?;
        let record = entry.lock().unwrap_or_else(PoisonError::into_inner);
        Some(record.clone())
    }

    /// Replace any previous record with a fresh `Starting` one
    pub fn reset(&self, image: &str, task_id: Uuid) {
        let fresh = Arc::new(Mutex::new(ProgressRecord::starting(image, task_id)));
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.insert(image.to_string(), fresh);
    }

    /// Apply a mutation; returns false when no record exists
    pub fn set<F>(&self, image: &str, mutation: F) -> bool
    where
        F: FnOnce(&mut ProgressRecord),
    {
        match self.entry(image) {
            Some(entry) => {
                let mut record = entry.lock().unwrap_or_else(PoisonError::into_inner);
                mutation(&mut record);
                true
            }
            None => false,
        }
    }

    /// Like [`set`](Self::set), but only while the record still belongs to `task_id`
    pub fn update_task<F>(&self, image: &str, task_id: Uuid, mutation: F) -> bool
    where
        F: FnOnce(&mut ProgressRecord),
    {
        self.set(image, |record| {
            if record.task_id == Some(task_id) {
                mutation(record);
            }
        })
    }

    pub fn append_log(&self, image: &str, message: impl Into<String>) -> bool {
        let message = message.into();
        self.set(image, |record| record.push_log(message))
    }

    pub fn images(&self) -> Vec<String> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut images: Vec<String> = records.keys().cloned().collect();
        images.sort();
        images
    }

    fn entry(&self, image: &str) -> Option<Entry> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.get(image).cloned()
    }
}
