//! Bounded pipeline run history.
//!
//! Items are kept newest-first and persisted as one JSON array. Once the
//! store holds `capacity` items, recording a new one drops the oldest.

use std::sync::Arc;

use af_protocol::history_models::HistoryItem;
use af_protocol::pipeline_models::PipelineRun;
use uuid::Uuid;

use crate::storage::{read_json, write_json, KeyValueStore, StorageResult, PIPELINE_HISTORY_KEY};

pub struct HistoryStore {
    store: Arc<dyn KeyValueStore>,
    capacity: usize,
    items: Vec<HistoryItem>,
}

impl HistoryStore {
    /// Load the persisted history, trimming it to `capacity`.
    pub fn open(store: Arc<dyn KeyValueStore>, capacity: usize) -> StorageResult<Self> {
        let mut items: Vec<HistoryItem> =
            read_json(store.as_ref(), PIPELINE_HISTORY_KEY)?.unwrap_or_default();
        items.truncate(capacity);

        Ok(Self {
            store,
            capacity,
            items,
        })
    }

    /// Snapshot `run` at the head of the history and persist it.
    ///
    /// The in-memory history is updated even when the write fails, so the
    /// snapshot is still visible for the rest of the session.
    pub fn record(&mut self, run: &PipelineRun) -> (HistoryItem, StorageResult<()>) {
        let item = HistoryItem::snapshot(run);
        self.items.insert(0, item.clone());
        self.items.truncate(self.capacity);
        (item, self.persist())
    }

    /// All items, newest first.
    pub fn items(&self) -> &[HistoryItem] {
        &self.items
    }

    pub fn get(&self, id: Uuid) -> Option<&HistoryItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) -> StorageResult<()> {
        self.items.clear();
        self.store.remove(PIPELINE_HISTORY_KEY)
    }

    fn persist(&self) -> StorageResult<()> {
        write_json(self.store.as_ref(), PIPELINE_HISTORY_KEY, &self.items)
    }
}
