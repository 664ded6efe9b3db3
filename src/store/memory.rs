//! In-memory store for tests.

use super::{Store, StoreError};
use crate::domain::{HistoryRecord, OpenPosition};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Hash-map backed [`Store`] with the same idempotency semantics as the
/// SQLite implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    positions: HashMap<String, OpenPosition>,
    history: Vec<HistoryRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all history rows, in insertion order.
    pub fn history(&self) -> Vec<HistoryRecord> {
        self.inner.lock().expect("store lock poisoned").history.clone()
    }

    /// Snapshot of all live positions.
    pub fn positions(&self) -> Vec<OpenPosition> {
        let mut positions: Vec<OpenPosition> = self
            .inner
            .lock()
            .expect("store lock poisoned")
            .positions
            .values()
            .cloned()
            .collect();
        positions.sort_by(|a, b| a.token_key.cmp(&b.token_key));
        positions
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_position(&self, token_key: &str) -> Result<Option<OpenPosition>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.positions.get(token_key).cloned())
    }

    async fn upsert_position(&self, position: &OpenPosition) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner
            .positions
            .insert(position.token_key.clone(), position.clone());
        Ok(())
    }

    async fn delete_position(&self, token_key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.positions.remove(token_key);
        Ok(())
    }

    async fn insert_history(&self, record: &HistoryRecord) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        if inner
            .history
            .iter()
            .any(|r| r.event_uid == record.event_uid)
        {
            return Ok(false);
        }
        inner.history.push(record.clone());
        Ok(true)
    }
}
