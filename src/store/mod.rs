//! Persistence gateway: a row store for open positions and trade history.
//!
//! The ledger's exactly-once guarantee lives in this seam:
//! [`Store::insert_history`] is insert-or-ignore on the event uid, and a
//! position write only happens after a history row was actually inserted.

use crate::domain::{HistoryRecord, OpenPosition};
use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{init_db, SqliteStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Row store for the two ledger collections.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch the live position for a token, if one exists.
    async fn get_position(&self, token_key: &str) -> Result<Option<OpenPosition>, StoreError>;

    /// Insert or replace the position row for its token_key.
    async fn upsert_position(&self, position: &OpenPosition) -> Result<(), StoreError>;

    /// Remove the position row for a token. Removing a missing row is fine.
    async fn delete_position(&self, token_key: &str) -> Result<(), StoreError>;

    /// Append a history record unless its event_uid is already present.
    ///
    /// Returns whether a row was actually written; `false` means the event
    /// was delivered before and its effects must not be applied again.
    async fn insert_history(&self, record: &HistoryRecord) -> Result<bool, StoreError>;
}
