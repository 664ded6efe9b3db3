//! Event source abstraction: paginated, cursor-based fetch of confirmed
//! contract events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod mock;
pub mod trongrid;

pub use mock::MockEventSource;
pub use trongrid::TronGridSource;

/// Raw event envelope as returned by the events endpoint.
///
/// `result` is kept as untyped JSON: the parser owns the field-level
/// decoding, and the uid hash covers the payload verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub transaction_id: String,
    pub block_number: i64,
    #[serde(default)]
    pub event_index: i64,
    pub event_name: String,
    #[serde(default)]
    pub block_timestamp: i64,
    #[serde(default)]
    pub result: serde_json::Value,
}

/// One page of events plus the cursor for the next one.
///
/// Events within a page carry no ordering guarantee; callers sort by
/// (block_number, event_index). A missing `next_cursor` means the end of
/// currently-available history.
#[derive(Debug, Clone, Default)]
pub struct EventPage {
    pub events: Vec<RawEvent>,
    pub next_cursor: Option<String>,
}

/// Source of confirmed contract events.
///
/// The contract address is fixed at construction. Implementations own
/// their timeout and retry policy for transient failures; a missing
/// contract must surface as [`SourceError::ContractNotFound`] without
/// retrying.
#[async_trait]
pub trait EventSource: Send + Sync + fmt::Debug {
    /// Fetch one page of events, starting from `cursor` if given.
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<EventPage, SourceError>;
}

/// Error type for event source operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Network error (connection refused, DNS failure, ...).
    #[error("network error: {0}")]
    Network(String),
    /// The bounded request timeout expired.
    #[error("request timed out")]
    Timeout,
    /// Non-retryable HTTP status.
    #[error("http error {status}")]
    Http { status: u16 },
    /// Rate limit exceeded.
    #[error("rate limited")]
    RateLimited,
    /// The events endpoint does not know the contract. This is a
    /// configuration error, not a transient failure.
    #[error("contract not found at the events endpoint; check base url, network and address")]
    ContractNotFound,
    /// Malformed response body.
    #[error("malformed response: {0}")]
    Parse(String),
}

impl SourceError {
    /// Whether a caller-side retry can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Network(_) | SourceError::Timeout | SourceError::RateLimited => true,
            SourceError::Http { status } => *status >= 500,
            SourceError::ContractNotFound | SourceError::Parse(_) => false,
        }
    }
}
