//! Scripted event source for tests.

use super::{EventPage, EventSource, RawEvent, SourceError};
use async_trait::async_trait;
use std::sync::Mutex;

/// Mock event source serving a fixed sequence of pages.
///
/// Page 0 is served for an empty cursor; page `n` for cursor `"page-n"`.
/// Every page except the last advertises the next one, mirroring the real
/// endpoint's fingerprint chain. A failure can be queued to be returned on
/// the next call instead.
#[derive(Debug, Default)]
pub struct MockEventSource {
    pages: Vec<Vec<RawEvent>>,
    fail_next: Mutex<Option<SourceError>>,
}

impl MockEventSource {
    /// Create a mock source with no pages (an empty feed).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a page of events.
    pub fn with_page(mut self, events: Vec<RawEvent>) -> Self {
        self.pages.push(events);
        self
    }

    /// Make the next `fetch_page` call fail with `err`, once.
    pub fn fail_next(&self, err: SourceError) {
        *self.fail_next.lock().expect("mock lock poisoned") = Some(err);
    }
}

#[async_trait]
impl EventSource for MockEventSource {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<EventPage, SourceError> {
        if let Some(err) = self.fail_next.lock().expect("mock lock poisoned").take() {
            return Err(err);
        }

        let index = match cursor {
            None => 0,
            Some(c) => c
                .strip_prefix("page-")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| SourceError::Parse(format!("unknown cursor {:?}", c)))?,
        };

        let events = self.pages.get(index).cloned().unwrap_or_default();
        let next_cursor =
            (index + 1 < self.pages.len()).then(|| format!("page-{}", index + 1));

        Ok(EventPage {
            events,
            next_cursor,
        })
    }
}
