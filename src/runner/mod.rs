//! Orchestration of the two run modes over source, parser, engine and store.
//!
//! Events are applied strictly sequentially per contract: later events'
//! cost-basis math depends on the exact state left by earlier ones, so
//! nothing here fans out.

use crate::domain::{sort_events, TradeEvent};
use crate::engine;
use crate::parser::{event_uid, EventParser, ParseError};
use crate::source::{EventSource, RawEvent, SourceError};
use crate::store::{Store, StoreError};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Capacity of the tail mode's recently-seen uid set.
const SEEN_CAPACITY: usize = 4096;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What `once` mode reports when it finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    /// Trade events processed (applied + duplicates).
    pub events: usize,
    /// Events whose effects were written for the first time.
    pub applied: usize,
    /// Redeliveries absorbed by the unique-key write path.
    pub duplicates: usize,
    /// Malformed events skipped with a warning.
    pub skipped: usize,
    /// Pages fetched.
    pub pages: usize,
}

enum Applied {
    New,
    Duplicate,
}

pub struct Runner {
    source: Arc<dyn EventSource>,
    store: Arc<dyn Store>,
    parser: EventParser,
}

impl Runner {
    pub fn new(source: Arc<dyn EventSource>, store: Arc<dyn Store>, parser: EventParser) -> Self {
        Self {
            source,
            store,
            parser,
        }
    }

    /// Bounded backfill: walk the cursor chain until the feed runs dry,
    /// fully applying each page before fetching the next.
    ///
    /// # Errors
    /// A store failure aborts the run without advancing past the failed
    /// page; re-running resumes safely because applied events dedup on
    /// their uid.
    pub async fn backfill(&self) -> Result<BackfillSummary, RunnerError> {
        let mut summary = BackfillSummary::default();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.source.fetch_page(cursor.as_deref()).await?;
            summary.pages += 1;

            if page.events.is_empty() {
                break;
            }

            let mut events = self.parse_page(page.events, &mut summary.skipped);
            sort_events(&mut events);

            for ev in &events {
                match self.apply_event(ev).await? {
                    Applied::New => summary.applied += 1,
                    Applied::Duplicate => summary.duplicates += 1,
                }
                summary.events += 1;
            }

            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }

        info!(
            events = summary.events,
            applied = summary.applied,
            duplicates = summary.duplicates,
            skipped = summary.skipped,
            pages = summary.pages,
            "backfill complete"
        );
        Ok(summary)
    }

    /// Unbounded tail: poll the head of the feed until interrupted.
    ///
    /// The feed has no durable cursor in this mode, so a bounded set of
    /// recently seen uids avoids re-applying the same head page every
    /// cycle; durability still comes from the store's unique-key writes.
    /// Per-cycle failures are logged and retried on the next tick, except
    /// a missing contract, which is fatal.
    pub async fn tail(&self, interval: Duration) -> Result<(), RunnerError> {
        let mut seen = RecentSet::new(SEEN_CAPACITY);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval_secs = interval.as_secs(), "tail started");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received; stopping tail");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            match self.poll_head(&mut seen).await {
                Ok(0) => {}
                Ok(applied) => info!(new_events = applied, "tail cycle applied events"),
                Err(RunnerError::Source(SourceError::ContractNotFound)) => {
                    return Err(RunnerError::Source(SourceError::ContractNotFound));
                }
                Err(e) => warn!(error = %e, "tail cycle failed; retrying next poll"),
            }
        }
    }

    /// One tail cycle. Returns how many events were newly applied.
    async fn poll_head(&self, seen: &mut RecentSet) -> Result<usize, RunnerError> {
        let page = self.source.fetch_page(None).await?;

        let mut events = Vec::with_capacity(page.events.len());
        for raw in page.events {
            let uid = event_uid(&raw);
            if seen.contains(&uid) {
                continue;
            }
            match self.parser.parse(&raw) {
                Ok(ev) => events.push(ev),
                Err(ParseError::UnknownEvent(name)) => {
                    debug!(event = %name, "ignoring non-trade event");
                    seen.insert(uid);
                }
                Err(e) => {
                    warn!(uid = %uid, error = %e, "skipping malformed event");
                    seen.insert(uid);
                }
            }
        }
        sort_events(&mut events);

        let mut applied = 0;
        for ev in &events {
            // A store failure aborts the cycle so ordering holds; the
            // already-applied prefix dedups on the next poll.
            match self.apply_event(ev).await? {
                Applied::New => applied += 1,
                Applied::Duplicate => {}
            }
            seen.insert(ev.uid.clone());
        }
        Ok(applied)
    }

    fn parse_page(&self, raws: Vec<RawEvent>, skipped: &mut usize) -> Vec<TradeEvent> {
        let mut events = Vec::with_capacity(raws.len());
        for raw in raws {
            match self.parser.parse(&raw) {
                Ok(ev) => events.push(ev),
                Err(ParseError::UnknownEvent(name)) => {
                    debug!(event = %name, "ignoring non-trade event");
                }
                Err(e) => {
                    warn!(tx = %raw.transaction_id, error = %e, "skipping malformed event");
                    *skipped += 1;
                }
            }
        }
        events
    }

    /// Apply one event: history first, then the position.
    ///
    /// The history insert's unique key is the idempotency guard; when it
    /// reports a duplicate, the position write is skipped entirely, so a
    /// redelivered event can never realize PnL twice.
    async fn apply_event(&self, ev: &TradeEvent) -> Result<Applied, StoreError> {
        let current = self.store.get_position(&ev.token_key).await?;
        let transition = engine::apply(current.as_ref(), ev);

        if !self.store.insert_history(&transition.history).await? {
            debug!(uid = %ev.uid, "duplicate delivery; already materialized");
            return Ok(Applied::Duplicate);
        }

        if let Some(divergence) = &transition.divergence {
            warn!(
                uid = %ev.uid,
                token = %ev.token_key,
                reported = %divergence.reported,
                computed = %divergence.computed,
                "reported PnL disagrees with computed PnL; recording the reported value"
            );
        }

        match &transition.position {
            Some(position) => self.store.upsert_position(position).await?,
            None => {
                if current.is_some() {
                    self.store.delete_position(&ev.token_key).await?;
                }
            }
        }

        debug!(
            uid = %ev.uid,
            token = %ev.token_key,
            action = %transition.history.action,
            amount = %transition.history.amount,
            "event applied"
        );
        Ok(Applied::New)
    }
}

/// Bounded FIFO set of recently seen event uids.
struct RecentSet {
    capacity: usize,
    order: VecDeque<String>,
    set: HashSet<String>,
}

impl RecentSet {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            set: HashSet::with_capacity(capacity),
        }
    }

    fn contains(&self, uid: &str) -> bool {
        self.set.contains(uid)
    }

    fn insert(&mut self, uid: String) {
        if !self.set.insert(uid.clone()) {
            return;
        }
        self.order.push_back(uid);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
    }
}
