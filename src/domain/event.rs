//! Typed trade events and their deterministic ordering.

use crate::domain::Decimal;

/// Position of an event in the chain's history.
///
/// Events must be applied in non-decreasing `EventId` order: later events'
/// cost-basis math depends on the exact state left by earlier ones. Pages
/// from the feed are not sorted; callers sort before applying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId {
    pub block_number: i64,
    pub event_index: i64,
}

impl EventId {
    pub fn new(block_number: i64, event_index: i64) -> Self {
        EventId {
            block_number,
            event_index,
        }
    }
}

/// A decoded trade event, ready for the ledger engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeEvent {
    /// Deterministic idempotency key; the same upstream event always
    /// carries the same uid across refetches.
    pub uid: String,
    pub tx_id: String,
    pub id: EventId,
    /// Trade id assigned by the contract.
    pub trade_id: i64,
    pub trader: String,
    /// Canonical key of the traded token.
    pub token_key: String,
    /// Precision of the token's amounts, resolved at parse time.
    pub token_decimals: u32,
    pub kind: TradeKind,
}

/// What the event does to the position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeKind {
    /// A buy: opens a position or merges into the live one.
    Open {
        price: Decimal,
        amount: Decimal,
        strategy: Option<String>,
    },
    /// A sell. `amount` is present for a partial close; a full close
    /// carries no amount and drains whatever is open. `reported_pnl` is
    /// the contract's own realized-PnL figure when it emits one.
    Close {
        price: Decimal,
        amount: Option<Decimal>,
        reported_pnl: Option<Decimal>,
    },
}

/// Sort events into application order: (block_number, event_index).
pub fn sort_events(events: &mut [TradeEvent]) {
    events.sort_by_key(|ev| ev.id);
}
