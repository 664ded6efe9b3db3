//! Core domain types for the trade ledger.

pub mod address;
pub mod decimal;
pub mod event;
pub mod position;

pub use address::{AddressError, KeyFormat, TronAddress};
pub use decimal::Decimal;
pub use event::{sort_events, EventId, TradeEvent, TradeKind};
pub use position::{Action, HistoryRecord, OpenPosition};
