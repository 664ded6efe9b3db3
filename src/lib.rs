pub mod config;
pub mod domain;
pub mod engine;
pub mod parser;
pub mod runner;
pub mod source;
pub mod store;

pub use config::Config;
pub use domain::{
    Action, AddressError, Decimal, EventId, HistoryRecord, KeyFormat, OpenPosition, TradeEvent,
    TradeKind, TronAddress,
};
pub use engine::{apply, PnlDivergence, Transition};
pub use parser::{EventParser, ParseError};
pub use runner::{BackfillSummary, Runner, RunnerError};
pub use source::{EventPage, EventSource, MockEventSource, RawEvent, SourceError, TronGridSource};
pub use store::{init_db, MemoryStore, SqliteStore, Store, StoreError};
