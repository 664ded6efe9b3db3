//! Pure computation engine for deterministic ledger logic.

pub mod ledger;

pub use ledger::{apply, PnlDivergence, Transition};
