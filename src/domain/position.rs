//! Ledger rows: the live position per token and the append-only history.

use crate::domain::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(Action::Buy),
            "SELL" => Ok(Action::Sell),
            other => Err(format!("unknown action: {}", other)),
        }
    }
}

/// The currently held, unclosed quantity of a token.
///
/// At most one row exists per token_key, and only while amount > 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub token_key: String,
    /// Trade id of the event that originally opened this position. Later
    /// merges never overwrite it.
    pub trade_id_onchain: i64,
    /// Volume-weighted average entry price of the unclosed buys.
    pub avg_entry_price: Decimal,
    pub amount: Decimal,
    pub strategy: Option<String>,
    pub trader: String,
    /// Transaction that last touched this row.
    pub last_tx_id: String,
}

/// One immutable history entry per successfully processed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Globally unique idempotency key; the insert-or-ignore on this column
    /// is what makes redelivery a no-op.
    pub event_uid: String,
    pub trade_id_onchain: i64,
    pub token_key: String,
    pub action: Action,
    pub price: Decimal,
    pub amount: Decimal,
    pub avg_entry_price: Option<Decimal>,
    pub avg_exit_price: Option<Decimal>,
    pub pnl: Option<Decimal>,
    pub strategy: Option<String>,
    pub tx_id: String,
    pub block_number: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_string_roundtrip() {
        assert_eq!(Action::Buy.as_str(), "BUY");
        assert_eq!(Action::Sell.as_str(), "SELL");
        assert_eq!("BUY".parse::<Action>().unwrap(), Action::Buy);
        assert_eq!("SELL".parse::<Action>().unwrap(), Action::Sell);
        assert!("HOLD".parse::<Action>().is_err());
    }

    #[test]
    fn test_action_serde_uppercase() {
        let json = serde_json::to_string(&Action::Buy).unwrap();
        assert_eq!(json, "\"BUY\"");
        let back: Action = serde_json::from_str("\"SELL\"").unwrap();
        assert_eq!(back, Action::Sell);
    }
}
