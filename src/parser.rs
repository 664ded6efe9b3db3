//! Decodes raw event envelopes into typed [`TradeEvent`]s.
//!
//! Prices and amounts arrive as chain-native fixed-point integers; this is
//! the only place they are scaled into decimals. The parser also derives
//! the deterministic event uid used as the idempotency key downstream.

use crate::config::Config;
use crate::domain::{AddressError, Decimal, EventId, KeyFormat, TradeEvent, TradeKind, TronAddress};
use crate::source::RawEvent;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Not a trade event; callers skip these quietly.
    #[error("not a trade event: {0}")]
    UnknownEvent(String),
    #[error("event result is not an object")]
    BadResult,
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("field {0} is not an integer")]
    BadInt(&'static str),
    #[error("field {0} is not a string")]
    BadString(&'static str),
    #[error("unknown action: {0}")]
    BadAction(String),
    #[error("bad token address: {0}")]
    BadAddress(#[from] AddressError),
}

/// Maps raw envelopes to domain events using the configured scaling rules.
#[derive(Debug, Clone)]
pub struct EventParser {
    price_scale: u64,
    token_decimals_default: u32,
    /// Per-token overrides keyed by canonical hex.
    token_decimals: HashMap<String, u32>,
    key_format: KeyFormat,
}

impl EventParser {
    pub fn new(config: &Config) -> Self {
        Self {
            price_scale: config.price_scale,
            token_decimals_default: config.token_decimals_default,
            token_decimals: config.token_decimals.clone(),
            key_format: config.key_format,
        }
    }

    /// Decode one envelope.
    ///
    /// # Errors
    /// Returns [`ParseError::UnknownEvent`] for event names the ledger does
    /// not consume, and a field-level error for malformed trade payloads.
    pub fn parse(&self, raw: &RawEvent) -> Result<TradeEvent, ParseError> {
        match raw.event_name.as_str() {
            "TradeOpen" => self.parse_trade_open(raw),
            "TradeClosed" => self.parse_trade_closed(raw),
            other => Err(ParseError::UnknownEvent(other.to_string())),
        }
    }

    fn parse_trade_open(&self, raw: &RawEvent) -> Result<TradeEvent, ParseError> {
        let result = result_object(raw)?;
        let (token, trade_id, trader) = self.common_fields(result)?;
        let decimals = self.token_decimals(&token);

        let price = self.price(field_i128(result, "entryPrice")?);
        let amount = Decimal::from_scaled(field_i128(result, "amount")?, decimals);
        let strategy = opt_string(result, "strategy");

        let action = opt_string(result, "action").unwrap_or_else(|| "BUY".to_string());
        let kind = match action.to_ascii_uppercase().as_str() {
            "BUY" => TradeKind::Open {
                price,
                amount,
                strategy,
            },
            // The contract emits partial sells as TradeOpen with a SELL
            // action; they close against the live position like any sell.
            "SELL" => TradeKind::Close {
                price,
                amount: Some(amount),
                reported_pnl: None,
            },
            other => return Err(ParseError::BadAction(other.to_string())),
        };

        Ok(self.assemble(raw, token, trade_id, trader, decimals, kind))
    }

    fn parse_trade_closed(&self, raw: &RawEvent) -> Result<TradeEvent, ParseError> {
        let result = result_object(raw)?;
        let (token, trade_id, trader) = self.common_fields(result)?;
        let decimals = self.token_decimals(&token);

        let price = self.price(field_i128(result, "exitPrice")?);
        let reported_pnl = opt_i128(result, "pnl").map(|raw_pnl| self.price(raw_pnl));

        let kind = TradeKind::Close {
            price,
            amount: None,
            reported_pnl,
        };

        Ok(self.assemble(raw, token, trade_id, trader, decimals, kind))
    }

    fn common_fields(
        &self,
        result: &Map<String, Value>,
    ) -> Result<(TronAddress, i64, String), ParseError> {
        let token = TronAddress::parse(field_str(result, "tokenAddress")?)?;
        let trade_id = field_i128(result, "tradeId")? as i64;
        let trader = field_str(result, "trader")?.to_string();
        Ok((token, trade_id, trader))
    }

    fn assemble(
        &self,
        raw: &RawEvent,
        token: TronAddress,
        trade_id: i64,
        trader: String,
        token_decimals: u32,
        kind: TradeKind,
    ) -> TradeEvent {
        TradeEvent {
            uid: event_uid(raw),
            tx_id: raw.transaction_id.clone(),
            id: EventId::new(raw.block_number, raw.event_index),
            trade_id,
            trader,
            token_key: token.key(self.key_format),
            token_decimals,
            kind,
        }
    }

    fn price(&self, raw: i128) -> Decimal {
        Decimal::from_divisor(raw, self.price_scale)
    }

    fn token_decimals(&self, token: &TronAddress) -> u32 {
        self.token_decimals
            .get(&token.to_hex())
            .copied()
            .unwrap_or(self.token_decimals_default)
    }
}

/// Deterministic idempotency key for an upstream event.
///
/// Hashes the envelope's stable fields; re-fetching the same event always
/// yields the same uid. The result payload is re-serialized through
/// serde_json, whose map keys are ordered, so field order on the wire does
/// not matter.
pub fn event_uid(raw: &RawEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.transaction_id.as_bytes());
    hasher.update(raw.block_number.to_le_bytes());
    hasher.update(raw.event_index.to_le_bytes());
    hasher.update(raw.event_name.as_bytes());
    hasher.update(raw.result.to_string().as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..16])
}

fn result_object(raw: &RawEvent) -> Result<&Map<String, Value>, ParseError> {
    raw.result.as_object().ok_or(ParseError::BadResult)
}

fn field_str<'a>(
    result: &'a Map<String, Value>,
    key: &'static str,
) -> Result<&'a str, ParseError> {
    result
        .get(key)
        .ok_or(ParseError::MissingField(key))?
        .as_str()
        .ok_or(ParseError::BadString(key))
}

/// Chain integers show up both as JSON numbers and as decimal strings.
fn field_i128(result: &Map<String, Value>, key: &'static str) -> Result<i128, ParseError> {
    let value = result.get(key).ok_or(ParseError::MissingField(key))?;
    int_value(value).ok_or(ParseError::BadInt(key))
}

fn opt_i128(result: &Map<String, Value>, key: &str) -> Option<i128> {
    result.get(key).and_then(int_value)
}

fn opt_string(result: &Map<String, Value>, key: &str) -> Option<String> {
    result
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn int_value(value: &Value) -> Option<i128> {
    match value {
        Value::Number(n) => n.as_i64().map(i128::from),
        Value::String(s) => s.trim().parse::<i128>().ok(),
        _ => None,
    }
}
