//! The ledger state-transition function.
//!
//! [`apply`] takes the current open position for a token (if any) and one
//! trade event, and produces the next position plus the history record for
//! that event. It is pure: no I/O, no clock, no dedup state. Exactly-once
//! semantics come from the store's unique-key write path, not from here.
//!
//! Callers must feed events in (block_number, event_index) order; the
//! cost-basis math depends on the exact prior state.

use crate::domain::{Action, Decimal, HistoryRecord, OpenPosition, TradeEvent, TradeKind};

/// Outcome of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// The position after the event; `None` deletes the row.
    pub position: Option<OpenPosition>,
    /// The history entry recording the event.
    pub history: HistoryRecord,
    /// Set when the event carried its own PnL figure and it disagrees with
    /// the locally computed one. The reported value wins; callers surface
    /// the disagreement instead of trusting either side silently.
    pub divergence: Option<PnlDivergence>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PnlDivergence {
    pub reported: Decimal,
    pub computed: Decimal,
}

/// Apply one event to the current position state.
pub fn apply(current: Option<&OpenPosition>, ev: &TradeEvent) -> Transition {
    match &ev.kind {
        TradeKind::Open {
            price,
            amount,
            strategy,
        } => apply_buy(current, ev, *price, *amount, strategy.clone()),
        TradeKind::Close {
            price,
            amount,
            reported_pnl,
        } => apply_sell(current, ev, *price, *amount, *reported_pnl),
    }
}

fn apply_buy(
    current: Option<&OpenPosition>,
    ev: &TradeEvent,
    price: Decimal,
    amount: Decimal,
    strategy: Option<String>,
) -> Transition {
    let live = current.filter(|p| p.amount.is_positive());

    let (position, entry_price) = match live {
        Some(open) => {
            let (new_avg, new_amount) = merge_buy(open.avg_entry_price, open.amount, price, amount);
            let merged = OpenPosition {
                token_key: ev.token_key.clone(),
                // The opening event's id survives every merge.
                trade_id_onchain: open.trade_id_onchain,
                avg_entry_price: new_avg,
                amount: new_amount,
                strategy: strategy.clone().or_else(|| open.strategy.clone()),
                trader: ev.trader.clone(),
                last_tx_id: ev.tx_id.clone(),
            };
            (Some(merged), new_avg)
        }
        None => {
            let opened = amount.is_positive().then(|| OpenPosition {
                token_key: ev.token_key.clone(),
                trade_id_onchain: ev.trade_id,
                avg_entry_price: price,
                amount,
                strategy: strategy.clone(),
                trader: ev.trader.clone(),
                last_tx_id: ev.tx_id.clone(),
            });
            (opened, price)
        }
    };

    let history = HistoryRecord {
        event_uid: ev.uid.clone(),
        trade_id_onchain: ev.trade_id,
        token_key: ev.token_key.clone(),
        action: Action::Buy,
        price,
        // Only the incremental buy quantity, never the running total.
        amount,
        avg_entry_price: Some(entry_price),
        avg_exit_price: None,
        pnl: None,
        strategy,
        tx_id: ev.tx_id.clone(),
        block_number: ev.id.block_number,
    };

    Transition {
        position,
        history,
        divergence: None,
    }
}

fn apply_sell(
    current: Option<&OpenPosition>,
    ev: &TradeEvent,
    price: Decimal,
    amount: Option<Decimal>,
    reported_pnl: Option<Decimal>,
) -> Transition {
    let Some(open) = current.filter(|p| p.amount.is_positive()) else {
        // Duplicate or out-of-order close; record it without touching state.
        return Transition {
            position: current.cloned(),
            history: zero_effect_history(ev, price),
            divergence: None,
        };
    };

    let sell_amount = amount.unwrap_or(open.amount).min(open.amount);
    let computed_pnl = (price - open.avg_entry_price) * sell_amount;
    let pnl = reported_pnl.unwrap_or(computed_pnl);
    let divergence = reported_pnl
        .filter(|reported| *reported != computed_pnl)
        .map(|reported| PnlDivergence {
            reported,
            computed: computed_pnl,
        });

    let remaining = (open.amount - sell_amount).quantize(ev.token_decimals);
    let position = remaining.is_positive().then(|| OpenPosition {
        token_key: open.token_key.clone(),
        trade_id_onchain: open.trade_id_onchain,
        avg_entry_price: open.avg_entry_price,
        amount: remaining,
        strategy: open.strategy.clone(),
        trader: ev.trader.clone(),
        last_tx_id: ev.tx_id.clone(),
    });

    let history = HistoryRecord {
        event_uid: ev.uid.clone(),
        trade_id_onchain: ev.trade_id,
        token_key: ev.token_key.clone(),
        action: Action::Sell,
        price,
        amount: sell_amount,
        avg_entry_price: Some(open.avg_entry_price),
        avg_exit_price: Some(price),
        pnl: Some(pnl),
        strategy: open.strategy.clone(),
        tx_id: ev.tx_id.clone(),
        block_number: ev.id.block_number,
    };

    Transition {
        position,
        history,
        divergence,
    }
}

/// Volume-weighted merge of a buy into a live position.
///
/// Falls back to the incoming price if the merged amount is zero.
fn merge_buy(
    avg_entry_price: Decimal,
    amount: Decimal,
    buy_price: Decimal,
    buy_amount: Decimal,
) -> (Decimal, Decimal) {
    let new_amount = amount + buy_amount;
    if !new_amount.is_positive() {
        return (buy_price, new_amount);
    }
    let total_cost = avg_entry_price * amount + buy_price * buy_amount;
    (total_cost / new_amount, new_amount)
}

fn zero_effect_history(ev: &TradeEvent, price: Decimal) -> HistoryRecord {
    HistoryRecord {
        event_uid: ev.uid.clone(),
        trade_id_onchain: ev.trade_id,
        token_key: ev.token_key.clone(),
        action: Action::Sell,
        price,
        amount: Decimal::zero(),
        avg_entry_price: None,
        avg_exit_price: Some(price),
        pnl: None,
        strategy: None,
        tx_id: ev.tx_id.clone(),
        block_number: ev.id.block_number,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventId;

    const TOKEN: &str = "41a614f803b6fd780986a42c78ec9c7f77e6ded13c";
    const TRADER: &str = "TVjsyZ7fYF3qLF6BQgPmTEZy1xrNNyVAAA";

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn event(uid: &str, block_number: i64, kind: TradeKind) -> TradeEvent {
        TradeEvent {
            uid: uid.to_string(),
            tx_id: format!("tx-{}", uid),
            id: EventId::new(block_number, 0),
            trade_id: 42,
            trader: TRADER.to_string(),
            token_key: TOKEN.to_string(),
            token_decimals: 6,
            kind,
        }
    }

    fn buy(uid: &str, block_number: i64, price: &str, amount: &str) -> TradeEvent {
        event(
            uid,
            block_number,
            TradeKind::Open {
                price: d(price),
                amount: d(amount),
                strategy: None,
            },
        )
    }

    fn sell(uid: &str, block_number: i64, price: &str, amount: &str) -> TradeEvent {
        event(
            uid,
            block_number,
            TradeKind::Close {
                price: d(price),
                amount: Some(d(amount)),
                reported_pnl: None,
            },
        )
    }

    fn close(
        uid: &str,
        block_number: i64,
        price: &str,
        reported_pnl: Option<&str>,
    ) -> TradeEvent {
        event(
            uid,
            block_number,
            TradeKind::Close {
                price: d(price),
                amount: None,
                reported_pnl: reported_pnl.map(d),
            },
        )
    }

    #[test]
    fn test_first_buy_opens_position() {
        let t = apply(None, &buy("a", 100, "10", "5"));

        let pos = t.position.expect("position should open");
        assert_eq!(pos.avg_entry_price, d("10"));
        assert_eq!(pos.amount, d("5"));
        assert_eq!(pos.trade_id_onchain, 42);
        assert_eq!(pos.trader, TRADER);

        assert_eq!(t.history.action, Action::Buy);
        assert_eq!(t.history.amount, d("5"));
        assert_eq!(t.history.avg_entry_price, Some(d("10")));
        assert_eq!(t.history.pnl, None);
    }

    #[test]
    fn test_buy_merge_weighted_average() {
        let t1 = apply(None, &buy("a", 100, "10", "5"));
        let t2 = apply(t1.position.as_ref(), &buy("b", 101, "20", "5"));

        let pos = t2.position.expect("position should stay open");
        assert_eq!(pos.avg_entry_price, d("15"));
        assert_eq!(pos.amount, d("10"));

        // History records the incremental quantity and the merged average.
        assert_eq!(t2.history.amount, d("5"));
        assert_eq!(t2.history.avg_entry_price, Some(d("15")));
    }

    #[test]
    fn test_merge_preserves_opening_trade_id_and_strategy() {
        let opening = event(
            "a",
            100,
            TradeKind::Open {
                price: d("10"),
                amount: d("5"),
                strategy: Some("sma-cross".to_string()),
            },
        );
        let t1 = apply(None, &opening);

        let mut later = buy("b", 101, "20", "5");
        later.trade_id = 99;
        let t2 = apply(t1.position.as_ref(), &later);

        let pos = t2.position.unwrap();
        assert_eq!(pos.trade_id_onchain, 42, "merge must not overwrite the opener");
        assert_eq!(pos.strategy.as_deref(), Some("sma-cross"));
        // The history row still points at the merging event's own trade id.
        assert_eq!(t2.history.trade_id_onchain, 99);
    }

    #[test]
    fn test_partial_sell_realizes_pnl_and_keeps_entry() {
        let t1 = apply(None, &buy("a", 100, "10", "5"));
        let t2 = apply(t1.position.as_ref(), &sell("b", 101, "16", "3"));

        let pos = t2.position.expect("2 units should remain");
        assert_eq!(pos.amount, d("2"));
        assert_eq!(pos.avg_entry_price, d("10"));
        assert_eq!(pos.trade_id_onchain, 42);

        assert_eq!(t2.history.action, Action::Sell);
        assert_eq!(t2.history.amount, d("3"));
        assert_eq!(t2.history.pnl, Some(d("18")));
        assert_eq!(t2.history.avg_entry_price, Some(d("10")));
        assert_eq!(t2.history.avg_exit_price, Some(d("16")));
    }

    #[test]
    fn test_sell_clamped_to_open_amount() {
        let t1 = apply(None, &buy("a", 100, "10", "5"));
        let t2 = apply(t1.position.as_ref(), &sell("b", 101, "12", "8"));

        assert_eq!(t2.position, None, "overselling drains the position");
        assert_eq!(t2.history.amount, d("5"));
        assert_eq!(t2.history.pnl, Some(d("10")));
    }

    #[test]
    fn test_full_close_deletes_position() {
        let t1 = apply(None, &buy("a", 100, "10", "5"));
        let t2 = apply(t1.position.as_ref(), &close("b", 101, "16", None));

        assert_eq!(t2.position, None);
        assert_eq!(t2.history.amount, d("5"));
        assert_eq!(t2.history.pnl, Some(d("30")));
        assert_eq!(t2.history.avg_exit_price, Some(d("16")));
    }

    #[test]
    fn test_residual_dust_quantizes_to_deletion() {
        let t1 = apply(None, &buy("a", 100, "10", "1.0000004"));
        let t2 = apply(t1.position.as_ref(), &sell("b", 101, "12", "1"));

        // 0.0000004 rounds to zero at 6 decimals; no crumb position survives.
        assert_eq!(t2.position, None);
    }

    #[test]
    fn test_close_without_position_is_zero_effect() {
        let t = apply(None, &close("a", 100, "16", Some("7")));

        assert_eq!(t.position, None);
        assert_eq!(t.history.action, Action::Sell);
        assert_eq!(t.history.amount, Decimal::zero());
        assert_eq!(t.history.pnl, None);
        assert_eq!(t.history.avg_entry_price, None);
        assert_eq!(t.divergence, None);
    }

    #[test]
    fn test_reported_pnl_wins_and_divergence_is_surfaced() {
        let t1 = apply(None, &buy("a", 100, "10", "5"));
        let t2 = apply(t1.position.as_ref(), &close("b", 101, "16", Some("29")));

        // Locally (16 - 10) * 5 = 30, but the event says 29.
        assert_eq!(t2.history.pnl, Some(d("29")));
        assert_eq!(
            t2.divergence,
            Some(PnlDivergence {
                reported: d("29"),
                computed: d("30"),
            })
        );
    }

    #[test]
    fn test_agreeing_reported_pnl_has_no_divergence() {
        let t1 = apply(None, &buy("a", 100, "10", "5"));
        let t2 = apply(t1.position.as_ref(), &close("b", 101, "16", Some("30")));

        assert_eq!(t2.history.pnl, Some(d("30")));
        assert_eq!(t2.divergence, None);
    }

    #[test]
    fn test_buy_after_full_close_reopens_with_new_trade_id() {
        let t1 = apply(None, &buy("a", 100, "10", "5"));
        let t2 = apply(t1.position.as_ref(), &close("b", 101, "16", None));
        assert_eq!(t2.position, None);

        let mut reopen = buy("c", 102, "20", "1");
        reopen.trade_id = 77;
        let t3 = apply(t2.position.as_ref(), &reopen);

        let pos = t3.position.unwrap();
        assert_eq!(pos.trade_id_onchain, 77);
        assert_eq!(pos.avg_entry_price, d("20"));
    }

    #[test]
    fn test_zero_amount_buy_leaves_no_position() {
        let t = apply(None, &buy("a", 100, "10", "0"));
        assert_eq!(t.position, None);
        assert_eq!(t.history.amount, Decimal::zero());
        assert_eq!(t.history.avg_entry_price, Some(d("10")));
    }

    #[test]
    fn test_merge_buy_zero_guard() {
        let (avg, amount) = merge_buy(d("10"), d("0"), d("20"), d("0"));
        assert_eq!(avg, d("20"));
        assert!(amount.is_zero());
    }

    #[test]
    fn test_amount_never_negative_over_sequence() {
        let events = vec![
            buy("a", 100, "10", "5"),
            sell("b", 101, "11", "2"),
            sell("c", 102, "12", "2"),
            sell("d", 103, "13", "9"),
            close("e", 104, "14", None),
        ];

        let mut state: Option<OpenPosition> = None;
        for ev in &events {
            let t = apply(state.as_ref(), ev);
            if let Some(pos) = &t.position {
                assert!(pos.amount.is_positive(), "open row implies amount > 0");
            }
            state = t.position;
        }
        assert_eq!(state, None);
    }
}
