use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tronledger::{
    init_db, Config, EventParser, MemoryStore, MockEventSource, RawEvent, Runner, SqliteStore,
    Store,
};

const TOKEN_B58: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
const TOKEN_HEX: &str = "41a614f803b6fd780986a42c78ec9c7f77e6ded13c";
const TRADER: &str = "TVjsyZ7fYF3qLF6BQgPmTEZy1xrNNyVAAA";

fn parser() -> EventParser {
    let mut env = HashMap::new();
    env.insert("CONTRACT_ADDRESS".to_string(), TOKEN_B58.to_string());
    env.insert("DATABASE_PATH".to_string(), ":memory:".to_string());
    EventParser::new(&Config::from_env_map(env).unwrap())
}

fn raw_buy(block_number: i64, price_scaled: u64, amount_scaled: u64) -> RawEvent {
    RawEvent {
        transaction_id: format!("tx-{}", block_number),
        block_number,
        event_index: 0,
        event_name: "TradeOpen".to_string(),
        block_timestamp: 0,
        result: json!({
            "tradeId": block_number,
            "trader": TRADER,
            "tokenAddress": TOKEN_B58,
            "action": "BUY",
            "entryPrice": price_scaled,
            "amount": amount_scaled
        }),
    }
}

fn raw_sell(block_number: i64, price_scaled: u64, amount_scaled: u64) -> RawEvent {
    RawEvent {
        transaction_id: format!("tx-{}", block_number),
        block_number,
        event_index: 0,
        event_name: "TradeOpen".to_string(),
        block_timestamp: 0,
        result: json!({
            "tradeId": block_number,
            "trader": TRADER,
            "tokenAddress": TOKEN_B58,
            "action": "SELL",
            "entryPrice": price_scaled,
            "amount": amount_scaled
        }),
    }
}

fn raw_close(block_number: i64, price_scaled: u64, pnl_scaled: i64) -> RawEvent {
    RawEvent {
        transaction_id: format!("tx-{}", block_number),
        block_number,
        event_index: 0,
        event_name: "TradeClosed".to_string(),
        block_timestamp: 0,
        result: json!({
            "tradeId": block_number,
            "trader": TRADER,
            "tokenAddress": TOKEN_B58,
            "exitPrice": price_scaled,
            "pnl": pnl_scaled
        }),
    }
}

/// A nine-event feed: two buy/sell rounds on one token ending flat, then a
/// reopening buy.
fn feed() -> Vec<RawEvent> {
    vec![
        raw_buy(100, 10_000_000, 5_000_000),
        raw_buy(101, 20_000_000, 5_000_000),
        raw_sell(102, 18_000_000, 4_000_000),
        raw_sell(103, 19_000_000, 6_000_000),
        raw_buy(104, 8_000_000, 2_000_000),
        raw_buy(105, 12_000_000, 2_000_000),
        raw_close(106, 14_000_000, 15_000_000),
        raw_buy(107, 30_000_000, 1_000_000),
        raw_buy(108, 32_000_000, 1_000_000),
    ]
}

fn paged(events: &[RawEvent], page_size: usize) -> MockEventSource {
    let mut source = MockEventSource::new();
    for chunk in events.chunks(page_size) {
        source = source.with_page(chunk.to_vec());
    }
    source
}

#[tokio::test]
async fn backfill_processes_each_event_exactly_once_across_page_sizes() {
    // The same feed must materialize identically no matter where the page
    // boundaries fall.
    for page_size in [1, 2, 3, 4, 9] {
        let store = Arc::new(MemoryStore::new());
        let runner = Runner::new(Arc::new(paged(&feed(), page_size)), store.clone(), parser());

        let summary = runner.backfill().await.unwrap();

        assert_eq!(summary.events, 9, "page_size={}", page_size);
        assert_eq!(summary.applied, 9, "page_size={}", page_size);
        assert_eq!(summary.duplicates, 0, "page_size={}", page_size);
        assert_eq!(store.history().len(), 9, "page_size={}", page_size);

        let positions = store.positions();
        assert_eq!(positions.len(), 1, "page_size={}", page_size);
        let position = &positions[0];
        assert_eq!(position.token_key, TOKEN_HEX);
        assert_eq!(position.amount, "2".parse().unwrap());
        assert_eq!(position.avg_entry_price, "31".parse().unwrap());
        assert_eq!(
            position.trade_id_onchain, 107,
            "opened by the post-close buy"
        );
    }
}

#[tokio::test]
async fn backfill_pnl_math_over_the_feed() {
    let store = Arc::new(MemoryStore::new());
    let runner = Runner::new(Arc::new(paged(&feed(), 3)), store.clone(), parser());
    runner.backfill().await.unwrap();

    let history = store.history();

    // sell 4 @ 18 against avg 15: (18 - 15) * 4 = 12
    assert_eq!(history[2].pnl, Some("12".parse().unwrap()));
    // sell 6 clamps to the open 6 @ 19: (19 - 15) * 6 = 24
    assert_eq!(history[3].amount, "6".parse().unwrap());
    assert_eq!(history[3].pnl, Some("24".parse().unwrap()));
    // the close carries its own pnl figure, which wins over (14 - 10) * 4
    assert_eq!(history[6].amount, "4".parse().unwrap());
    assert_eq!(history[6].pnl, Some("15".parse().unwrap()));
}

#[tokio::test]
async fn redelivered_feed_yields_identical_state_and_no_duplicate_rows() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("ledger.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.unwrap();
    let store = Arc::new(SqliteStore::new(pool.clone()));

    let first = Runner::new(Arc::new(paged(&feed(), 4)), store.clone(), parser());
    let summary = first.backfill().await.unwrap();
    assert_eq!(summary.applied, 9);

    let position_before = store.get_position(TOKEN_HEX).await.unwrap();

    // Simulated at-least-once delivery: the whole feed arrives again, with
    // different page boundaries for good measure.
    let second = Runner::new(Arc::new(paged(&feed(), 2)), store.clone(), parser());
    let summary = second.backfill().await.unwrap();
    assert_eq!(summary.applied, 0);
    assert_eq!(summary.duplicates, 9);

    let position_after = store.get_position(TOKEN_HEX).await.unwrap();
    assert_eq!(position_before, position_after);

    let rows: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trade_history")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows.0, 9, "no duplicate history rows");
}

#[tokio::test]
async fn overlapping_pages_are_absorbed_mid_run() {
    // The feed repeats events 102-104 on two pages, as a cursor reset would.
    let events = feed();
    let source = MockEventSource::new()
        .with_page(events[0..5].to_vec())
        .with_page(events[2..9].to_vec());

    let store = Arc::new(MemoryStore::new());
    let runner = Runner::new(Arc::new(source), store.clone(), parser());
    let summary = runner.backfill().await.unwrap();

    assert_eq!(summary.applied, 9);
    assert_eq!(summary.duplicates, 3);
    assert_eq!(store.history().len(), 9);
    assert_eq!(store.positions()[0].amount, "2".parse().unwrap());
}

#[tokio::test]
async fn empty_feed_terminates_immediately() {
    let store = Arc::new(MemoryStore::new());
    let runner = Runner::new(Arc::new(MockEventSource::new()), store.clone(), parser());

    let summary = runner.backfill().await.unwrap();
    assert_eq!(summary.events, 0);
    assert_eq!(summary.pages, 1);
    assert!(store.history().is_empty());
    assert!(store.positions().is_empty());
}
