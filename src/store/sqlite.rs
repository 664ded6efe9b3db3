//! SQLite-backed store: initialization, migrations and row mapping.

use super::{Store, StoreError};
use crate::domain::{Action, Decimal, HistoryRecord, OpenPosition};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use tracing::info;

/// Initialize the SQLite database with schema and pragmas.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| Box::pin(async move { configure_pragmas_conn(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully at {}", db_path);
    Ok(pool)
}

/// Run all database migrations. Idempotent.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let schema_sql = include_str!("schema.sql");

    for statement in schema_sql.split(';') {
        let trimmed = statement.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }

    Ok(())
}

async fn configure_pragmas_conn(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await?;

    // journal_mode returns the actual mode set; must use fetch to get result
    sqlx::query("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&mut *conn)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Production [`Store`] over a SQLite pool.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteStore { pool }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_position(&self, token_key: &str) -> Result<Option<OpenPosition>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT token_key, trade_id_onchain, avg_entry_price, amount,
                   strategy, trader, last_tx_id
            FROM open_positions
            WHERE token_key = ?
            "#,
        )
        .bind(token_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| position_from_row(&row)).transpose()
    }

    async fn upsert_position(&self, position: &OpenPosition) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO open_positions (
                token_key, trade_id_onchain, avg_entry_price, amount,
                strategy, trader, last_tx_id, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(token_key) DO UPDATE SET
                trade_id_onchain = excluded.trade_id_onchain,
                avg_entry_price = excluded.avg_entry_price,
                amount = excluded.amount,
                strategy = excluded.strategy,
                trader = excluded.trader,
                last_tx_id = excluded.last_tx_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(position.token_key.as_str())
        .bind(position.trade_id_onchain)
        .bind(position.avg_entry_price.to_canonical_string())
        .bind(position.amount.to_canonical_string())
        .bind(position.strategy.as_deref())
        .bind(position.trader.as_str())
        .bind(position.last_tx_id.as_str())
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_position(&self, token_key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM open_positions WHERE token_key = ?")
            .bind(token_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_history(&self, record: &HistoryRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO trade_history (
                event_uid, trade_id_onchain, token_key, action, price, amount,
                avg_entry_price, avg_exit_price, pnl, strategy, tx_id,
                block_number, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(event_uid) DO NOTHING
            "#,
        )
        .bind(record.event_uid.as_str())
        .bind(record.trade_id_onchain)
        .bind(record.token_key.as_str())
        .bind(record.action.as_str())
        .bind(record.price.to_canonical_string())
        .bind(record.amount.to_canonical_string())
        .bind(record.avg_entry_price.map(|d| d.to_canonical_string()))
        .bind(record.avg_exit_price.map(|d| d.to_canonical_string()))
        .bind(record.pnl.map(|d| d.to_canonical_string()))
        .bind(record.strategy.as_deref())
        .bind(record.tx_id.as_str())
        .bind(record.block_number)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn position_from_row(row: &SqliteRow) -> Result<OpenPosition, StoreError> {
    Ok(OpenPosition {
        token_key: row.try_get::<String, _>("token_key")?,
        trade_id_onchain: row.try_get::<i64, _>("trade_id_onchain")?,
        avg_entry_price: decimal_column(row.try_get::<String, _>("avg_entry_price")?)?,
        amount: decimal_column(row.try_get::<String, _>("amount")?)?,
        strategy: row.try_get::<Option<String>, _>("strategy")?,
        trader: row.try_get::<String, _>("trader")?,
        last_tx_id: row.try_get::<String, _>("last_tx_id")?,
    })
}

fn decimal_column(text: String) -> Result<Decimal, StoreError> {
    Decimal::from_str_canonical(&text)
        .map_err(|e| StoreError::Corrupt(format!("bad decimal {:?}: {}", text, e)))
}

// Kept for symmetry with decimal_column; history rows are currently written,
// never read back, by the ledger itself.
#[allow(dead_code)]
fn action_column(text: &str) -> Result<Action, StoreError> {
    text.parse::<Action>().map_err(StoreError::Corrupt)
}
