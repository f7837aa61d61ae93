//! SQLiteFundStore
//! ---------------
//! SQLite-backed implementation of [`FundStore`]. One row per batch; the
//! per-leg vectors are stored as JSON text and decimals keep their exact
//! string form, so a reloaded record compares equal to the one written.
use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use common::BatchId;
use market::types::Pair;

use super::{FundFilter, FundStore, FundUpdate};
use crate::model::{FundRecord, FundStatus};

pub struct SQLiteFundStore {
    pool: SqlitePool,
}

impl SQLiteFundStore {
    /// Wrap an existing pool. Call [`migrate`](Self::migrate) before use.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `url` and ensure the schema.
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database url '{}'", url))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .with_context(|| format!("Failed to open ledger database '{}'", url))?;

        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fund_records (
                batch TEXT PRIMARY KEY,
                pair TEXT NOT NULL,

                venues_json TEXT NOT NULL,
                leg_types_json TEXT NOT NULL,
                sides_json TEXT NOT NULL,

                open_times_json TEXT NOT NULL,
                open_prices_json TEXT NOT NULL,
                open_amounts_json TEXT NOT NULL,

                close_times_json TEXT NOT NULL,
                close_prices_json TEXT NOT NULL,
                close_amounts_json TEXT NOT NULL,

                status TEXT NOT NULL,
                note TEXT,
                updated_at_ms INTEGER NOT NULL
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS fund_records_status ON fund_records (status);")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn to_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn json_column<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> anyhow::Result<T> {
    let text: String = row.try_get(column)?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in column {}: '{}'", column, text))
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &FundFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(batch) = filter.batch {
        qb.push(" AND batch = ").push_bind(batch.to_string());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.to_string());
    }
    if let Some(pair) = &filter.pair {
        qb.push(" AND pair = ").push_bind(pair.to_string());
    }
}

fn decode(row: &SqliteRow) -> anyhow::Result<FundRecord> {
    let batch_str: String = row.try_get("batch")?;
    let batch = BatchId::from_str(&batch_str)
        .map_err(|e| anyhow::anyhow!("Invalid batch id '{}': {}", batch_str, e))?;

    let pair_str: String = row.try_get("pair")?;
    let pair = Pair::from_str(&pair_str).map_err(|e| anyhow::anyhow!("Invalid pair '{}': {}", pair_str, e))?;

    let status_str: String = row.try_get("status")?;
    let status = FundStatus::from_str(&status_str)?;

    Ok(FundRecord {
        batch,
        pair,
        venues: json_column(row, "venues_json")?,
        leg_types: json_column(row, "leg_types_json")?,
        sides: json_column(row, "sides_json")?,
        open_times: json_column(row, "open_times_json")?,
        open_prices: json_column(row, "open_prices_json")?,
        open_amounts: json_column(row, "open_amounts_json")?,
        close_times: json_column(row, "close_times_json")?,
        close_prices: json_column(row, "close_prices_json")?,
        close_amounts: json_column(row, "close_amounts_json")?,
        status,
        note: row.try_get("note")?,
        updated_at_ms: row.try_get::<i64, _>("updated_at_ms")? as u64,
    })
}

#[async_trait]
impl FundStore for SQLiteFundStore {
    async fn insert(&self, record: &FundRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fund_records (
                batch, pair,
                venues_json, leg_types_json, sides_json,
                open_times_json, open_prices_json, open_amounts_json,
                close_times_json, close_prices_json, close_amounts_json,
                status, note, updated_at_ms
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(record.batch.to_string())
        .bind(record.pair.to_string())
        .bind(to_json(&record.venues)?)
        .bind(to_json(&record.leg_types)?)
        .bind(to_json(&record.sides)?)
        .bind(to_json(&record.open_times)?)
        .bind(to_json(&record.open_prices)?)
        .bind(to_json(&record.open_amounts)?)
        .bind(to_json(&record.close_times)?)
        .bind(to_json(&record.close_prices)?)
        .bind(to_json(&record.close_amounts)?)
        .bind(record.status.to_string())
        .bind(&record.note)
        .bind(record.updated_at_ms as i64)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert fund record {}", record.batch))?;

        Ok(())
    }

    async fn update(&self, filter: &FundFilter, update: &FundUpdate) -> anyhow::Result<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE fund_records SET updated_at_ms = ");
        qb.push_bind(update.updated_at_ms as i64);

        if let Some(status) = update.status {
            qb.push(", status = ").push_bind(status.to_string());
        }
        if let Some(note) = &update.note {
            qb.push(", note = ").push_bind(note.clone());
        }
        if let Some(times) = &update.close_times {
            qb.push(", close_times_json = ").push_bind(to_json(times)?);
        }
        if let Some(prices) = &update.close_prices {
            qb.push(", close_prices_json = ").push_bind(to_json(prices)?);
        }
        if let Some(amounts) = &update.close_amounts {
            qb.push(", close_amounts_json = ").push_bind(to_json(amounts)?);
        }

        push_filter(&mut qb, filter);

        let done = qb.build().execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    async fn find(&self, filter: &FundFilter) -> anyhow::Result<Vec<FundRecord>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM fund_records");
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY rowid");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(decode).collect()
    }
}
