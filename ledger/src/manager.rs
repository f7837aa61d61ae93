use std::sync::Arc;

use tracing::{info, warn};

use common::BatchId;
use common::time::now_ms;
use market::types::Pair;

use crate::model::{FundRecord, FundStatus, LegFill};
use crate::store::{FundFilter, FundStore, FundUpdate};

/// Append/update trail of every position the coordinator opened.
///
/// The store is the only state; the ledger adds the status transitions
/// that are allowed on top of it:
///
///   Open  -> Close  (both legs unwound)
///   Open  -> Error  (a leg could not be unwound)
///   Error -> Close  (operator reconciled by hand)
pub struct FundLedger<S: FundStore> {
    store: Arc<S>,
}

impl<S: FundStore> Clone for FundLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: FundStore> FundLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Persist a freshly opened position.
    pub async fn record_open(&self, batch: BatchId, pair: Pair, legs: &[LegFill]) -> anyhow::Result<FundRecord> {
        let record = FundRecord::opened(batch, pair, legs, FundStatus::Open, now_ms());
        self.store.insert(&record).await?;

        info!(component = "ledger", event = "open", batch_id = %batch, pair = %record.pair, legs = legs.len());
        Ok(record)
    }

    /// Attach the closing fills of `batch` and flip it to `Close`.
    pub async fn record_close(&self, batch: BatchId, closes: &[LegFill]) -> anyhow::Result<FundRecord> {
        let update = FundUpdate {
            status: Some(FundStatus::Close),
            close_times: Some(closes.iter().map(|l| l.time_ms).collect()),
            close_prices: Some(closes.iter().map(|l| l.price).collect()),
            close_amounts: Some(closes.iter().map(|l| l.amount).collect()),
            updated_at_ms: now_ms(),
            ..FundUpdate::default()
        };

        let filter = FundFilter::batch(batch).with_status(FundStatus::Open);
        if self.store.update(&filter, &update).await? == 0 {
            anyhow::bail!("No open fund record for batch {}", batch);
        }

        let record = self.require(batch).await?;
        info!(
            component = "ledger",
            event = "close",
            batch_id = %batch,
            pnl = %record.total_pnl(),
        );
        Ok(record)
    }

    /// Store `record` as `Error` with `note`, inserting it if the batch was
    /// never recorded.
    pub async fn mark_error(&self, mut record: FundRecord, note: impl Into<String>) -> anyhow::Result<FundRecord> {
        let note = note.into();
        record.status = FundStatus::Error;
        record.note = Some(note.clone());
        record.updated_at_ms = now_ms();

        let exists = !self.store.find(&FundFilter::batch(record.batch)).await?.is_empty();
        if exists {
            let update = FundUpdate {
                status: Some(FundStatus::Error),
                note: Some(note.clone()),
                close_times: Some(record.close_times.clone()),
                close_prices: Some(record.close_prices.clone()),
                close_amounts: Some(record.close_amounts.clone()),
                updated_at_ms: record.updated_at_ms,
            };
            self.store.update(&FundFilter::batch(record.batch), &update).await?;
        } else {
            self.store.insert(&record).await?;
        }

        warn!(
            component = "ledger",
            event = "error",
            batch_id = %record.batch,
            pair = %record.pair,
            note = %note,
            "Position needs manual reconciliation"
        );
        self.require(record.batch).await
    }

    pub async fn open_records(&self) -> anyhow::Result<Vec<FundRecord>> {
        self.store.find(&FundFilter::status(FundStatus::Open)).await
    }

    pub async fn failed_positions(&self) -> anyhow::Result<Vec<FundRecord>> {
        self.store.find(&FundFilter::status(FundStatus::Error)).await
    }

    pub async fn get(&self, batch: BatchId) -> anyhow::Result<Option<FundRecord>> {
        Ok(self.store.find(&FundFilter::batch(batch)).await?.into_iter().next())
    }

    /// Operator confirmation that an `Error` batch was unwound by hand.
    pub async fn resolve(&self, batch: BatchId, note: impl Into<String>) -> anyhow::Result<FundRecord> {
        let note = note.into();
        let update = FundUpdate {
            status: Some(FundStatus::Close),
            note: Some(note.clone()),
            updated_at_ms: now_ms(),
            ..FundUpdate::default()
        };

        let filter = FundFilter::batch(batch).with_status(FundStatus::Error);
        if self.store.update(&filter, &update).await? == 0 {
            anyhow::bail!("Batch {} is not in Error state", batch);
        }

        info!(component = "ledger", event = "resolved", batch_id = %batch, note = %note);
        self.require(batch).await
    }

    async fn require(&self, batch: BatchId) -> anyhow::Result<FundRecord> {
        self.get(batch)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Fund record {} not found", batch))
    }
}
