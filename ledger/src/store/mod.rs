pub mod memory;
pub mod sqlite_store;

use common::BatchId;
use market::types::Pair;

use crate::model::{FundRecord, FundStatus};

/// Record selector. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FundFilter {
    pub batch: Option<BatchId>,
    pub status: Option<FundStatus>,
    pub pair: Option<Pair>,
}

impl FundFilter {
    pub fn batch(batch: BatchId) -> Self {
        Self {
            batch: Some(batch),
            ..Self::default()
        }
    }

    pub fn status(status: FundStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: FundStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, record: &FundRecord) -> bool {
        self.batch.is_none_or(|b| b == record.batch)
            && self.status.is_none_or(|s| s == record.status)
            && self.pair.as_ref().is_none_or(|p| *p == record.pair)
    }
}

/// Columns an update may touch. `updated_at_ms` is always written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FundUpdate {
    pub status: Option<FundStatus>,
    pub note: Option<String>,
    pub close_times: Option<Vec<u64>>,
    pub close_prices: Option<Vec<rust_decimal::Decimal>>,
    pub close_amounts: Option<Vec<rust_decimal::Decimal>>,
    pub updated_at_ms: u64,
}

impl FundUpdate {
    pub fn apply(&self, record: &mut FundRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(note) = &self.note {
            record.note = Some(note.clone());
        }
        if let Some(times) = &self.close_times {
            record.close_times = times.clone();
        }
        if let Some(prices) = &self.close_prices {
            record.close_prices = prices.clone();
        }
        if let Some(amounts) = &self.close_amounts {
            record.close_amounts = amounts.clone();
        }
        record.updated_at_ms = self.updated_at_ms;
    }
}

#[async_trait::async_trait]
pub trait FundStore: Send + Sync + 'static {
    /// Fails if a record with the same batch exists.
    async fn insert(&self, record: &FundRecord) -> anyhow::Result<()>;

    /// Returns the number of records changed.
    async fn update(&self, filter: &FundFilter, update: &FundUpdate) -> anyhow::Result<u64>;

    /// Matching records in insertion order.
    async fn find(&self, filter: &FundFilter) -> anyhow::Result<Vec<FundRecord>>;
}
