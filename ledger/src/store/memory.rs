//! In-process store for tests and dry runs. Nothing survives a restart.

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{FundFilter, FundStore, FundUpdate};
use crate::model::FundRecord;

#[derive(Default)]
pub struct MemoryFundStore {
    records: Mutex<Vec<FundRecord>>,
}

impl MemoryFundStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl FundStore for MemoryFundStore {
    async fn insert(&self, record: &FundRecord) -> anyhow::Result<()> {
        let mut records = self.records.lock().await;
        if records.iter().any(|r| r.batch == record.batch) {
            anyhow::bail!("Fund record {} already exists", record.batch);
        }
        records.push(record.clone());
        Ok(())
    }

    async fn update(&self, filter: &FundFilter, update: &FundUpdate) -> anyhow::Result<u64> {
        let mut records = self.records.lock().await;
        let mut changed = 0;
        for record in records.iter_mut().filter(|r| filter.matches(r)) {
            update.apply(record);
            changed += 1;
        }
        Ok(changed)
    }

    async fn find(&self, filter: &FundFilter) -> anyhow::Result<Vec<FundRecord>> {
        let records = self.records.lock().await;
        Ok(records.iter().filter(|r| filter.matches(r)).cloned().collect())
    }
}
