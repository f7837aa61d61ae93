//! In-memory position state owned by one coordinator.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use common::BatchId;
use ledger::{FundRecord, LegFill};
use market::types::Pair;
use market::venue::{LegKind, TradeSide};

#[derive(Debug, Clone, PartialEq)]
pub struct OpenLeg {
    pub venue: String,
    pub kind: LegKind,
    pub side: TradeSide,
    pub amount: Decimal,
    pub open_price: Decimal,
    pub open_time_ms: u64,
}

/// Both legs filled; held until both are closed.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    pub batch_id: BatchId,
    pub pair: Pair,
    pub legs: [OpenLeg; 2],
    pub open_timestamp_ms: u64,
}

impl OpenPosition {
    /// Rebuild from a persisted two-leg record.
    pub fn from_record(record: &FundRecord) -> Option<Self> {
        let leg = |i: usize| -> Option<OpenLeg> {
            Some(OpenLeg {
                venue: record.venues.get(i)?.clone(),
                kind: *record.leg_types.get(i)?,
                side: *record.sides.get(i)?,
                amount: *record.open_amounts.get(i)?,
                open_price: *record.open_prices.get(i)?,
                open_time_ms: *record.open_times.get(i)?,
            })
        };

        if record.venues.len() != 2 {
            return None;
        }
        let legs = [leg(0)?, leg(1)?];
        Some(Self {
            batch_id: record.batch,
            pair: record.pair.clone(),
            open_timestamp_ms: legs[0].open_time_ms.min(legs[1].open_time_ms),
            legs,
        })
    }

    pub fn leg_fills(&self) -> Vec<LegFill> {
        self.legs
            .iter()
            .map(|l| LegFill {
                venue: l.venue.clone(),
                kind: l.kind,
                side: l.side,
                price: l.open_price,
                amount: l.amount,
                time_ms: l.open_time_ms,
            })
            .collect()
    }
}

/// A batch that could not be unwound.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedBatch {
    pub batch_id: BatchId,
    pub pair: Pair,
    pub note: String,
}

/// Open positions keyed by a locally unique index, plus the error set.
#[derive(Debug, Default)]
pub struct PositionBook {
    next_index: u64,
    open: BTreeMap<u64, OpenPosition>,
    failed: Vec<FailedBatch>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, position: OpenPosition) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        self.open.insert(index, position);
        index
    }

    pub fn get(&self, index: u64) -> Option<&OpenPosition> {
        self.open.get(&index)
    }

    pub fn remove(&mut self, index: u64) -> Option<OpenPosition> {
        self.open.remove(&index)
    }

    pub fn contains_batch(&self, batch_id: BatchId) -> bool {
        self.open.values().any(|p| p.batch_id == batch_id)
    }

    /// Indices of the open positions on `pair`, oldest first.
    pub fn indices_for(&self, pair: &Pair) -> Vec<u64> {
        self.open
            .iter()
            .filter(|(_, p)| &p.pair == pair)
            .map(|(i, _)| *i)
            .collect()
    }

    pub fn open_positions(&self) -> Vec<OpenPosition> {
        self.open.values().cloned().collect()
    }

    pub fn open_len(&self) -> usize {
        self.open.len()
    }

    pub fn fail(&mut self, batch: FailedBatch) {
        self.failed.push(batch);
    }

    pub fn failed(&self) -> &[FailedBatch] {
        &self.failed
    }

    pub fn is_failed(&self, batch_id: BatchId) -> bool {
        self.failed.iter().any(|f| f.batch_id == batch_id)
    }

    /// Drop failed batches rejected by `keep`. Returns how many went.
    pub fn retain_failed(&mut self, mut keep: impl FnMut(&FailedBatch) -> bool) -> usize {
        let before = self.failed.len();
        self.failed.retain(|f| keep(f));
        before - self.failed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::FundStatus;
    use rust_decimal_macros::dec;

    fn fill(venue: &str, side: TradeSide, price: Decimal, time_ms: u64) -> LegFill {
        LegFill {
            venue: venue.into(),
            kind: LegKind::Futures,
            side,
            price,
            amount: dec!(0.1),
            time_ms,
        }
    }

    fn position() -> OpenPosition {
        let legs = [
            fill("okex", TradeSide::OpenShort, dec!(2040), 10),
            fill("huobi", TradeSide::OpenLong, dec!(2000), 12),
        ];
        let record = FundRecord::opened(BatchId::new(), Pair::new("eth", "usdt"), &legs, FundStatus::Open, 12);
        OpenPosition::from_record(&record).unwrap()
    }

    #[test]
    fn record_round_trip() {
        let p = position();
        assert_eq!(p.open_timestamp_ms, 10);
        assert_eq!(p.legs[0].side, TradeSide::OpenShort);
        assert_eq!(p.legs[1].open_price, dec!(2000));

        let fills = p.leg_fills();
        assert_eq!(fills[0].venue, "okex");
        assert_eq!(fills[1].amount, dec!(0.1));
    }

    #[test]
    fn single_leg_record_is_not_a_position() {
        let legs = [fill("okex", TradeSide::OpenShort, dec!(2040), 10)];
        let record = FundRecord::opened(BatchId::new(), Pair::new("eth", "usdt"), &legs, FundStatus::Open, 0);
        assert!(OpenPosition::from_record(&record).is_none());
    }

    #[test]
    fn indices_are_unique_and_filtered_by_pair() {
        let mut book = PositionBook::new();
        let a = book.insert(position());
        let b = book.insert(position());
        assert_ne!(a, b);

        let mut other = position();
        other.pair = Pair::new("btc", "usdt");
        book.insert(other);

        assert_eq!(book.indices_for(&Pair::new("eth", "usdt")), vec![a, b]);
        book.remove(a);
        assert_eq!(book.indices_for(&Pair::new("eth", "usdt")), vec![b]);
        assert_eq!(book.open_len(), 2);
    }

    #[test]
    fn failed_batches_can_be_pruned() {
        let mut book = PositionBook::new();
        let keep = BatchId::new();
        let drop = BatchId::new();
        for batch_id in [keep, drop] {
            book.fail(FailedBatch {
                batch_id,
                pair: Pair::new("eth", "usdt"),
                note: "cancel failed".into(),
            });
        }

        assert_eq!(book.retain_failed(|f| f.batch_id != drop), 1);
        assert!(book.is_failed(keep));
        assert!(!book.is_failed(drop));
    }
}
