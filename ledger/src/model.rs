use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

use common::BatchId;
use market::types::Pair;
use market::venue::{LegKind, TradeSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FundStatus {
    Open,
    Close,
    /// A leg could not be unwound. Needs manual reconciliation.
    Error,
}

impl fmt::Display for FundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FundStatus::Open => "Open",
            FundStatus::Close => "Close",
            FundStatus::Error => "Error",
        };
        f.write_str(s)
    }
}

impl FromStr for FundStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Open" => Ok(FundStatus::Open),
            "Close" => Ok(FundStatus::Close),
            "Error" => Ok(FundStatus::Error),
            other => Err(anyhow::anyhow!("Invalid FundStatus value: {}", other)),
        }
    }
}

/// One executed leg as the ledger sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct LegFill {
    pub venue: String,
    pub kind: LegKind,
    pub side: TradeSide,
    pub price: Decimal,
    pub amount: Decimal,
    pub time_ms: u64,
}

/// Persisted trace of one arbitrage batch. Vectors are indexed by leg.
#[derive(Debug, Clone, PartialEq)]
pub struct FundRecord {
    pub batch: BatchId,
    pub pair: Pair,

    // Legs
    pub venues: Vec<String>,
    pub leg_types: Vec<LegKind>,
    pub sides: Vec<TradeSide>,

    // Opening fills
    pub open_times: Vec<u64>,
    pub open_prices: Vec<Decimal>,
    pub open_amounts: Vec<Decimal>,

    // Closing fills, empty until closed
    pub close_times: Vec<u64>,
    pub close_prices: Vec<Decimal>,
    pub close_amounts: Vec<Decimal>,

    pub status: FundStatus,
    pub note: Option<String>,
    pub updated_at_ms: u64,
}

impl FundRecord {
    /// Record of the opening fills of `legs`, in leg order.
    pub fn opened(batch: BatchId, pair: Pair, legs: &[LegFill], status: FundStatus, now_ms: u64) -> Self {
        Self {
            batch,
            pair,
            venues: legs.iter().map(|l| l.venue.clone()).collect(),
            leg_types: legs.iter().map(|l| l.kind).collect(),
            sides: legs.iter().map(|l| l.side).collect(),
            open_times: legs.iter().map(|l| l.time_ms).collect(),
            open_prices: legs.iter().map(|l| l.price).collect(),
            open_amounts: legs.iter().map(|l| l.amount).collect(),
            close_times: Vec::new(),
            close_prices: Vec::new(),
            close_amounts: Vec::new(),
            status,
            note: None,
            updated_at_ms: now_ms,
        }
    }

    pub fn set_closes(&mut self, closes: &[LegFill]) {
        self.close_times = closes.iter().map(|l| l.time_ms).collect();
        self.close_prices = closes.iter().map(|l| l.price).collect();
        self.close_amounts = closes.iter().map(|l| l.amount).collect();
    }

    pub fn is_closed(&self) -> bool {
        !self.close_prices.is_empty() && self.close_prices.len() == self.open_prices.len()
    }

    /// Profit per leg that has both an open and a close fill, in quote units.
    pub fn realized_pnl(&self) -> Vec<Decimal> {
        self.sides
            .iter()
            .zip(&self.open_prices)
            .zip(self.close_prices.iter().zip(&self.close_amounts))
            .map(|((side, &open), (&close, &amount))| {
                if side.is_long_exposure() {
                    (close - open) * amount
                } else {
                    (open - close) * amount
                }
            })
            .collect()
    }

    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl().into_iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn leg(venue: &str, side: TradeSide, price: Decimal) -> LegFill {
        LegFill {
            venue: venue.into(),
            kind: LegKind::Futures,
            side,
            price,
            amount: dec!(2),
            time_ms: 1_000,
        }
    }

    #[test]
    fn status_round_trips_through_text() {
        for s in [FundStatus::Open, FundStatus::Close, FundStatus::Error] {
            assert_eq!(s.to_string().parse::<FundStatus>().unwrap(), s);
        }
        assert!("Closed".parse::<FundStatus>().is_err());
    }

    #[test]
    fn pnl_per_leg_follows_exposure() {
        let mut record = FundRecord::opened(
            BatchId::new(),
            Pair::new("eth", "usdt"),
            &[
                leg("a", TradeSide::OpenShort, dec!(102)),
                leg("b", TradeSide::OpenLong, dec!(100)),
            ],
            FundStatus::Open,
            1_000,
        );
        assert!(record.realized_pnl().is_empty());
        assert!(!record.is_closed());

        record.set_closes(&[
            leg("a", TradeSide::CloseShort, dec!(101)),
            leg("b", TradeSide::CloseLong, dec!(100.5)),
        ]);

        // short: (102 - 101) * 2, long: (100.5 - 100) * 2
        assert_eq!(record.realized_pnl(), vec![dec!(2), dec!(1)]);
        assert_eq!(record.total_pnl(), dec!(3));
        assert!(record.is_closed());
    }
}
