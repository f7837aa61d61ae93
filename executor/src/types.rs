//! Types shared by the order execution coordinator and its callers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

use common::BatchId;
use market::book::BookError;
use market::estimator::EstimateError;
use market::types::{Channel, Pair};
use market::venue::{TradeSide, VenueClient};

/// Timing knobs of a single-leg execution.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Delay between two order status reads.
    pub poll_interval: Duration,

    /// Status reads per order before it is cancelled.
    pub max_polls: u32,

    /// Wall-clock budget of the whole execution, all orders included.
    pub wall_budget: Duration,

    /// Books older than this are not priced against.
    pub max_depth_staleness: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_polls: 10,
            wall_budget: Duration::from_secs(60),
            max_depth_staleness: Duration::from_secs(5),
        }
    }
}

/// One leg of an arbitrage operation.
#[derive(Clone)]
pub struct TradeConfig {
    pub batch_id: BatchId,
    pub venue: Arc<dyn VenueClient>,
    pub pair: Pair,
    pub side: TradeSide,
    /// Decision price the placement price is checked against.
    pub target_price: Decimal,
    pub amount: Decimal,
    /// Allowed deviation from `target_price`, as a ratio (0.002 = 0.2%).
    pub slippage_limit: Decimal,
}

impl TradeConfig {
    pub fn channel(&self) -> Channel {
        Channel::new(self.venue.name(), self.pair.clone())
    }

    /// Worst acceptable placement price.
    pub fn price_bound(&self) -> Decimal {
        if self.side.is_buy() {
            self.target_price * (Decimal::ONE + self.slippage_limit)
        } else {
            self.target_price * (Decimal::ONE - self.slippage_limit)
        }
    }

    pub fn accepts_price(&self, price: Decimal) -> bool {
        if self.target_price <= Decimal::ZERO || price <= Decimal::ZERO {
            return false;
        }
        if self.side.is_buy() {
            price <= self.price_bound()
        } else {
            price >= self.price_bound()
        }
    }
}

impl fmt::Debug for TradeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TradeConfig")
            .field("batch_id", &self.batch_id)
            .field("venue", &self.venue.name())
            .field("pair", &self.pair)
            .field("side", &self.side)
            .field("target_price", &self.target_price)
            .field("amount", &self.amount)
            .field("slippage_limit", &self.slippage_limit)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TradeErrorKind {
    #[error("no actionable price within the slippage band")]
    InvalidDepth,

    #[error("venue rejected the order")]
    TradeRejected,

    #[error("venue did not confirm cancellation")]
    CancelFailed,

    #[error("venue did not confirm whether the order exists")]
    Unconfirmed,

    #[error("execution budget exhausted")]
    Timeout,
}

impl TradeErrorKind {
    /// The true position on the venue is not known; never retry blindly.
    pub fn is_unknown_state(self) -> bool {
        matches!(self, TradeErrorKind::CancelFailed | TradeErrorKind::Unconfirmed)
    }
}

/// Outcome of one execution run.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeResult {
    /// `None` only when the full amount was filled.
    pub error: Option<TradeErrorKind>,
    pub deal_amount: Decimal,
    pub avg_price: Decimal,
    /// Last order placed, if any.
    pub order_id: Option<String>,
    pub orders_placed: u32,
}

impl TradeResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn has_fill(&self) -> bool {
        self.deal_amount > Decimal::ZERO
    }

    pub fn is_unknown_state(&self) -> bool {
        self.error.is_some_and(TradeErrorKind::is_unknown_state)
    }

    /// Result for a run whose task vanished before reporting.
    pub(crate) fn lost() -> Self {
        Self {
            error: Some(TradeErrorKind::Unconfirmed),
            deal_amount: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            order_id: None,
            orders_placed: 0,
        }
    }
}

/// Why no placement price could be derived.
#[derive(Debug, Clone, Error)]
pub enum PriceError {
    #[error(transparent)]
    Book(#[from] BookError),

    #[error(transparent)]
    Estimate(#[from] EstimateError),

    #[error("price {price} beyond slippage bound {bound}")]
    OutsideSlippage { price: Decimal, bound: Decimal },
}

/// Running size-weighted aggregate over the fills of several orders.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct FillAggregate {
    pub amount: Decimal,
    pub notional: Decimal,
}

impl FillAggregate {
    pub fn add(&mut self, amount: Decimal, avg_price: Decimal) {
        if amount <= Decimal::ZERO {
            return;
        }
        self.amount += amount;
        self.notional += amount * avg_price;
    }

    pub fn avg_price(&self) -> Decimal {
        if self.amount.is_zero() {
            Decimal::ZERO
        } else {
            self.notional / self.amount
        }
    }
}
