//! Venue collaborator contract.
//!
//! One implementation per venue lives outside this workspace; it owns
//! request signing, field mapping and connection handling. The core only
//! speaks this trait.
//!
//! Errors must be normalized into [`VenueError`] by the implementation:
//! a refusal of the order itself is `Rejected`, anything that leaves the
//! outcome unknown (timeouts, dropped connections) is `Transport`.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use common::BatchId;

use crate::types::{BookSide, DepthBookState, Pair};

/// Order intent. Futures legs use the open/close variants, spot legs use
/// `Buy`/`Sell`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeSide {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
    Buy,
    Sell,
}

impl TradeSide {
    /// True if the order buys the base asset.
    pub fn is_buy(self) -> bool {
        matches!(self, TradeSide::OpenLong | TradeSide::CloseShort | TradeSide::Buy)
    }

    /// Book side the order consumes: buys lift asks, sells hit bids.
    pub fn book_side(self) -> BookSide {
        if self.is_buy() {
            BookSide::Asks
        } else {
            BookSide::Bids
        }
    }

    /// The order that undoes this one.
    pub fn reverse(self) -> TradeSide {
        match self {
            TradeSide::OpenLong => TradeSide::CloseLong,
            TradeSide::OpenShort => TradeSide::CloseShort,
            TradeSide::CloseLong => TradeSide::OpenLong,
            TradeSide::CloseShort => TradeSide::OpenShort,
            TradeSide::Buy => TradeSide::Sell,
            TradeSide::Sell => TradeSide::Buy,
        }
    }

    /// True if holding the result of this order gains when price rises.
    pub fn is_long_exposure(self) -> bool {
        matches!(self, TradeSide::OpenLong | TradeSide::Buy)
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeSide::OpenLong => "OpenLong",
            TradeSide::OpenShort => "OpenShort",
            TradeSide::CloseLong => "CloseLong",
            TradeSide::CloseShort => "CloseShort",
            TradeSide::Buy => "Buy",
            TradeSide::Sell => "Sell",
        };
        f.write_str(s)
    }
}

/// Product a leg trades on its venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegKind {
    Futures,
    Spot,
}

impl LegKind {
    /// Side that opens exposure in the given direction.
    pub fn open_side(self, long: bool) -> TradeSide {
        match (self, long) {
            (LegKind::Futures, true) => TradeSide::OpenLong,
            (LegKind::Futures, false) => TradeSide::OpenShort,
            (LegKind::Spot, true) => TradeSide::Buy,
            (LegKind::Spot, false) => TradeSide::Sell,
        }
    }
}

impl fmt::Display for LegKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LegKind::Futures => "futures",
            LegKind::Spot => "spot",
        })
    }
}

/// A limit order as submitted to a venue.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub batch_id: BatchId,
    pub pair: Pair,
    pub side: TradeSide,
    pub price: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// No further fills can happen.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// Cumulative state of one order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderInfo {
    pub status: OrderStatus,
    pub deal_amount: Decimal,
    pub avg_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VenueError {
    #[error("venue rejected request: {0}")]
    Rejected(String),

    #[error("order {0} not found")]
    NotFound(String),

    #[error("venue transport error: {0}")]
    Transport(String),
}

/// Capability set every venue client provides.
#[async_trait]
pub trait VenueClient: Send + Sync + 'static {
    /// Stable venue name, used as the channel key in the depth book.
    fn name(&self) -> &str;

    /// Pull the venue's current book, if it keeps one locally.
    async fn depth(&self, pair: &Pair) -> Result<Option<DepthBookState>, VenueError>;

    /// Submit a limit order, returning the venue order id.
    async fn trade(&self, order: &OrderRequest) -> Result<String, VenueError>;

    async fn order_info(&self, pair: &Pair, order_id: &str) -> Result<OrderInfo, VenueError>;

    async fn cancel_order(&self, pair: &Pair, order_id: &str) -> Result<(), VenueError>;

    /// Available balance per coin.
    async fn balance(&self) -> Result<HashMap<String, Decimal>, VenueError>;
}
