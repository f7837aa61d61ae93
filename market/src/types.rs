use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Trading instrument, e.g. `eth/usdt`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pair {
    pub base: String,
    pub quote: String,
}

impl Pair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_lowercase(),
            quote: quote.into().to_lowercase(),
        }
    }

    pub fn id(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for Pair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() => {
                Ok(Pair::new(base.trim(), quote.trim()))
            }
            _ => Err(format!("invalid pair '{s}', expected base/quote")),
        }
    }
}

impl TryFrom<String> for Pair {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Pair> for String {
    fn from(pair: Pair) -> Self {
        pair.id()
    }
}

/// Key of one order book: a pair as quoted by one venue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    pub venue: String,
    pub pair: Pair,
}

impl Channel {
    pub fn new(venue: impl Into<String>, pair: Pair) -> Self {
        Self {
            venue: venue.into(),
            pair,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.venue, self.pair)
    }
}

/// One price level of a book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl DepthLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }

    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// Which side of the book a sequence of levels belongs to.
///
/// Asks are kept ascending by price, bids descending, so index 0 is always
/// the best level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookSide {
    Asks,
    Bids,
}

impl BookSide {
    /// True if `a` sorts ahead of `b` on this side.
    pub fn is_better(self, a: Decimal, b: Decimal) -> bool {
        match self {
            BookSide::Asks => a < b,
            BookSide::Bids => a > b,
        }
    }

    pub fn is_sorted(self, levels: &[DepthLevel]) -> bool {
        levels
            .windows(2)
            .all(|w| self.is_better(w[0].price, w[1].price))
    }
}

/// Two-sided depth of one channel at a point in its update sequence.
#[derive(Debug, Clone)]
pub struct DepthBookState {
    pub asks: Vec<DepthLevel>,
    pub bids: Vec<DepthLevel>,
    pub last_update_id: u64,
    pub last_update_time: Instant,
    /// Venue checksum of the last diff that validated against this book.
    pub checksum: Option<u32>,
}

impl DepthBookState {
    pub fn side(&self, side: BookSide) -> &[DepthLevel] {
        match side {
            BookSide::Asks => &self.asks,
            BookSide::Bids => &self.bids,
        }
    }

    pub fn best_ask(&self) -> Option<&DepthLevel> {
        self.asks.first()
    }

    pub fn best_bid(&self) -> Option<&DepthLevel> {
        self.bids.first()
    }

    /// Mid of the best bid and ask; `None` if either side is empty.
    pub fn mid_price(&self) -> Option<Decimal> {
        let ask = self.best_ask()?.price;
        let bid = self.best_bid()?.price;
        Some((ask + bid) / Decimal::TWO)
    }
}
