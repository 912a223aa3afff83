use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One side of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

/// Side of a hypothetical order used for price-impact queries.
/// A buy consumes asks, a sell consumes bids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn consumes(self) -> Side {
        match self {
            OrderSide::Buy => Side::Ask,
            OrderSide::Sell => Side::Bid,
        }
    }
}

/// A single price level. An amount of zero means "remove this price".
///
/// On the wire a level is `["price", "amount"]` with both values as
/// decimal strings, matching the exchange's own depth format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(Decimal, Decimal)", into = "(Decimal, Decimal)")]
pub struct PriceLevel {
    pub price: Decimal,
    pub amount: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, amount: Decimal) -> Self {
        Self { price, amount }
    }

    pub fn is_tombstone(&self) -> bool {
        self.amount <= Decimal::ZERO
    }
}

impl From<(Decimal, Decimal)> for PriceLevel {
    fn from((price, amount): (Decimal, Decimal)) -> Self {
        Self { price, amount }
    }
}

impl From<PriceLevel> for (Decimal, Decimal) {
    fn from(level: PriceLevel) -> Self {
        (level.price, level.amount)
    }
}

/// Full view of the book at one sequence point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBookSnapshot {
    pub sequence_id: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }
}

/// Incremental change covering the update range `[first_update_id, last_update_id]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBookDiff {
    pub first_update_id: u64,
    pub last_update_id: u64,
    pub timestamp: u64,
    pub bid_changes: Vec<PriceLevel>,
    pub ask_changes: Vec<PriceLevel>,
}

/// A configured maximum number of levels served to a class of consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepthTier(pub u32);

impl DepthTier {
    pub fn size(self) -> usize {
        self.0 as usize
    }

    /// Distribution topic name, e.g. `orderbook.btcusdt.50`
    pub fn topic(self, symbol: &str) -> String {
        format!("orderbook.{}.{}", symbol.to_lowercase(), self.0)
    }
}

impl fmt::Display for DepthTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an ingestor emits for every applied diff: the diff itself plus the
/// book as it stands right after it.
#[derive(Debug, Clone)]
pub struct BookUpdate {
    pub diff: OrderBookDiff,
    pub snapshot: OrderBookSnapshot,
}

/// Response of the order-book query: the tier's current view and the topic
/// to subscribe to for subsequent diffs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBookResponse {
    pub snapshot: OrderBookSnapshot,
    pub update_endpoint: String,
    /// Depth of the tier that served the request.
    pub depth: u32,
}
