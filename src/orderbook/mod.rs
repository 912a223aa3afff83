pub mod ladder;
pub mod store;

use crate::errors::PricingError;
use crate::models::{OrderBookDiff, OrderBookSnapshot, OrderSide, PriceLevel, Side};
use rust_decimal::Decimal;

pub use ladder::PriceLadder;
pub use store::{OrderBookStore, SnapshotSink};

/// Result of offering a diff to the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Every level was applied and the sequence advanced.
    Applied,
    /// The diff is already incorporated; nothing changed.
    Stale,
    /// The diff would skip sequence numbers; the book must be resynced.
    Gap,
}

/// Depth-limited order book driven by a snapshot and sequential diffs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBookState {
    sequence_id: u64,
    bids: PriceLadder,
    asks: PriceLadder,
    timestamp: u64,
}

impl OrderBookState {
    pub fn new(depth: usize) -> Self {
        Self {
            sequence_id: 0,
            bids: PriceLadder::new(Side::Bid, depth),
            asks: PriceLadder::new(Side::Ask, depth),
            timestamp: 0,
        }
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn depth(&self) -> usize {
        self.bids.depth()
    }

    pub fn bids(&self) -> &PriceLadder {
        &self.bids
    }

    pub fn asks(&self) -> &PriceLadder {
        &self.asks
    }

    /// Replaces the whole book with `snapshot`, unconditionally.
    pub fn load_snapshot(&mut self, snapshot: &OrderBookSnapshot) {
        self.bids.replace(&snapshot.bids);
        self.asks.replace(&snapshot.asks);
        self.sequence_id = snapshot.sequence_id;
        self.timestamp = snapshot.timestamp;
    }

    /// Applies `diff` if its update range covers the next expected sequence
    /// number. Ranges that start before the current point are accepted, as
    /// the first diff after a snapshot usually straddles it.
    pub fn apply_diff(&mut self, diff: &OrderBookDiff) -> ApplyOutcome {
        if diff.last_update_id <= self.sequence_id {
            return ApplyOutcome::Stale;
        }
        if diff.first_update_id > self.sequence_id.saturating_add(1) {
            return ApplyOutcome::Gap;
        }

        for level in &diff.bid_changes {
            self.bids.upsert(*level);
        }
        for level in &diff.ask_changes {
            self.asks.upsert(*level);
        }
        let depth = self.depth();
        self.bids.trim_to_depth(depth);
        self.asks.trim_to_depth(depth);

        self.sequence_id = diff.last_update_id;
        self.timestamp = self.timestamp.max(diff.timestamp);
        ApplyOutcome::Applied
    }

    /// Highest bid price (best price a buyer will pay)
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.best().map(|l| l.price)
    }

    /// Lowest ask price (best price a seller will accept)
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.best().map(|l| l.price)
    }

    /// Spread between best ask and best bid
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        Some((self.best_ask()? + self.best_bid()?) / Decimal::TWO)
    }

    /// Average execution price of a hypothetical `side` order for `amount`.
    pub fn calculate_price(&self, amount: Decimal, side: OrderSide) -> Result<Decimal, PricingError> {
        let ladder = match side.consumes() {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        };
        fill_price(ladder.iter(), amount)
    }

    /// Renders the current book as an immutable snapshot.
    pub fn snapshot(&self) -> OrderBookSnapshot {
        OrderBookSnapshot {
            sequence_id: self.sequence_id,
            timestamp: self.timestamp,
            bids: self.bids.levels(),
            asks: self.asks.levels(),
        }
    }
}

impl OrderBookSnapshot {
    /// Same as [`OrderBookState::calculate_price`], over a rendered view.
    pub fn calculate_price(&self, amount: Decimal, side: OrderSide) -> Result<Decimal, PricingError> {
        let levels = match side.consumes() {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        };
        fill_price(levels.iter().copied(), amount)
    }
}

/// Walks `levels` best-first until `amount` is filled and returns the
/// amount-weighted average price. The last level consumed may be partial.
fn fill_price(
    levels: impl Iterator<Item = PriceLevel>,
    amount: Decimal,
) -> Result<Decimal, PricingError> {
    if amount <= Decimal::ZERO {
        return Err(PricingError::InvalidAmount(amount));
    }

    let mut remaining = amount;
    let mut notional = Decimal::ZERO;
    for level in levels {
        let take = remaining.min(level.amount);
        notional = take
            .checked_mul(level.price)
            .and_then(|cost| notional.checked_add(cost))
            .ok_or(PricingError::Overflow(amount))?;
        remaining -= take;
        if remaining.is_zero() {
            return notional.checked_div(amount).ok_or(PricingError::Overflow(amount));
        }
    }

    Err(PricingError::InsufficientDepth {
        requested: amount,
        available: amount - remaining,
    })
}
