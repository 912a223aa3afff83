use crate::models::{PriceLevel, Side};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// One side of the book, bounded to `depth` levels.
///
/// Prices are kept in a `BTreeMap` sorted ascending. Asks read from the
/// front, bids from the back, so "best first" iteration is just a direction
/// choice and both sides share one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLadder {
    side: Side,
    depth: usize,
    // price → amount, never holds a zero amount
    levels: BTreeMap<Decimal, Decimal>,
}

impl PriceLadder {
    pub fn new(side: Side, depth: usize) -> Self {
        Self {
            side,
            depth,
            levels: BTreeMap::new(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Sets the amount at `level.price`, or removes the price when the
    /// amount is a tombstone.
    pub fn upsert(&mut self, level: PriceLevel) {
        if level.is_tombstone() {
            self.levels.remove(&level.price);
        } else {
            self.levels.insert(level.price, level.amount);
        }
    }

    /// Keeps only the `n` best prices. Worse prices are dropped, not merged.
    pub fn trim_to_depth(&mut self, n: usize) {
        while self.levels.len() > n {
            match self.side {
                // worst bid is the lowest price
                Side::Bid => self.levels.pop_first(),
                // worst ask is the highest price
                Side::Ask => self.levels.pop_last(),
            };
        }
    }

    /// Clears the ladder and rebuilds it from `levels`, trimmed to depth.
    pub fn replace(&mut self, levels: &[PriceLevel]) {
        self.levels.clear();
        for level in levels {
            self.upsert(*level);
        }
        self.trim_to_depth(self.depth);
    }

    /// Levels in best-first order for this side.
    pub fn iter(&self) -> Box<dyn Iterator<Item = PriceLevel> + '_> {
        let to_level = |(price, amount): (&Decimal, &Decimal)| PriceLevel::new(*price, *amount);
        match self.side {
            Side::Bid => Box::new(self.levels.iter().rev().map(to_level)),
            Side::Ask => Box::new(self.levels.iter().map(to_level)),
        }
    }

    /// Immutable best-first copy of the ladder for external consumers.
    pub fn levels(&self) -> Vec<PriceLevel> {
        self.iter().collect()
    }

    pub fn best(&self) -> Option<PriceLevel> {
        self.iter().next()
    }

    pub fn total_amount(&self) -> Decimal {
        self.levels.values().copied().sum()
    }
}
