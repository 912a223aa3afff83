use crate::models::{DepthTier, OrderBookSnapshot};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

/// Fire-and-forget destination for book views. Implementations must not
/// block the caller; nothing they return is consulted.
pub trait SnapshotSink: Send + Sync {
    fn record_snapshot(&self, symbol: &str, tier: DepthTier, view: &OrderBookSnapshot);
}

/// A recorded view as served by `GET /recorded`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedSnapshot {
    pub symbol: String,
    pub tier: DepthTier,
    pub snapshot: OrderBookSnapshot,
}

/// Keeps the latest recorded view per symbol and tier.
#[derive(Clone, Default)]
pub struct OrderBookStore {
    inner: Arc<DashMap<String, RecordedSnapshot>>,
}

impl OrderBookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key format e.g.: "BTCUSDT:100"
    fn key(symbol: &str, tier: DepthTier) -> String {
        format!("{}:{}", symbol, tier)
    }

    /// Gets the latest recorded view for a symbol and tier
    pub fn get(&self, symbol: &str, tier: DepthTier) -> Option<RecordedSnapshot> {
        self.inner.get(&Self::key(symbol, tier)).map(|r| r.clone())
    }

    /// Gets all recorded views, ordered by key
    pub fn all(&self) -> Vec<RecordedSnapshot> {
        let mut all: Vec<_> = self.inner.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| (&a.symbol, a.tier).cmp(&(&b.symbol, b.tier)));
        all
    }
}

impl SnapshotSink for OrderBookStore {
    fn record_snapshot(&self, symbol: &str, tier: DepthTier, view: &OrderBookSnapshot) {
        self.inner.insert(
            Self::key(symbol, tier),
            RecordedSnapshot {
                symbol: symbol.to_string(),
                tier,
                snapshot: view.clone(),
            },
        );
    }
}
