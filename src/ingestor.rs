use crate::errors::FeedError;
use crate::exchanges::DepthFeed;
use crate::models::{BookUpdate, DepthTier, OrderBookSnapshot};
use crate::orderbook::SnapshotSink;
use crate::sync::{self, BookSync, Phase, SyncEvent};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

/// Owns the upstream connection for one depth tier and keeps that tier's
/// book reconciled.
///
/// Every applied diff is broadcast together with the refreshed view.
/// Sending never waits on receivers: a receiver that falls behind loses
/// messages and sees `RecvError::Lagged`, the ingestor carries on.
pub struct StreamIngestor {
    symbol: String,
    tier: DepthTier,
    topic: String,
    feed: Arc<dyn DepthFeed>,
    buffer_capacity: usize,
    updates: broadcast::Sender<BookUpdate>,
    view: watch::Sender<Option<OrderBookSnapshot>>,
    phase: watch::Sender<Phase>,
    sink: Option<Arc<dyn SnapshotSink>>,
}

impl StreamIngestor {
    pub fn new(
        symbol: impl Into<String>,
        tier: DepthTier,
        feed: Arc<dyn DepthFeed>,
        buffer_capacity: usize,
        broadcast_capacity: usize,
    ) -> Self {
        let symbol = symbol.into();
        let (updates, _) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            topic: tier.topic(&symbol),
            symbol,
            tier,
            feed,
            buffer_capacity,
            updates,
            view: watch::Sender::new(None),
            phase: watch::Sender::new(Phase::Idle),
            sink: None,
        }
    }

    /// Records every refreshed view into `sink` as well.
    pub fn with_sink(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn tier(&self) -> DepthTier {
        self.tier
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Latest view of the book. `None` until a snapshot is loaded and again
    /// from a gap or restart until the next one is.
    pub fn current_view(&self) -> Option<OrderBookSnapshot> {
        self.view.borrow().clone()
    }

    /// New receiver for `(diff, view)` updates of this tier.
    pub fn subscribe(&self) -> broadcast::Receiver<BookUpdate> {
        self.updates.subscribe()
    }

    /// One ingestion invocation: subscribe, bootstrap, then apply diffs
    /// until `cancel` fires or the upstream fails.
    ///
    /// The subscription is opened before the snapshot is requested so that
    /// every diff after the snapshot's sequence point is seen. Each call
    /// starts from an empty book.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), FeedError> {
        let name = self.feed.name();
        let tier = self.tier;
        // a fresh invocation rebuilds from scratch, the previous book is gone
        self.phase.send_replace(Phase::Bootstrapping);
        self.view.send_replace(None);

        let diffs = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            diffs = self.feed.subscribe_diffs(&self.symbol) => diffs?,
        };

        tracing::info!("[{name}] {} tier {tier} bootstrapping", self.symbol);

        let mut book = BookSync::new(tier.size(), self.buffer_capacity);
        let fetch = || self.feed.fetch_snapshot(&self.symbol, tier.size());
        let result = sync::drive(&mut book, fetch, diffs, &cancel, |event| self.on_event(event)).await;

        if let Err(e) = &result {
            // stays in Bootstrapping, the next restart retries
            self.phase.send_replace(Phase::Bootstrapping);
            let stage = if e.is_bootstrap() { "bootstrap" } else { "subscription" };
            tracing::error!("[{name}] {} tier {tier} {stage} failure: {e}", self.symbol);
        }
        result
    }

    fn on_event(&self, event: SyncEvent<'_>) {
        let tier = self.tier.to_string();
        match event {
            SyncEvent::Loaded(state) => {
                let view = state.snapshot();
                tracing::info!(
                    tier = %self.tier,
                    sequence_id = view.sequence_id,
                    bids = view.bids.len(),
                    asks = view.asks.len(),
                    "snapshot loaded"
                );
                self.publish_view(view);
                self.phase.send_replace(Phase::Synced);
            }
            SyncEvent::Applied(diff, state) => {
                let view = state.snapshot();
                metrics::counter!("orderbook_diffs_applied_total", "tier" => tier.clone()).increment(1);
                metrics::gauge!("orderbook_sequence_id", "tier" => tier).set(view.sequence_id as f64);

                // no receivers is not an error
                let _ = self.updates.send(BookUpdate {
                    diff: diff.clone(),
                    snapshot: view.clone(),
                });
                self.publish_view(view);
            }
            SyncEvent::Stale(_) => {
                metrics::counter!("orderbook_diffs_stale_total", "tier" => tier).increment(1);
            }
            SyncEvent::Resync { sequence_id } => {
                metrics::counter!("orderbook_gaps_total", "tier" => tier).increment(1);
                tracing::warn!(tier = %self.tier, sequence_id, "gap detected, re-bootstrapping");
                self.phase.send_replace(Phase::Bootstrapping);
                self.view.send_replace(None);
            }
        }
    }

    fn publish_view(&self, view: OrderBookSnapshot) {
        if let Some(sink) = &self.sink {
            sink.record_snapshot(&self.symbol, self.tier, &view);
        }
        self.view.send_replace(Some(view));
    }
}
