//! Consumer-side mirror of one depth tier.
//!
//! The mirror bootstraps from the server's order-book query, subscribes to
//! the tier's diff topic and replays the same reconciliation the server
//! runs, so a consumer never renders a torn book.

pub mod http;

use crate::errors::{FeedError, PricingError};
use crate::exchanges::DiffStream;
use crate::models::{OrderBookResponse, OrderBookSnapshot, OrderSide};
use crate::sync::{self, BookSync, SyncEvent};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use http::HttpMirrorSource;

/// Where a mirror gets its bootstrap snapshot and diff stream from.
#[async_trait]
pub trait MirrorSource: Send + Sync {
    /// One-shot query for the tier serving `size` levels.
    async fn fetch(&self, size: u32) -> Result<OrderBookResponse, FeedError>;

    /// Opens the diff subscription for `topic`.
    async fn subscribe(&self, topic: &str) -> Result<DiffStream, FeedError>;
}

struct Session {
    size: u32,
    topic: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ClientMirror {
    source: Arc<dyn MirrorSource>,
    buffer_capacity: usize,
    rendered: Arc<watch::Sender<Option<OrderBookSnapshot>>>,
    /// Bumped whenever a session ends; renders from older sessions are ignored.
    generation: Arc<AtomicU64>,
    session: Option<Session>,
}

impl ClientMirror {
    pub fn new(source: Arc<dyn MirrorSource>, buffer_capacity: usize) -> Self {
        Self {
            source,
            buffer_capacity,
            rendered: Arc::new(watch::Sender::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            session: None,
        }
    }

    /// Starts a session for `size` levels, replacing any running one.
    ///
    /// Fetches the snapshot and topic, opens the subscription, loads the
    /// snapshot and hands the stream to a background consumer. Diffs that
    /// arrive in between queue up on the subscription; if any were missed
    /// the consumer sees a gap and re-fetches through the same source.
    pub async fn setup(&mut self, size: u32) -> Result<(), FeedError> {
        if let Some(previous) = self.end_session() {
            // a join error only means the old consumer panicked
            let _ = previous.handle.await;
        }

        let response = self.source.fetch(size).await?;
        let diffs = self.source.subscribe(&response.update_endpoint).await?;

        let rendered = Arc::clone(&self.rendered);
        let generation = Arc::clone(&self.generation);
        let current = generation.load(Ordering::SeqCst);
        let mut on_event = move |event: SyncEvent<'_>| render(&rendered, &generation, current, event);

        let mut book = BookSync::new(response.depth as usize, self.buffer_capacity).with_timestamp_guard();
        book.begin_bootstrap();
        book.on_snapshot(&response.snapshot, &mut on_event);

        tracing::info!(
            size,
            topic = %response.update_endpoint,
            sequence_id = response.snapshot.sequence_id,
            "mirror session started"
        );

        let cancel = CancellationToken::new();
        let source = Arc::clone(&self.source);
        let fetch = move || {
            let source = Arc::clone(&source);
            async move { source.fetch(size).await.map(|r| r.snapshot) }
        };
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = sync::drive(&mut book, fetch, diffs, &cancel, on_event).await {
                    tracing::error!(size, "mirror session ended: {e}");
                }
            })
        };

        self.session = Some(Session {
            size,
            topic: response.update_endpoint,
            cancel,
            handle,
        });
        Ok(())
    }

    /// Cancels the running session, if any, and withdraws its book.
    pub fn stop(&mut self) {
        self.end_session();
    }

    fn end_session(&mut self) -> Option<Session> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.rendered.send_replace(None);
        let session = self.session.take()?;
        tracing::debug!(size = session.size, "mirror session cancelled");
        session.cancel.cancel();
        Some(session)
    }

    /// True while the background consumer of the current session runs.
    pub fn is_running(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.handle.is_finished())
    }

    pub fn topic(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.topic.as_str())
    }

    /// Observer of the rendered book. The receiver always holds the latest
    /// render; a slow observer skips intermediate ones.
    pub fn observe(&self) -> watch::Receiver<Option<OrderBookSnapshot>> {
        self.rendered.subscribe()
    }

    pub fn current(&self) -> Option<OrderBookSnapshot> {
        self.rendered.borrow().clone()
    }

    /// Price impact against the mirrored book.
    pub fn calculate_price(&self, amount: Decimal, side: OrderSide) -> Result<Decimal, PricingError> {
        match self.rendered.borrow().as_ref() {
            Some(book) => book.calculate_price(amount, side),
            None => Err(PricingError::InsufficientDepth {
                requested: amount,
                available: Decimal::ZERO,
            }),
        }
    }
}

impl Drop for ClientMirror {
    fn drop(&mut self) {
        self.stop();
    }
}

fn render(
    rendered: &watch::Sender<Option<OrderBookSnapshot>>,
    generation: &AtomicU64,
    session: u64,
    event: SyncEvent<'_>,
) {
    let book = match event {
        SyncEvent::Loaded(state) | SyncEvent::Applied(_, state) => Some(state.snapshot()),
        SyncEvent::Resync { sequence_id } => {
            tracing::warn!(sequence_id, "mirror gap, re-fetching snapshot");
            None
        }
        SyncEvent::Stale(_) => return,
    };
    // checked under the channel's lock so a concurrent stop always wins
    rendered.send_if_modified(|current| {
        if generation.load(Ordering::SeqCst) != session {
            return false;
        }
        *current = book;
        true
    });
}
