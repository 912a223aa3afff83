//! Snapshot + diff reconciliation shared by the server-side ingestor and the
//! client-side mirror.
//!
//! A REST snapshot and the diff stream arrive in no particular order
//! relative to each other. [`BookSync`] buffers diffs while a snapshot is
//! outstanding, loads the snapshot, drains the buffer under the continuity
//! rule and then applies live diffs. A gap sends it back to bootstrapping.
//! [`drive`] runs that state machine against a fetch function and a diff
//! stream until cancelled or until the upstream fails.

pub mod buffer;

use crate::errors::FeedError;
use crate::models::{OrderBookDiff, OrderBookSnapshot};
use crate::orderbook::{ApplyOutcome, OrderBookState};
use futures_util::future::{Fuse, FusedFuture, FutureExt};
use futures_util::{Stream, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;

pub use buffer::DiffBuffer;

/// Reconciliation phase of one book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No snapshot requested yet.
    Idle,
    /// Snapshot outstanding; incoming diffs are buffered.
    Bootstrapping,
    /// Snapshot loaded; diffs are applied as they arrive.
    Synced,
}

/// What happened to a diff handed to [`BookSync::on_diff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOutcome {
    Buffered,
    Applied,
    Stale,
    Gap,
}

/// Notifications emitted while the book is reconciled.
#[derive(Debug)]
pub enum SyncEvent<'a> {
    /// A snapshot was loaded; the state has not seen any buffered diff yet.
    Loaded(&'a OrderBookState),
    /// A diff was applied; the state reflects it.
    Applied(&'a OrderBookDiff, &'a OrderBookState),
    /// A diff was already incorporated and was dropped.
    Stale(&'a OrderBookDiff),
    /// A gap was detected and local state is being rebuilt from a new snapshot.
    Resync { sequence_id: u64 },
}

/// Summary of loading a snapshot and draining the buffer behind it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub stale: usize,
    pub gap: bool,
}

pub struct BookSync {
    state: OrderBookState,
    buffer: DiffBuffer,
    phase: Phase,
    timestamp_guard: bool,
}

impl BookSync {
    pub fn new(depth: usize, buffer_capacity: usize) -> Self {
        Self {
            state: OrderBookState::new(depth),
            buffer: DiffBuffer::new(buffer_capacity),
            phase: Phase::Idle,
            timestamp_guard: false,
        }
    }

    /// Also treat any diff whose timestamp is not strictly newer than the
    /// book's as stale. Coarser than the sequence check: two diffs stamped
    /// with the same millisecond lose the second one, which then surfaces
    /// as a gap and a resync.
    pub fn with_timestamp_guard(mut self) -> Self {
        self.timestamp_guard = true;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &OrderBookState {
        &self.state
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Enters `Bootstrapping` and drops every diff buffered so far.
    pub fn begin_bootstrap(&mut self) {
        self.buffer.clear();
        self.phase = Phase::Bootstrapping;
    }

    /// Loads `snapshot` and replays buffered diffs in arrival order,
    /// skipping stale ones and stopping at the first gap.
    pub fn on_snapshot<E>(&mut self, snapshot: &OrderBookSnapshot, on_event: &mut E) -> DrainReport
    where
        E: FnMut(SyncEvent<'_>),
    {
        self.state.load_snapshot(snapshot);
        self.phase = Phase::Synced;
        on_event(SyncEvent::Loaded(&self.state));

        let mut report = DrainReport::default();
        while let Some(diff) = self.buffer.pop() {
            match self.apply(&diff) {
                ApplyOutcome::Applied => {
                    report.applied += 1;
                    on_event(SyncEvent::Applied(&diff, &self.state));
                }
                ApplyOutcome::Stale => {
                    report.stale += 1;
                    on_event(SyncEvent::Stale(&diff));
                }
                ApplyOutcome::Gap => {
                    tracing::warn!(
                        sequence_id = self.state.sequence_id(),
                        first_update_id = diff.first_update_id,
                        "gap while draining buffered diffs"
                    );
                    report.gap = true;
                    self.begin_bootstrap();
                    on_event(SyncEvent::Resync {
                        sequence_id: self.state.sequence_id(),
                    });
                    break;
                }
            }
        }
        report
    }

    /// Buffers `diff` while bootstrapping, applies it once synced.
    pub fn on_diff<E>(&mut self, diff: OrderBookDiff, on_event: &mut E) -> DiffOutcome
    where
        E: FnMut(SyncEvent<'_>),
    {
        if self.phase != Phase::Synced {
            if self.buffer.push(diff) {
                tracing::debug!(capacity = self.buffer.capacity(), "diff buffer full, evicted oldest");
            }
            return DiffOutcome::Buffered;
        }

        match self.apply(&diff) {
            ApplyOutcome::Applied => {
                on_event(SyncEvent::Applied(&diff, &self.state));
                DiffOutcome::Applied
            }
            ApplyOutcome::Stale => {
                tracing::debug!(
                    last_update_id = diff.last_update_id,
                    sequence_id = self.state.sequence_id(),
                    "dropping stale diff"
                );
                on_event(SyncEvent::Stale(&diff));
                DiffOutcome::Stale
            }
            ApplyOutcome::Gap => {
                tracing::warn!(
                    sequence_id = self.state.sequence_id(),
                    first_update_id = diff.first_update_id,
                    "sequence gap, resyncing"
                );
                self.begin_bootstrap();
                // postdates everything just discarded, keep it for the next drain
                self.buffer.push(diff);
                on_event(SyncEvent::Resync {
                    sequence_id: self.state.sequence_id(),
                });
                DiffOutcome::Gap
            }
        }
    }

    fn apply(&mut self, diff: &OrderBookDiff) -> ApplyOutcome {
        if self.timestamp_guard && diff.timestamp <= self.state.timestamp() {
            return ApplyOutcome::Stale;
        }
        self.state.apply_diff(diff)
    }
}

/// Runs `sync` until `cancel` fires or the upstream fails.
///
/// Whenever the book is not synced a snapshot fetch runs concurrently with
/// the diff stream, so no diff is missed between subscribing and loading.
/// A fetch error, stream error or stream end is returned to the caller.
pub async fn drive<F, Fut, S, E>(
    sync: &mut BookSync,
    mut fetch: F,
    mut diffs: S,
    cancel: &CancellationToken,
    mut on_event: E,
) -> Result<(), FeedError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<OrderBookSnapshot, FeedError>>,
    S: Stream<Item = Result<OrderBookDiff, FeedError>> + Unpin,
    E: FnMut(SyncEvent<'_>),
{
    let bootstrap = Fuse::<Fut>::terminated();
    tokio::pin!(bootstrap);

    if sync.phase() != Phase::Synced {
        if sync.phase() == Phase::Idle {
            sync.begin_bootstrap();
        }
        bootstrap.set(fetch().fuse());
    }

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return Ok(()),

            snapshot = &mut bootstrap, if !bootstrap.is_terminated() => {
                let snapshot = snapshot?;
                let report = sync.on_snapshot(&snapshot, &mut on_event);
                tracing::debug!(
                    sequence_id = snapshot.sequence_id,
                    applied = report.applied,
                    stale = report.stale,
                    "snapshot loaded"
                );
                if report.gap {
                    bootstrap.set(fetch().fuse());
                }
            }

            next = diffs.next() => match next {
                Some(Ok(diff)) => {
                    if sync.on_diff(diff, &mut on_event) == DiffOutcome::Gap {
                        bootstrap.set(fetch().fuse());
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Err(FeedError::SubscriptionClosed),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceLevel;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::{mpsc, oneshot};

    fn diff(first: u64, last: u64) -> OrderBookDiff {
        OrderBookDiff {
            first_update_id: first,
            last_update_id: last,
            timestamp: last,
            bid_changes: vec![PriceLevel::new(Decimal::from(100 + last), Decimal::ONE)],
            ask_changes: vec![],
        }
    }

    fn snapshot(sequence_id: u64) -> OrderBookSnapshot {
        OrderBookSnapshot {
            sequence_id,
            timestamp: sequence_id,
            bids: vec![PriceLevel::new(Decimal::from(100), Decimal::ONE)],
            asks: vec![PriceLevel::new(Decimal::from(200), Decimal::ONE)],
        }
    }

    #[derive(Debug, PartialEq)]
    enum Seen {
        Loaded(u64),
        Applied(u64, u64),
        Stale(u64),
        Resync,
    }

    fn recorder() -> (Arc<Mutex<Vec<Seen>>>, impl FnMut(SyncEvent<'_>)) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let on_event = move |event: SyncEvent<'_>| {
            let entry = match event {
                SyncEvent::Loaded(state) => Seen::Loaded(state.sequence_id()),
                SyncEvent::Applied(diff, _) => Seen::Applied(diff.first_update_id, diff.last_update_id),
                SyncEvent::Resync { .. } => Seen::Resync,
                SyncEvent::Stale(diff) => Seen::Stale(diff.last_update_id),
            };
            sink.lock().unwrap().push(entry);
        };
        (seen, on_event)
    }

    #[test]
    fn drains_buffer_discarding_stale_diffs() {
        let (seen, mut on_event) = recorder();
        let mut sync = BookSync::new(10, 16);
        sync.begin_bootstrap();

        for (first, last) in [(8, 10), (11, 11), (12, 15)] {
            assert_eq!(sync.on_diff(diff(first, last), &mut on_event), DiffOutcome::Buffered);
        }
        let report = sync.on_snapshot(&snapshot(10), &mut on_event);

        assert_eq!(report, DrainReport { applied: 2, stale: 1, gap: false });
        assert_eq!(sync.phase(), Phase::Synced);
        assert_eq!(sync.state().sequence_id(), 15);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Seen::Loaded(10), Seen::Stale(10), Seen::Applied(11, 11), Seen::Applied(12, 15)]
        );
    }

    #[test]
    fn gap_after_sync_triggers_bootstrap() {
        let (seen, mut on_event) = recorder();
        let mut sync = BookSync::new(10, 16);
        sync.begin_bootstrap();
        sync.on_snapshot(&snapshot(15), &mut on_event);
        let before = sync.state().clone();

        assert_eq!(sync.on_diff(diff(17, 18), &mut on_event), DiffOutcome::Gap);
        assert_eq!(sync.phase(), Phase::Bootstrapping);
        assert_eq!(sync.state(), &before);
        assert_eq!(sync.buffered(), 1);
        assert_eq!(seen.lock().unwrap().last(), Some(&Seen::Resync));
    }

    #[test]
    fn gap_inside_buffer_stops_the_drain() {
        let (_, mut on_event) = recorder();
        let mut sync = BookSync::new(10, 16);
        sync.begin_bootstrap();
        sync.on_diff(diff(11, 12), &mut on_event);
        sync.on_diff(diff(14, 15), &mut on_event);
        sync.on_diff(diff(16, 16), &mut on_event);

        let report = sync.on_snapshot(&snapshot(10), &mut on_event);
        assert_eq!(report, DrainReport { applied: 1, stale: 0, gap: true });
        assert_eq!(sync.phase(), Phase::Bootstrapping);
        assert_eq!(sync.buffered(), 0);
        assert_eq!(sync.state().sequence_id(), 12);
    }

    #[test]
    fn buffer_overflow_surfaces_as_gap() {
        let (_, mut on_event) = recorder();
        let mut sync = BookSync::new(10, 2);
        sync.begin_bootstrap();
        for id in 11..=13 {
            sync.on_diff(diff(id, id), &mut on_event);
        }
        let report = sync.on_snapshot(&snapshot(10), &mut on_event);
        assert!(report.gap);
        assert_eq!(sync.state().sequence_id(), 10);
    }

    #[test]
    fn timestamp_guard_drops_ties() {
        let (seen, mut on_event) = recorder();
        let mut sync = BookSync::new(10, 16).with_timestamp_guard();
        sync.begin_bootstrap();
        sync.on_snapshot(&snapshot(10), &mut on_event);

        let mut tie = diff(11, 11);
        tie.timestamp = 10;
        assert_eq!(sync.on_diff(tie, &mut on_event), DiffOutcome::Stale);
        assert_eq!(seen.lock().unwrap().last(), Some(&Seen::Stale(11)));

        let mut newer = diff(11, 11);
        newer.timestamp = 11;
        assert_eq!(sync.on_diff(newer, &mut on_event), DiffOutcome::Applied);
    }

    #[test]
    fn unstamped_snapshot_takes_time_from_first_diff() {
        let (_, mut on_event) = recorder();
        let mut sync = BookSync::new(10, 16).with_timestamp_guard();
        sync.begin_bootstrap();

        let mut buffered = diff(11, 11);
        buffered.timestamp = 1_000_400;
        sync.on_diff(buffered, &mut on_event);
        let mut unstamped = snapshot(10);
        unstamped.timestamp = 0;
        let report = sync.on_snapshot(&unstamped, &mut on_event);
        assert_eq!(report.applied, 1);
        assert_eq!(sync.state().timestamp(), 1_000_400);

        let mut live = diff(12, 12);
        live.timestamp = 1_000_450;
        assert_eq!(sync.on_diff(live, &mut on_event), DiffOutcome::Applied);
    }

    fn channel_stream(
        rx: mpsc::UnboundedReceiver<Result<OrderBookDiff, FeedError>>,
    ) -> impl Stream<Item = Result<OrderBookDiff, FeedError>> + Unpin {
        Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }

    #[tokio::test]
    async fn drive_buffers_until_snapshot_then_resyncs_on_gap() {
        let (seen, on_event) = recorder();
        let (diff_tx, diff_rx) = mpsc::unbounded_channel();
        let (first_tx, first_rx) = oneshot::channel::<OrderBookSnapshot>();
        let first_rx = Arc::new(Mutex::new(Some(first_rx)));
        let fetches = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let fetch = {
            let fetches = Arc::clone(&fetches);
            move || {
                let n = fetches.fetch_add(1, Ordering::SeqCst);
                let pending = first_rx.lock().unwrap().take();
                async move {
                    match pending {
                        Some(rx) if n == 0 => rx
                            .await
                            .map_err(|_| FeedError::UnexpectedData("fetch dropped".into())),
                        _ => Ok(snapshot(20)),
                    }
                }
            }
        };

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut sync = BookSync::new(10, 16);
                let result = drive(&mut sync, fetch, channel_stream(diff_rx), &cancel, on_event).await;
                (result, sync.state().sequence_id())
            })
        };

        // diffs arrive before the snapshot does
        for (first, last) in [(8, 10), (11, 11), (12, 15)] {
            diff_tx.send(Ok(diff(first, last))).unwrap();
        }
        tokio::task::yield_now().await;
        first_tx.send(snapshot(10)).unwrap();
        tokio::task::yield_now().await;

        // gap at 16, second fetch returns sequence 20
        diff_tx.send(Ok(diff(17, 18))).unwrap();
        diff_tx.send(Ok(diff(21, 21))).unwrap();

        while !seen.lock().unwrap().contains(&Seen::Applied(21, 21)) {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
        let (result, sequence_id) = task.await.unwrap();

        assert!(result.is_ok());
        assert_eq!(sequence_id, 21);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[..5],
            [
                Seen::Loaded(10),
                Seen::Stale(10),
                Seen::Applied(11, 11),
                Seen::Applied(12, 15),
                Seen::Resync
            ]
        );
        assert!(seen.contains(&Seen::Loaded(20)));
    }

    #[tokio::test]
    async fn drive_reports_stream_end() {
        let (_, on_event) = recorder();
        let (diff_tx, diff_rx) = mpsc::unbounded_channel();
        drop(diff_tx);
        let cancel = CancellationToken::new();
        let mut sync = BookSync::new(10, 16);

        let result = drive(
            &mut sync,
            || std::future::pending::<Result<OrderBookSnapshot, FeedError>>(),
            channel_stream(diff_rx),
            &cancel,
            on_event,
        )
        .await;
        assert!(matches!(result, Err(FeedError::SubscriptionClosed)));
        assert_eq!(sync.phase(), Phase::Bootstrapping);
    }

    #[tokio::test]
    async fn drive_returns_fetch_failure() {
        let (_, on_event) = recorder();
        let (_diff_tx, diff_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut sync = BookSync::new(10, 16);

        let result = drive(
            &mut sync,
            || async { Err(FeedError::UnexpectedData("boom".into())) },
            channel_stream(diff_rx),
            &cancel,
            on_event,
        )
        .await;
        assert!(matches!(result, Err(FeedError::UnexpectedData(_))));
    }
}
