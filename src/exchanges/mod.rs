use crate::errors::FeedError;
use crate::models::{OrderBookDiff, OrderBookSnapshot};
use async_trait::async_trait;
use futures_util::stream::BoxStream;

pub mod binance;

/// Ordered stream of diffs from one subscription. Dropping it releases the
/// subscription.
pub type DiffStream = BoxStream<'static, Result<OrderBookDiff, FeedError>>;

#[async_trait]
pub trait DepthFeed: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetches a full snapshot with at most `limit` levels per side.
    async fn fetch_snapshot(&self, symbol: &str, limit: usize) -> Result<OrderBookSnapshot, FeedError>;

    /// Opens the incremental diff stream for `symbol`.
    async fn subscribe_diffs(&self, symbol: &str) -> Result<DiffStream, FeedError>;
}
