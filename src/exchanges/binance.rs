use super::{DepthFeed, DiffStream};
use crate::errors::FeedError;
use crate::models::{OrderBookDiff, OrderBookSnapshot, PriceLevel};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Depth limits the REST endpoint accepts.
const SNAPSHOT_LIMITS: [usize; 8] = [5, 10, 20, 50, 100, 500, 1000, 5000];

/// The raw JSON shape of `GET /api/v3/depth`
#[derive(Debug, Deserialize)]
struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
}

/// One `depthUpdate` event from the `<symbol>@depth` stream.
#[derive(Debug, Deserialize)]
struct DepthUpdate {
    #[serde(rename = "E")]
    event_time: u64,
    #[serde(rename = "U")]
    first_update_id: u64,
    #[serde(rename = "u")]
    final_update_id: u64,
    #[serde(rename = "b")]
    bids: Vec<PriceLevel>,
    #[serde(rename = "a")]
    asks: Vec<PriceLevel>,
}

impl From<DepthUpdate> for OrderBookDiff {
    fn from(update: DepthUpdate) -> Self {
        OrderBookDiff {
            first_update_id: update.first_update_id,
            last_update_id: update.final_update_id,
            timestamp: update.event_time,
            bid_changes: update.bids,
            ask_changes: update.asks,
        }
    }
}

/// The endpoint carries no event time. The snapshot is stamped 0 so the
/// first diff applied over it sets the book's time from the exchange clock.
impl From<DepthSnapshot> for OrderBookSnapshot {
    fn from(snapshot: DepthSnapshot) -> Self {
        OrderBookSnapshot {
            sequence_id: snapshot.last_update_id,
            timestamp: 0,
            bids: snapshot.bids,
            asks: snapshot.asks,
        }
    }
}

pub struct Binance {
    client: reqwest::Client,
    rest_url: String,
    ws_url: String,
}

impl Binance {
    pub fn new(rest_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            rest_url: rest_url.into(),
            ws_url: ws_url.into(),
        }
    }
}

/// Smallest limit the endpoint accepts that still covers `depth`.
fn snapshot_limit(depth: usize) -> usize {
    SNAPSHOT_LIMITS
        .iter()
        .copied()
        .find(|&limit| limit >= depth)
        .unwrap_or(SNAPSHOT_LIMITS[SNAPSHOT_LIMITS.len() - 1])
}

/// Parses one text frame. Frames that are not depth updates (subscription
/// acks and the like) yield `None`.
fn parse_frame(text: &str) -> Option<Result<OrderBookDiff, FeedError>> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return Some(Err(FeedError::Parse(e))),
    };
    if value.get("e").and_then(|e| e.as_str()) != Some("depthUpdate") {
        return None;
    }
    Some(
        serde_json::from_value::<DepthUpdate>(value)
            .map(OrderBookDiff::from)
            .map_err(FeedError::Parse),
    )
}

#[async_trait]
impl DepthFeed for Binance {
    fn name(&self) -> &'static str {
        "binance"
    }

    /// Fetches the current book via REST.
    async fn fetch_snapshot(&self, symbol: &str, limit: usize) -> Result<OrderBookSnapshot, FeedError> {
        let url = format!(
            "{}/api/v3/depth?symbol={}&limit={}",
            self.rest_url,
            symbol.to_uppercase(),
            snapshot_limit(limit)
        );

        let snapshot = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<DepthSnapshot>()
            .await?;

        Ok(snapshot.into())
    }

    /// Connects to the full-depth diff stream for `symbol`. The socket is
    /// closed when the returned stream is dropped.
    async fn subscribe_diffs(&self, symbol: &str) -> Result<DiffStream, FeedError> {
        let url = format!("{}/{}@depth@100ms", self.ws_url, symbol.to_lowercase());

        tracing::info!("[{}] {symbol} diff stream connecting to {url}", self.name());

        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| FeedError::WebSocket(e.to_string()))?;

        let diffs = ws_stream.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => parse_frame(&text),
                Ok(Message::Close(frame)) => {
                    tracing::warn!("diff stream closed by server: {frame:?}");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(FeedError::WebSocket(e.to_string()))),
            }
        });

        Ok(diffs.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn parses_depth_update_frame() {
        let frame = r#"{
            "e": "depthUpdate", "E": 1700000000123, "s": "BNBBTC",
            "U": 157, "u": 160,
            "b": [["0.0024", "10"]],
            "a": [["0.0026", "0"]]
        }"#;

        let diff = parse_frame(frame).unwrap().unwrap();
        assert_eq!(diff.first_update_id, 157);
        assert_eq!(diff.last_update_id, 160);
        assert_eq!(diff.timestamp, 1_700_000_000_123);
        assert_eq!(diff.bid_changes[0].amount, Decimal::from(10));
        assert!(diff.ask_changes[0].is_tombstone());
    }

    #[test]
    fn ignores_non_depth_frames() {
        assert!(parse_frame(r#"{"result": null, "id": 1}"#).is_none());
        assert!(matches!(parse_frame("not json"), Some(Err(FeedError::Parse(_)))));
    }

    #[test]
    fn parses_rest_snapshot() {
        let body = r#"{"lastUpdateId": 1027024, "bids": [["4.00000000", "431.00000000"]], "asks": [["4.00000200", "12.00000000"]]}"#;
        let snapshot: DepthSnapshot = serde_json::from_str(body).unwrap();
        assert_eq!(snapshot.last_update_id, 1_027_024);
        assert_eq!(snapshot.bids.len(), 1);
        assert_eq!(snapshot.asks[0].price, "4.000002".parse::<Decimal>().unwrap());

        let view = OrderBookSnapshot::from(snapshot);
        assert_eq!(view.sequence_id, 1_027_024);
        assert_eq!(view.timestamp, 0);
    }

    #[test]
    fn snapshot_limit_rounds_up_to_accepted_value() {
        assert_eq!(snapshot_limit(50), 50);
        assert_eq!(snapshot_limit(75), 100);
        assert_eq!(snapshot_limit(10_000), 5000);
    }
}
