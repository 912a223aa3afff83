use super::MirrorSource;
use crate::errors::FeedError;
use crate::exchanges::DiffStream;
use crate::models::{OrderBookDiff, OrderBookResponse};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Talks to a depthsync server: `GET /orderBook` for the bootstrap and the
/// `/updates/{topic}` WebSocket for diffs.
pub struct HttpMirrorSource {
    client: reqwest::Client,
    base_url: String,
    ws_url: String,
}

impl HttpMirrorSource {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:3000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let ws_url = match base_url.split_once("://") {
            Some(("https", rest)) => format!("wss://{rest}"),
            Some((_, rest)) => format!("ws://{rest}"),
            None => format!("ws://{base_url}"),
        };
        Self {
            client: reqwest::Client::new(),
            base_url,
            ws_url,
        }
    }
}

#[async_trait]
impl MirrorSource for HttpMirrorSource {
    async fn fetch(&self, size: u32) -> Result<OrderBookResponse, FeedError> {
        let url = format!("{}/orderBook?size={}", self.base_url, size);

        let response = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<OrderBookResponse>()
            .await?;

        Ok(response)
    }

    async fn subscribe(&self, topic: &str) -> Result<DiffStream, FeedError> {
        let url = format!("{}/updates/{}", self.ws_url, topic);

        tracing::info!("mirror subscribing to {url}");

        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| FeedError::WebSocket(e.to_string()))?;

        let diffs = ws_stream.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(serde_json::from_str::<OrderBookDiff>(&text).map_err(FeedError::Parse)),
                Ok(_) => None,
                Err(e) => Some(Err(FeedError::WebSocket(e.to_string()))),
            }
        });

        Ok(diffs.boxed())
    }
}
