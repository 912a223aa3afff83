use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unexpected data from upstream: {0}")]
    UnexpectedData(String),

    #[error("Diff subscription closed by upstream")]
    SubscriptionClosed,
}

impl FeedError {
    /// True for failures of the REST snapshot fetch, false for faults on the
    /// streaming channel. Both are retried by the next supervisor restart.
    pub fn is_bootstrap(&self) -> bool {
        matches!(self, FeedError::Http(_) | FeedError::UnexpectedData(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("insufficient depth: requested {requested}, available {available}")]
    InsufficientDepth {
        requested: Decimal,
        available: Decimal,
    },

    #[error("requested amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("notional for {0} overflows")]
    Overflow(Decimal),
}
