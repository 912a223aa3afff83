use crate::orderbook::store::RecordedSnapshot;
use serde::{Deserialize, Serialize};

/// Query string for GET /orderBook
#[derive(Debug, Deserialize)]
pub struct OrderBookQuery {
    /// Requested depth; the smallest tier when absent.
    pub size: Option<u32>,
}

/// Response for GET /recorded
#[derive(Serialize)]
pub struct RecordedResponse {
    pub snapshots: Vec<RecordedSnapshot>,
}
