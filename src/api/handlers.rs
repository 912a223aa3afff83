use super::AppState;
use super::models::{OrderBookQuery, RecordedResponse};
use crate::models::{BookUpdate, OrderBookResponse};
use crate::sync::Phase;
use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tokio::sync::broadcast::{self, error::RecvError};

/// GET /health: simple liveness check
pub async fn health() -> &'static str {
    "OK"
}

/// GET /orderBook?size=N: current view of the tier serving N levels and the
/// topic to subscribe to for its diffs
pub async fn get_order_book(
    State(state): State<AppState>,
    Query(query): Query<OrderBookQuery>,
) -> Result<Json<OrderBookResponse>, StatusCode> {
    let entry = state
        .registry
        .resolve(query.size.unwrap_or(0))
        .ok_or(StatusCode::NOT_FOUND)?;

    // bootstrapping or resyncing
    if entry.provider.phase() != Phase::Synced {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    let snapshot = entry
        .provider
        .current_view()
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)?;

    Ok(Json(OrderBookResponse {
        snapshot,
        update_endpoint: entry.topic.clone(),
        depth: entry.tier.0,
    }))
}

/// GET /updates/{topic}: WebSocket stream of the tier's diffs
pub async fn stream_updates(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(entry) = state.registry.by_topic(&topic) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let updates = entry.provider.subscribe();
    ws.on_upgrade(move |socket| forward_updates(socket, updates, topic))
}

/// GET /recorded: views recorded by the persistence sink
pub async fn get_recorded(State(state): State<AppState>) -> Json<RecordedResponse> {
    Json(RecordedResponse {
        snapshots: state.store.all(),
    })
}

/// Pushes diffs to one consumer until either side goes away. A consumer that
/// lags behind the broadcast ring is disconnected; it has lost diffs and
/// must re-bootstrap anyway.
async fn forward_updates(mut socket: WebSocket, mut updates: broadcast::Receiver<BookUpdate>, topic: String) {
    tracing::debug!(topic = %topic, "consumer subscribed");

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) => {
                    let payload = match serde_json::to_string(&update.diff) {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::error!(topic = %topic, "failed to encode diff: {e}");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(topic = %topic, missed, "consumer lagging, disconnecting");
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!(topic = %topic, "consumer disconnected");
}
