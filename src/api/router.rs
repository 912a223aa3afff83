use super::{AppState, handlers};
use axum::Router;
use axum::routing::get;

/// Builds and returns the full Axum router with all routes and shared state.
pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/orderBook", get(handlers::get_order_book))
        .route("/updates/{topic}", get(handlers::stream_updates))
        .route("/recorded", get(handlers::get_recorded))
        .with_state(state)
}
