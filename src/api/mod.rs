pub mod handlers;
pub mod models;
pub mod router;

use crate::ingestor::StreamIngestor;
use crate::orderbook::OrderBookStore;
use crate::registry::TierRegistry;
use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Tier registry of live ingestors, read-only once the server starts.
pub type Tiers = TierRegistry<Arc<StreamIngestor>>;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Tiers>,
    pub store: OrderBookStore,
}

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    /// Freezes the registry behind an Arc for shared handler access.
    pub fn new(registry: Tiers, store: OrderBookStore) -> Self {
        Self {
            state: AppState {
                registry: Arc::new(registry),
                store,
            },
        }
    }

    /// Binds the server to `port` and serves until `shutdown` is cancelled.
    pub async fn run(self, port: u16, shutdown: CancellationToken) -> anyhow::Result<()> {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

        let app = router::build(self.state)
            .route("/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive());
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        tracing::info!("API server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        Ok(())
    }
}
