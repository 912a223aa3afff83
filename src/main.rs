use depthsync::api::{ApiServer, Tiers};
use depthsync::config::Config;
use depthsync::exchanges::DepthFeed;
use depthsync::exchanges::binance::Binance;
use depthsync::ingestor::StreamIngestor;
use depthsync::orderbook::OrderBookStore;
use depthsync::registry::TierRegistry;
use depthsync::supervisor::RestartSupervisor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    let store = OrderBookStore::new();
    let shutdown = CancellationToken::new();

    tracing::info!(
        "depthsync starting: {} tiers {:?} on port {}, restart every {:?}",
        config.symbol,
        config.tiers,
        config.api_port,
        config.restart_interval
    );

    // ── 1. One ingestor per configured tier ────────────────────────
    let feed: Arc<dyn DepthFeed> = Arc::new(Binance::new(&config.rest_url, &config.ws_url));
    let mut registry: Tiers = TierRegistry::new();

    for &tier in &config.tiers {
        let mut ingestor = StreamIngestor::new(
            &config.symbol,
            tier,
            Arc::clone(&feed),
            config.buffer_capacity,
            config.broadcast_capacity,
        );
        // only the deepest view is recorded
        if Some(tier) == config.largest_tier() {
            ingestor = ingestor.with_sink(Arc::new(store.clone()));
        }
        let ingestor = Arc::new(ingestor);
        let topic = ingestor.topic().to_string();
        registry.configure(tier, ingestor, topic);
    }

    // ── 2. Supervise each ingestor with forced periodic restarts ────
    let mut supervisors = Vec::new();
    for entry in registry.tiers() {
        let ingestor = Arc::clone(&entry.provider);
        let supervisor = RestartSupervisor::new(format!("ingest:{}", entry.topic), config.restart_interval);
        let shutdown = shutdown.clone();

        supervisors.push(tokio::spawn(async move {
            supervisor
                .run(shutdown, move |scope| {
                    let ingestor = Arc::clone(&ingestor);
                    async move { ingestor.run(scope).await }
                })
                .await
        }));
    }

    // ── 3. Serve queries and diff topics until Ctrl+C ───────────────
    let server = ApiServer::new(registry, store);
    let server = tokio::spawn(server.run(config.api_port, shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    shutdown.cancel();

    for supervisor in supervisors {
        let report = supervisor.await?;
        tracing::info!(restarts = report.restarts, failures = report.failures, "ingestion stopped");
    }
    server.await??;

    Ok(())
}
