//! Consumer that mirrors one tier of a running depthsync server and logs
//! top of book plus the price of a fixed-size market order.

use depthsync::client::{ClientMirror, HttpMirrorSource};
use depthsync::models::OrderSide;
use rust_decimal::Decimal;
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    dotenvy::dotenv().ok();
    let server = env::var("MIRROR_SERVER_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".to_string());
    let size: u32 = env::var("MIRROR_SIZE").unwrap_or_else(|_| "20".to_string()).parse()?;
    let quote_amount: Decimal = env::var("MIRROR_QUOTE_AMOUNT")
        .unwrap_or_else(|_| "1".to_string())
        .parse()?;

    let mut mirror = ClientMirror::new(Arc::new(HttpMirrorSource::new(server)), 1000);
    let mut books = mirror.observe();

    loop {
        if !mirror.is_running() {
            if let Err(e) = mirror.setup(size).await {
                tracing::error!("mirror bootstrap failed: {e}");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                continue;
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = books.changed() => {
                changed?;
                let Some(book) = books.borrow_and_update().clone() else { continue };
                let buy = mirror.calculate_price(quote_amount, OrderSide::Buy);
                let sell = mirror.calculate_price(quote_amount, OrderSide::Sell);
                tracing::info!(
                    "seq={} bid={:?} ask={:?} buy {quote_amount}={:?} sell {quote_amount}={:?}",
                    book.sequence_id,
                    book.best_bid(),
                    book.best_ask(),
                    buy,
                    sell
                );
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {}
        }
    }

    tracing::info!("Shutting down...");
    mirror.stop();
    Ok(())
}
