use crate::models::DepthTier;
use anyhow::{Context, bail};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub symbol: String,
    pub api_port: u16,
    /// Ascending, deduplicated.
    pub tiers: Vec<DepthTier>,
    pub restart_interval: Duration,
    pub buffer_capacity: usize,
    pub broadcast_capacity: usize,
    pub rest_url: String,
    pub ws_url: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let symbol = var_or("SYMBOL", "BTCUSDT").trim().to_uppercase();
        let api_port = parse_var("API_PORT", "3000")?;
        let tiers = parse_tiers(&var_or("DEPTH_TIERS", "50,100"))?;
        let restart_interval = Duration::from_secs(parse_var("RESTART_INTERVAL_SECS", "60")?);
        let buffer_capacity = parse_var("DIFF_BUFFER_CAPACITY", "1000")?;
        let broadcast_capacity = parse_var("BROADCAST_CAPACITY", "1024")?;

        if restart_interval.is_zero() {
            bail!("RESTART_INTERVAL_SECS must be greater than zero");
        }

        Ok(Self {
            symbol,
            api_port,
            tiers,
            restart_interval,
            buffer_capacity,
            broadcast_capacity,
            rest_url: var_or("BINANCE_REST_URL", "https://api.binance.com"),
            ws_url: var_or("BINANCE_WS_URL", "wss://stream.binance.com:9443/ws"),
        })
    }

    /// Largest configured tier, the one recorded by the persistence sink.
    pub fn largest_tier(&self) -> Option<DepthTier> {
        self.tiers.last().copied()
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(key: &str, default: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var_or(key, default)
        .trim()
        .parse::<T>()
        .with_context(|| format!("{key} is not a valid value"))
}

/// Parses a comma separated list such as "50,100" into sorted unique tiers.
pub fn parse_tiers(raw: &str) -> anyhow::Result<Vec<DepthTier>> {
    let mut tiers = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let size = s
                .parse::<u32>()
                .with_context(|| format!("DEPTH_TIERS entry {s:?} is not a number"))?;
            if size == 0 {
                bail!("DEPTH_TIERS entries must be greater than zero");
            }
            Ok(DepthTier(size))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    if tiers.is_empty() {
        bail!("DEPTH_TIERS must name at least one tier");
    }
    tiers.sort();
    tiers.dedup();
    Ok(tiers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_sorted_and_deduplicated() {
        let tiers = parse_tiers(" 100, 50,100 ,").unwrap();
        assert_eq!(tiers, vec![DepthTier(50), DepthTier(100)]);
    }

    #[test]
    fn invalid_tiers_are_rejected() {
        assert!(parse_tiers("").is_err());
        assert!(parse_tiers("50,abc").is_err());
        assert!(parse_tiers("0").is_err());
    }
}
