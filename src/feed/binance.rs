use std::collections::HashSet;

use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::engine::Engine;
use crate::models::{InboundEvent, PriceTick};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// One entry of `/fapi/v1/ticker/price`.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: Decimal,
    /// Exchange time, milliseconds since epoch.
    #[serde(default)]
    pub time: Option<i64>,
}

/// Binance USDⓈ-M futures REST price client.
#[derive(Debug, Clone)]
pub struct BinanceFeed {
    http: Client,
    base_url: String,
}

impl BinanceFeed {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Latest price of every listed contract.
    pub async fn fetch_prices(&self) -> Result<Vec<TickerPrice>, FeedError> {
        let url = format!("{}/fapi/v1/ticker/price", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?;

        let prices: Vec<TickerPrice> = resp.json().await?;
        Ok(prices)
    }
}

/// Keep only watched symbols and turn them into ticks.
pub fn select_ticks(prices: Vec<TickerPrice>, watched: &HashSet<String>, now: DateTime<Utc>) -> Vec<PriceTick> {
    prices
        .into_iter()
        .filter(|p| watched.contains(&p.symbol) && p.price > Decimal::ZERO)
        .map(|p| PriceTick {
            timestamp: p
                .time
                .and_then(DateTime::from_timestamp_millis)
                .unwrap_or(now),
            symbol: p.symbol,
            price: p.price,
        })
        .collect()
}

/// Poll the exchange and enqueue ticks for symbols with live alerts or positions.
pub async fn run_price_feed(
    feed: BinanceFeed,
    engine: Engine,
    tx: mpsc::Sender<InboundEvent>,
    interval_secs: u64,
) {
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(interval_secs, "Price feed started");

    loop {
        ticker.tick().await;

        let watched: HashSet<String> = engine.watched_symbols().await.into_iter().collect();
        if watched.is_empty() {
            tracing::debug!("Price feed: nothing to watch");
            continue;
        }

        let prices = match feed.fetch_prices().await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "Price feed: failed to fetch prices");
                continue;
            }
        };

        let ticks = select_ticks(prices, &watched, Utc::now());
        tracing::debug!(count = ticks.len(), "Price feed: enqueueing ticks");
        for tick in ticks {
            if tx.send(InboundEvent::Tick(tick)).await.is_err() {
                tracing::warn!("Inbound channel closed, price feed stopping");
                return;
            }
        }
    }
}
