// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Price oracle
//!
//! The derived state cache only needs the latest known price and must never
//! wait on the network for it. [`PriceResolver`] keeps the last fetched price
//! in an atomic and refreshes it in the background.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Source of the current asset price
pub trait PriceOracle: Send + Sync {
    /// Latest known price. May be stale, never blocks.
    fn price(&self) -> f64;
}

/// Price that never changes
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedPrice(pub f64);

impl PriceOracle for FixedPrice {
    fn price(&self) -> f64 {
        self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    /// HTTP endpoint returning a JSON document that contains the price
    pub url: Option<String>,
    /// JSON pointer to the price inside the response
    pub pointer: String,
    /// Use a constant price instead of polling
    pub fixed: Option<f64>,
    pub refresh_interval_secs: u64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            url: None,
            pointer: "/spacemesh/usd".to_string(),
            fixed: None,
            refresh_interval_secs: 60,
        }
    }
}

/// Polls a JSON price endpoint and caches the result
#[derive(Debug)]
pub struct PriceResolver {
    url: String,
    pointer: String,
    client: reqwest::Client,
    // f64 bits
    price: AtomicU64,
}

impl PriceResolver {
    pub fn new(url: &str, pointer: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build price HTTP client")?;
        Ok(Self {
            url: url.to_string(),
            pointer: pointer.to_string(),
            client,
            price: AtomicU64::new(0f64.to_bits()),
        })
    }

    pub fn store(&self, price: f64) {
        self.price.store(price.to_bits(), Ordering::Release);
    }

    /// Fetch the price once and cache it
    pub async fn refresh(&self) -> anyhow::Result<f64> {
        let body: Value = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Price request failed")?
            .error_for_status()
            .context("Price endpoint returned an error status")?
            .json()
            .await
            .context("Price response is not JSON")?;

        let price = extract_price(&body, &self.pointer)?;
        self.store(price);
        debug!("[PriceResolver] Price updated: {}", price);
        Ok(price)
    }
}

impl PriceOracle for PriceResolver {
    fn price(&self) -> f64 {
        f64::from_bits(self.price.load(Ordering::Acquire))
    }
}

fn extract_price(body: &Value, pointer: &str) -> anyhow::Result<f64> {
    let value = body
        .pointer(pointer)
        .ok_or_else(|| anyhow::anyhow!("No value at {} in price response", pointer))?;
    let price = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| anyhow::anyhow!("Value at {} is not a number: {}", pointer, value))?;

    if !price.is_finite() || price < 0.0 {
        anyhow::bail!("Price {} is out of range", price);
    }
    Ok(price)
}

/// Build the configured oracle, spawning a refresh task when polling
pub fn start_price_oracle(
    config: &PriceConfig,
    cancel: CancellationToken,
) -> anyhow::Result<(Arc<dyn PriceOracle>, Option<JoinHandle<()>>)> {
    if let Some(fixed) = config.fixed {
        info!("[PriceResolver] Using fixed price {}", fixed);
        return Ok((Arc::new(FixedPrice(fixed)), None));
    }

    let Some(url) = config.url.as_deref() else {
        warn!("[PriceResolver] No price source configured, price stays at 0");
        return Ok((Arc::new(FixedPrice(0.0)), None));
    };

    let resolver = Arc::new(PriceResolver::new(url, &config.pointer)?);
    let interval = Duration::from_secs(config.refresh_interval_secs.max(1));
    let task_resolver = resolver.clone();

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[PriceResolver] Stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = task_resolver.refresh().await {
                        warn!("[PriceResolver] Failed to refresh price: {:?}", e);
                    }
                }
            }
        }
    });

    Ok((resolver, Some(handle)))
}
