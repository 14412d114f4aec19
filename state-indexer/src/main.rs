// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Spacemesh State Indexer
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │   NATS JetStream (node)  │
//! └────────────┬─────────────┘
//!              │ 5 durable groups
//!              ▼
//!      ┌───────────────┐   write   ┌──────────────┐   read   ┌──────────────┐
//!      │ subject sinks │ ────────▶ │   Postgres   │ ───────▶ │ NetworkState │
//!      └───────────────┘           └──────────────┘          └──────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use prometheus::Registry;
use spacemesh_state_indexer::broker::JetStreamBroker;
use spacemesh_state_indexer::config::IndexerConfig;
use spacemesh_state_indexer::epoch::LayerEpochMath;
use spacemesh_state_indexer::metrics::{start_metrics_server, IndexerMetrics};
use spacemesh_state_indexer::network::{spawn_refresh_tasks, NetworkState};
use spacemesh_state_indexer::price::start_price_oracle;
use spacemesh_state_indexer::sink::start_sink;
use spacemesh_state_store::PgStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser)]
#[clap(rename_all = "kebab-case", author, version)]
struct Args {
    /// YAML configuration file; defaults apply when omitted
    #[clap(env = "STATE_INDEXER_CONFIG", long)]
    config: Option<PathBuf>,
    #[clap(env, long)]
    nats_url: Option<String>,
    #[clap(env, long)]
    database_url: Option<String>,
    #[clap(env, long)]
    metrics_address: Option<SocketAddr>,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    init_tracing();

    let args = Args::parse();
    let config = load_config(&args)?;
    let cancel = CancellationToken::new();

    let (registry, metrics) = init_metrics()?;
    let metrics_handle =
        start_metrics_server(config.metrics_address, registry, cancel.child_token()).await?;

    let store = init_store(&config).await?;
    let broker = JetStreamBroker::connect(&config.nats.url)
        .await
        .context("Failed to connect to NATS")?;

    let sink_handles = start_sink(
        &broker,
        &config.nats.group_prefix,
        config.nats.consumer_settings(),
        config.nats.sink_settings(),
        Arc::new(store.clone()),
        metrics.clone(),
        cancel.child_token(),
    )
    .await
    .context("Failed to bootstrap durable groups")?;

    let epoch_math = Arc::new(LayerEpochMath::new(config.epoch.clone())?);
    let (price, price_handle) = start_price_oracle(&config.price, cancel.child_token())?;

    let state = Arc::new(
        NetworkState::new(
            Arc::new(store),
            epoch_math,
            price,
            config.genesis_accounts,
            metrics,
        )
        .await,
    );
    let refresh_handles =
        spawn_refresh_tasks(state, config.refresh.intervals(), cancel.child_token());

    let mut handles = vec![metrics_handle];
    handles.extend(sink_handles);
    handles.extend(refresh_handles);
    handles.extend(price_handle);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("[Main] Shutdown requested");
    cancel.cancel();

    wait_for_tasks(handles).await;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn load_config(args: &Args) -> anyhow::Result<IndexerConfig> {
    let mut config = match &args.config {
        Some(path) => IndexerConfig::from_file(path)?,
        None => {
            tracing::warn!("[Main] No config file given, using defaults");
            IndexerConfig::default()
        }
    };
    if let Some(url) = &args.nats_url {
        config.nats.url = url.clone();
    }
    if let Some(url) = &args.database_url {
        config.store.database_url = url.clone();
    }
    if let Some(addr) = args.metrics_address {
        config.metrics_address = addr;
    }
    config.validate()?;
    tracing::info!(
        "[Main] NATS {} (group prefix {}), metrics on {}",
        config.nats.url,
        config.nats.group_prefix,
        config.metrics_address
    );
    Ok(config)
}

async fn init_store(config: &IndexerConfig) -> anyhow::Result<PgStore> {
    let store = PgStore::connect(&config.store.database_url, config.store.pg_args())
        .await
        .context("Failed to connect to the state database")?;
    store
        .run_migrations()
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("[Main] State database ready");
    Ok(store)
}

fn init_metrics() -> anyhow::Result<(Registry, Arc<IndexerMetrics>)> {
    let registry = Registry::new_custom(Some("spacemesh".into()), None)
        .context("Failed to create Prometheus registry")?;
    let metrics = IndexerMetrics::new(&registry);
    Ok((registry, metrics))
}

async fn wait_for_tasks(handles: Vec<JoinHandle<()>>) {
    tracing::info!("[Main] Waiting for {} tasks to complete", handles.len());
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            tracing::error!("[Main] Task failed: {:?}", e);
        }
    }
    tracing::warn!("[Main] All services stopped");
}
