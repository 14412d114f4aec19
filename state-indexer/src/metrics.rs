// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{
    register_int_counter_vec_with_registry, register_int_gauge_with_registry, Encoder,
    IntCounterVec, IntGauge, Registry, TextEncoder,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Clone, Debug)]
pub struct IndexerMetrics {
    pub(crate) sink_messages_fetched: IntCounterVec,
    pub(crate) sink_messages_acked: IntCounterVec,
    pub(crate) sink_messages_nacked: IntCounterVec,
    pub(crate) sink_decode_failures: IntCounterVec,
    pub(crate) sink_persist_failures: IntCounterVec,
    pub(crate) sink_ack_failures: IntCounterVec,
    pub(crate) sink_fetch_errors: IntCounterVec,

    pub(crate) refresh_cycles: IntCounterVec,
    pub(crate) published_epoch: IntGauge,
    pub(crate) published_layer: IntGauge,
}

impl IndexerMetrics {
    pub fn new(registry: &Registry) -> Arc<Self> {
        Arc::new(Self {
            sink_messages_fetched: register_int_counter_vec_with_registry!(
                "state_indexer_sink_messages_fetched",
                "Total number of messages pulled from the broker",
                &["subject"],
                registry,
            )
            .unwrap(),
            sink_messages_acked: register_int_counter_vec_with_registry!(
                "state_indexer_sink_messages_acked",
                "Total number of messages persisted and acknowledged",
                &["subject"],
                registry,
            )
            .unwrap(),
            sink_messages_nacked: register_int_counter_vec_with_registry!(
                "state_indexer_sink_messages_nacked",
                "Total number of messages negatively acknowledged for redelivery",
                &["subject"],
                registry,
            )
            .unwrap(),
            sink_decode_failures: register_int_counter_vec_with_registry!(
                "state_indexer_sink_decode_failures",
                "Total number of messages whose payload could not be decoded",
                &["subject"],
                registry,
            )
            .unwrap(),
            sink_persist_failures: register_int_counter_vec_with_registry!(
                "state_indexer_sink_persist_failures",
                "Total number of facts that failed to persist",
                &["subject"],
                registry,
            )
            .unwrap(),
            sink_ack_failures: register_int_counter_vec_with_registry!(
                "state_indexer_sink_ack_failures",
                "Total number of ack or nak signals the broker did not accept",
                &["subject"],
                registry,
            )
            .unwrap(),
            sink_fetch_errors: register_int_counter_vec_with_registry!(
                "state_indexer_sink_fetch_errors",
                "Total number of failed batch fetches",
                &["subject"],
                registry,
            )
            .unwrap(),
            refresh_cycles: register_int_counter_vec_with_registry!(
                "state_indexer_refresh_cycles",
                "Total number of derived state refresh cycles by job and outcome",
                &["job", "outcome"],
                registry,
            )
            .unwrap(),
            published_epoch: register_int_gauge_with_registry!(
                "state_indexer_published_epoch",
                "Epoch of the last published network snapshot",
                registry,
            )
            .unwrap(),
            published_layer: register_int_gauge_with_registry!(
                "state_indexer_published_layer",
                "Layer of the last published network snapshot",
                registry,
            )
            .unwrap(),
        })
    }

    pub fn new_for_testing() -> Arc<Self> {
        Self::new(&Registry::new())
    }
}

async fn render_metrics(State(registry): State<Registry>) -> (StatusCode, String) {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!("[Metrics] Failed to encode metrics: {:?}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    match String::from_utf8(buffer) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("[Metrics] Metrics are not valid UTF-8: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

pub fn metrics_router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(registry)
}

/// Serve `GET /metrics` until `cancel` fires
pub async fn start_metrics_server(
    addr: SocketAddr,
    registry: Registry,
    cancel: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("[Metrics] Serving metrics on {}", addr);
    let app = metrics_router(registry);

    Ok(tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("[Metrics] Metrics server error: {:?}", e);
        }
    }))
}
