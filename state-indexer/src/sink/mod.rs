// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Ingestion sink
//!
//! Moves every ledger-event subject into the store with at-least-once
//! delivery and idempotent writes.
//!
//! ## Architecture
//!
//! ```text
//!  layers ─────────────┐
//!  rewards ────────────┤      one SubjectWorker per subject
//!  atx ────────────────┼──▶  fetch ─▶ decode ─▶ persist ─▶ ack
//!  transactions.created┤                 │          │
//!  transactions.result ┘                 └── nak ◀──┘ (redelivery)
//! ```
//!
//! ## Key behavior:
//! - Each subject has its own durable group and its own worker; a failing
//!   subject never stalls the others
//! - A payload that does not decode is nak'd and the worker moves on; the
//!   durable group's `max_deliver` bounds how often it comes back
//! - After shutdown is requested nothing else is acknowledged, so in-flight
//!   messages are redelivered

use std::sync::Arc;
use std::time::Duration;

use spacemesh_state_store::WriteStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::broker::{BrokerError, ConsumerSettings, JetStreamBroker};
use crate::metrics::IndexerMetrics;

mod subject;
mod worker;

pub use subject::{DecodeError, HandleError, SubjectKind};
pub use worker::{MessageOutcome, SubjectWorker};

/// Pull loop tuning shared by all subject workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkSettings {
    /// Messages pulled per fetch
    pub batch_size: usize,
    /// Long-poll wait for one fetch
    pub max_wait: Duration,
    /// Pause after a failed fetch
    pub fetch_error_backoff: Duration,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_wait: Duration::from_secs(2 * 60 * 60),
            fetch_error_backoff: Duration::from_secs(1),
        }
    }
}

/// Bootstrap every durable group, then start one worker per subject
///
/// All groups are bound before any worker starts. A bootstrap failure is
/// returned to the caller and is fatal to startup.
pub async fn start_sink(
    broker: &JetStreamBroker,
    group_prefix: &str,
    consumer_settings: ConsumerSettings,
    settings: SinkSettings,
    store: Arc<dyn WriteStore>,
    metrics: Arc<IndexerMetrics>,
    cancel: CancellationToken,
) -> Result<Vec<JoinHandle<()>>, BrokerError> {
    let mut subscriptions = Vec::with_capacity(SubjectKind::ALL.len());
    for kind in SubjectKind::ALL {
        let subscription = broker
            .bind(&kind.binding(group_prefix), consumer_settings)
            .await?;
        subscriptions.push((kind, subscription));
    }

    let handles = subscriptions
        .into_iter()
        .map(|(kind, subscription)| {
            let worker = SubjectWorker::new(
                kind,
                subscription,
                store.clone(),
                metrics.clone(),
                settings,
            );
            tokio::spawn(worker.run(cancel.clone()))
        })
        .collect::<Vec<_>>();

    info!("[Sink] Started {} subject workers", handles.len());
    Ok(handles)
}
