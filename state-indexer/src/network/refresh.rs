// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::NetworkState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshIntervals {
    pub network_info: Duration,
    pub epoch_subsidy: Duration,
}

impl Default for RefreshIntervals {
    fn default() -> Self {
        Self {
            network_info: Duration::from_secs(60),
            epoch_subsidy: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RefreshJob {
    NetworkInfo,
    EpochSubsidy,
}

impl RefreshJob {
    fn name(&self) -> &'static str {
        match self {
            RefreshJob::NetworkInfo => "network_info",
            RefreshJob::EpochSubsidy => "epoch_subsidy",
        }
    }
}

/// Spawn both refresh jobs; the first run of each happens one interval from now
pub fn spawn_refresh_tasks(
    state: Arc<NetworkState>,
    intervals: RefreshIntervals,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(run_job(
            state.clone(),
            RefreshJob::NetworkInfo,
            intervals.network_info,
            cancel.clone(),
        )),
        tokio::spawn(run_job(
            state,
            RefreshJob::EpochSubsidy,
            intervals.epoch_subsidy,
            cancel,
        )),
    ]
}

async fn run_job(
    state: Arc<NetworkState>,
    job: RefreshJob,
    period: Duration,
    cancel: CancellationToken,
) {
    info!("[NetworkState] {} refresh every {:?}", job.name(), period);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("[NetworkState] {} refresh stopped", job.name());
                break;
            }
            _ = ticker.tick() => {
                // Failures are logged and counted by the state itself
                let _ = match job {
                    RefreshJob::NetworkInfo => state.refresh_network_info().await,
                    RefreshJob::EpochSubsidy => state.refresh_epoch_subsidies().await,
                };
            }
        }
    }
}
