// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Derived state cache
//!
//! Two independent periodic jobs read the store and publish derived values:
//!
//! ```text
//!            ┌──────────────┐  every interval   ┌──────────────────────┐
//!  store ──▶ │ network info │ ────────────────▶ │ ArcSwap<NetworkInfo> │ ──▶ info()
//!            └──────────────┘                   └──────────────────────┘
//!            ┌──────────────┐  every interval   ┌──────────────────────┐
//!  store ──▶ │ subsidies    │ ────────────────▶ │ ArcSwap<BTreeMap>    │ ──▶ epoch_subsidy()
//!            └──────────────┘                   └──────────────────────┘
//! ```
//!
//! Each job publishes by replacing a whole `Arc`, so a reader sees either the
//! previous value or the new one. A failed cycle publishes nothing.

use spacemesh_state_store::StoreError;
use thiserror::Error;

use crate::epoch::EpochMathError;

mod highest_atx;
mod refresh;
mod state;

pub use highest_atx::{encode_atx_id, select_highest_atx};
pub use refresh::{spawn_refresh_tasks, RefreshIntervals};
pub use state::NetworkState;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Failed to {query}: {source}")]
    Query {
        query: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("Failed to compute total slots: {0}")]
    Slots(#[from] EpochMathError),

    #[error("Highest ATX id {id} is not valid hex: {source}")]
    AtxId {
        id: String,
        #[source]
        source: hex::FromHexError,
    },
}

impl RefreshError {
    pub(crate) fn query(query: &'static str) -> impl FnOnce(StoreError) -> RefreshError {
        move |source| RefreshError::Query { query, source }
    }
}
