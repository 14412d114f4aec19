// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Persistence ports for the state indexer
//!
//! The indexer talks to storage through two narrow async traits:
//! - [`WriteStore`]: idempotent upserts used by the ingestion sink
//! - [`ReadStore`]: queries used by the derived state cache
//!
//! Every write is keyed by the fact's natural key, so a redelivered message
//! can be applied any number of times without changing the queryable state.
//!
//! [`PgStore`] is the durable engine used by the indexer binary.
//! [`MemoryStore`] keeps everything in process and backs the test suites.
//! Both implement both ports and are shared by cloning.

use async_trait::async_trait;
use spacemesh_state_types::{
    Atx, AtxEpochTotals, EpochId, Layer, LayerUpdate, MalfeasanceNode, NetworkSupply, Reward,
    Transaction,
};

mod error;
mod memory;
pub mod postgres;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use postgres::{PgStore, PgStoreArgs, MIGRATIONS};

/// Write side: idempotent upserts of ledger facts
#[async_trait]
pub trait WriteStore: Send + Sync {
    /// Record a finalized layer. Repeating a layer ID is a no-op.
    async fn save_layer(&self, layer: &LayerUpdate) -> StoreResult<()>;

    /// Upsert a reward by `(layer, node_id)`
    async fn save_reward(&self, reward: &Reward) -> StoreResult<()>;

    /// Upsert an ATX by `atx_id`
    async fn save_atx(&self, atx: &Atx) -> StoreResult<()>;

    /// Merge a transaction fact into the record with the same `id`
    async fn save_transaction(&self, transaction: &Transaction) -> StoreResult<()>;

    /// Flag a node as malfeasant. Flagging twice is a no-op.
    ///
    /// No broker subject carries malfeasance proofs; callers are whatever
    /// process imports them, writing into the same store the cache reads.
    async fn save_malfeasance_node(&self, node: &MalfeasanceNode) -> StoreResult<()>;
}

/// Read side: queries backing the derived state cache
#[async_trait]
pub trait ReadStore: Send + Sync {
    /// Highest layer recorded so far
    async fn last_processed_layer(&self) -> StoreResult<Layer>;

    /// Number of distinct smeshers with an ATX targeting `epoch`
    async fn count_atx_epoch(&self, epoch: EpochId) -> StoreResult<u64>;

    /// Weight and effective units committed for `epoch`
    async fn atx_epoch_totals(&self, epoch: EpochId) -> StoreResult<AtxEpochTotals>;

    /// All ATXs targeting `epoch`
    async fn atxs_for_epoch(&self, epoch: EpochId) -> StoreResult<Vec<Atx>>;

    async fn malfeasance_nodes(&self) -> StoreResult<Vec<MalfeasanceNode>>;

    /// Number of accounts created on chain
    async fn count_accounts(&self) -> StoreResult<u64>;

    async fn network_info(&self) -> StoreResult<NetworkSupply>;
}
