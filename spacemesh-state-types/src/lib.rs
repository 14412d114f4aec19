// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Ledger fact and derived snapshot types
//!
//! Facts are the records published by the upstream node on the broker
//! subjects (`layers`, `rewards`, `atx`, `transactions.*`). Their JSON field
//! names are part of the wire contract and must not change.
//!
//! `NetworkInfo` and `NetworkInfoNextEpoch` are derived, cache-only records
//! served to query consumers.

use serde::{Deserialize, Serialize};

/// Layer identifier (block height analogue)
pub type LayerId = u64;

/// Epoch number
pub type EpochId = u32;

// ============================================================================
// Ledger facts
// ============================================================================

/// A finalized ledger layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerUpdate {
    #[serde(rename = "layerID")]
    pub layer_id: LayerId,
    #[serde(default)]
    pub status: i32,
}

/// A reward earned by a node in a layer
///
/// Natural key: `(layer, node_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    pub layer: LayerId,
    #[serde(rename = "nodeID")]
    pub node_id: String,
    #[serde(default)]
    pub coinbase: String,
    #[serde(alias = "total")]
    pub amount: u64,
    #[serde(rename = "layerReward", default)]
    pub layer_reward: u64,
    #[serde(rename = "atxID", default)]
    pub atx_id: Option<String>,
}

/// An activation transaction
///
/// Natural key: `atx_id`, a hex encoded identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Atx {
    #[serde(rename = "atxID")]
    pub atx_id: String,
    #[serde(rename = "nodeID")]
    pub node_id: String,
    #[serde(default)]
    pub coinbase: String,
    #[serde(rename = "baseTick")]
    pub base_tick: u64,
    #[serde(rename = "tickCount")]
    pub tick_count: u64,
    #[serde(rename = "effectiveNumUnits")]
    pub effective_num_units: u64,
    /// Explicit weight when the publisher sends one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u64>,
    pub epoch: EpochId,
}

impl Atx {
    /// Ranking metric used for highest-ATX selection
    pub fn height(&self) -> u64 {
        self.base_tick.saturating_add(self.tick_count)
    }

    /// Eligibility weight: the published value, else `effective_num_units * tick_count`
    pub fn weight(&self) -> u64 {
        self.weight
            .unwrap_or_else(|| self.effective_num_units.saturating_mul(self.tick_count))
    }
}

/// A node proven to have violated protocol rules
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MalfeasanceNode {
    pub id: String,
}

/// A transaction record
///
/// The same record is fed by two independent subjects: `transactions.created`
/// and `transactions.result`. Apart from `id`, every field is optional so the
/// two halves can be merged in any order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub principal: Option<String>,
    pub template: Option<String>,
    pub method: Option<u8>,
    pub nonce: Option<u64>,
    pub layer: Option<LayerId>,
    pub block: Option<String>,
    pub status: Option<u8>,
    pub message: Option<String>,
    pub fee: Option<u64>,
    pub raw: Option<String>,
}

impl Transaction {
    /// Overlay every field present in `other` onto `self`
    ///
    /// Fields absent from `other` keep their stored value, so merging a
    /// "created" fact and a "result" fact yields the same record regardless
    /// of arrival order.
    pub fn merge(&mut self, other: Transaction) {
        fn overlay<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        overlay(&mut self.principal, other.principal);
        overlay(&mut self.template, other.template);
        overlay(&mut self.method, other.method);
        overlay(&mut self.nonce, other.nonce);
        overlay(&mut self.layer, other.layer);
        overlay(&mut self.block, other.block);
        overlay(&mut self.status, other.status);
        overlay(&mut self.message, other.message);
        overlay(&mut self.fee, other.fee);
        overlay(&mut self.raw, other.raw);
    }
}

// ============================================================================
// Query results
// ============================================================================

/// Latest processed layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub layer: LayerId,
}

/// Aggregate ATX totals for one epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtxEpochTotals {
    pub total_weight: u64,
    pub total_effective_num_units: u64,
}

/// Global supply figures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSupply {
    pub circulating_supply: u64,
}

// ============================================================================
// Derived snapshot
// ============================================================================

/// Network statistics snapshot
///
/// Replaced wholesale on every refresh cycle. The default value is what
/// readers see before the first successful cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub epoch: EpochId,
    pub epoch_subsidy: u64,
    pub layer: LayerId,
    pub total_slots: u64,
    pub total_weight: u64,
    pub effective_units_committed: u64,
    pub circulating_supply: u64,
    pub price: f64,
    pub market_cap: u64,
    pub total_accounts: u64,
    pub atx_hex: String,
    pub atx_base64: String,
    pub total_active_smeshers: u64,
    pub next_epoch: NetworkInfoNextEpoch,
}

/// Projection for the epoch following the current one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfoNextEpoch {
    pub epoch: EpochId,
    pub effective_units_committed: u64,
    pub total_active_smeshers: u64,
}
