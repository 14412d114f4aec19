// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory storage engine

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use spacemesh_state_types::{
    Atx, AtxEpochTotals, EpochId, Layer, LayerId, LayerUpdate, MalfeasanceNode, NetworkSupply,
    Reward, Transaction,
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{ReadStore, StoreError, StoreResult, WriteStore};

#[derive(Debug, Default)]
struct Tables {
    layers: BTreeSet<LayerId>,
    rewards: BTreeMap<(LayerId, String), Reward>,
    // Ordered by ATX id so query results are stable
    atxs: BTreeMap<String, Atx>,
    transactions: HashMap<String, Transaction>,
    malfeasance: BTreeSet<String>,
}

/// Reference storage engine keeping every fact in memory
///
/// Cloning is cheap and every clone sees the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn transaction(&self, id: &str) -> Option<Transaction> {
        self.tables.read().await.transactions.get(id).cloned()
    }

    pub async fn layer_count(&self) -> usize {
        self.tables.read().await.layers.len()
    }

    pub async fn reward_count(&self) -> usize {
        self.tables.read().await.rewards.len()
    }

    pub async fn atx_count(&self) -> usize {
        self.tables.read().await.atxs.len()
    }
}

#[async_trait]
impl WriteStore for MemoryStore {
    async fn save_layer(&self, layer: &LayerUpdate) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.layers.insert(layer.layer_id);
        Ok(())
    }

    async fn save_reward(&self, reward: &Reward) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .rewards
            .insert((reward.layer, reward.node_id.clone()), reward.clone());
        Ok(())
    }

    async fn save_atx(&self, atx: &Atx) -> StoreResult<()> {
        if atx.atx_id.is_empty() {
            return Err(StoreError::Internal("ATX without identifier".to_string()));
        }
        let mut tables = self.tables.write().await;
        tables.atxs.insert(atx.atx_id.clone(), atx.clone());
        Ok(())
    }

    async fn save_transaction(&self, transaction: &Transaction) -> StoreResult<()> {
        if transaction.id.is_empty() {
            return Err(StoreError::Internal(
                "Transaction without identifier".to_string(),
            ));
        }
        let mut tables = self.tables.write().await;
        tables
            .transactions
            .entry(transaction.id.clone())
            .and_modify(|stored| stored.merge(transaction.clone()))
            .or_insert_with(|| transaction.clone());
        Ok(())
    }

    async fn save_malfeasance_node(&self, node: &MalfeasanceNode) -> StoreResult<()> {
        if node.id.is_empty() {
            return Err(StoreError::Internal(
                "Malfeasance proof without node identifier".to_string(),
            ));
        }
        let mut tables = self.tables.write().await;
        if tables.malfeasance.insert(node.id.clone()) {
            debug!("[MemoryStore] Node {} flagged as malfeasant", node.id);
        }
        Ok(())
    }
}

#[async_trait]
impl ReadStore for MemoryStore {
    async fn last_processed_layer(&self) -> StoreResult<Layer> {
        let tables = self.tables.read().await;
        tables
            .layers
            .last()
            .map(|layer| Layer { layer: *layer })
            .ok_or_else(|| StoreError::NotFound("no layer processed yet".to_string()))
    }

    async fn count_atx_epoch(&self, epoch: EpochId) -> StoreResult<u64> {
        let tables = self.tables.read().await;
        let smeshers: BTreeSet<&str> = tables
            .atxs
            .values()
            .filter(|atx| atx.epoch == epoch)
            .map(|atx| atx.node_id.as_str())
            .collect();
        Ok(smeshers.len() as u64)
    }

    async fn atx_epoch_totals(&self, epoch: EpochId) -> StoreResult<AtxEpochTotals> {
        let tables = self.tables.read().await;
        let totals = tables
            .atxs
            .values()
            .filter(|atx| atx.epoch == epoch)
            .fold(AtxEpochTotals::default(), |mut acc, atx| {
                acc.total_weight = acc.total_weight.saturating_add(atx.weight());
                acc.total_effective_num_units = acc
                    .total_effective_num_units
                    .saturating_add(atx.effective_num_units);
                acc
            });
        Ok(totals)
    }

    async fn atxs_for_epoch(&self, epoch: EpochId) -> StoreResult<Vec<Atx>> {
        let tables = self.tables.read().await;
        Ok(tables
            .atxs
            .values()
            .filter(|atx| atx.epoch == epoch)
            .cloned()
            .collect())
    }

    async fn malfeasance_nodes(&self) -> StoreResult<Vec<MalfeasanceNode>> {
        let tables = self.tables.read().await;
        Ok(tables
            .malfeasance
            .iter()
            .map(|id| MalfeasanceNode { id: id.clone() })
            .collect())
    }

    async fn count_accounts(&self) -> StoreResult<u64> {
        let tables = self.tables.read().await;
        let mut accounts: BTreeSet<&str> = BTreeSet::new();
        accounts.extend(
            tables
                .rewards
                .values()
                .map(|reward| reward.coinbase.as_str())
                .filter(|coinbase| !coinbase.is_empty()),
        );
        accounts.extend(
            tables
                .transactions
                .values()
                .filter_map(|tx| tx.principal.as_deref())
                .filter(|principal| !principal.is_empty()),
        );
        Ok(accounts.len() as u64)
    }

    async fn network_info(&self) -> StoreResult<NetworkSupply> {
        let tables = self.tables.read().await;
        let circulating_supply = tables
            .rewards
            .values()
            .fold(0u64, |acc, reward| acc.saturating_add(reward.amount));
        Ok(NetworkSupply { circulating_supply })
    }
}
