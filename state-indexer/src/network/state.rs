// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use spacemesh_state_store::ReadStore;
use spacemesh_state_types::{EpochId, NetworkInfo, NetworkInfoNextEpoch};
use tracing::{debug, info, warn};

use super::highest_atx::{encode_atx_id, select_highest_atx};
use super::RefreshError;
use crate::epoch::EpochMath;
use crate::metrics::IndexerMetrics;
use crate::price::PriceOracle;

const NETWORK_INFO_JOB: &str = "network_info";
const EPOCH_SUBSIDY_JOB: &str = "epoch_subsidy";

/// Read-mostly cache of derived network statistics
pub struct NetworkState {
    store: Arc<dyn ReadStore>,
    epoch_math: Arc<dyn EpochMath>,
    price: Arc<dyn PriceOracle>,
    genesis_accounts: u64,
    metrics: Arc<IndexerMetrics>,
    info: ArcSwap<NetworkInfo>,
    // Grows with observed epochs, never pruned
    subsidies: ArcSwap<BTreeMap<EpochId, u64>>,
}

impl NetworkState {
    /// Build the cache and run both jobs once
    ///
    /// A failed initial cycle is logged; readers then see zero values until
    /// a later cycle succeeds.
    pub async fn new(
        store: Arc<dyn ReadStore>,
        epoch_math: Arc<dyn EpochMath>,
        price: Arc<dyn PriceOracle>,
        genesis_accounts: u64,
        metrics: Arc<IndexerMetrics>,
    ) -> Self {
        let state = Self {
            store,
            epoch_math,
            price,
            genesis_accounts,
            metrics,
            info: ArcSwap::from_pointee(NetworkInfo::default()),
            subsidies: ArcSwap::from_pointee(BTreeMap::new()),
        };
        let _ = state.refresh_network_info().await;
        let _ = state.refresh_epoch_subsidies().await;
        state
    }

    /// Last published snapshot, or the zero value before the first publish
    pub fn info(&self) -> Arc<NetworkInfo> {
        self.info.load_full()
    }

    pub fn epoch_subsidy(&self, epoch: EpochId) -> u64 {
        self.subsidies.load().get(&epoch).copied().unwrap_or(0)
    }

    /// Recompute and publish the network snapshot
    pub async fn refresh_network_info(&self) -> Result<(), RefreshError> {
        let result = self.compute_network_info().await.map(|info| {
            let (epoch, layer) = (info.epoch, info.layer);
            self.info.store(Arc::new(info));
            self.metrics.published_epoch.set(i64::from(epoch));
            self.metrics
                .published_layer
                .set(i64::try_from(layer).unwrap_or(i64::MAX));
            info!(
                "[NetworkState] Published snapshot (epoch={}, layer={})",
                epoch, layer
            );
        });
        self.record(NETWORK_INFO_JOB, result)
    }

    /// Store subsidies for every epoch from 2 up to current epoch + 1
    pub async fn refresh_epoch_subsidies(&self) -> Result<(), RefreshError> {
        let result = self.compute_subsidies().await.map(|computed| {
            let count = computed.len();
            self.subsidies.rcu(|current| {
                let mut next = BTreeMap::clone(current);
                next.extend(computed.iter().map(|(epoch, subsidy)| (*epoch, *subsidy)));
                next
            });
            debug!("[NetworkState] Stored {} epoch subsidies", count);
        });
        self.record(EPOCH_SUBSIDY_JOB, result)
    }

    fn record(
        &self,
        job: &'static str,
        result: Result<(), RefreshError>,
    ) -> Result<(), RefreshError> {
        let outcome = match &result {
            Ok(()) => "ok",
            Err(e) => {
                warn!("[NetworkState] {} refresh failed, keeping previous value: {}", job, e);
                "failed"
            }
        };
        self.metrics
            .refresh_cycles
            .with_label_values(&[job, outcome])
            .inc();
        result
    }

    async fn compute_network_info(&self) -> Result<NetworkInfo, RefreshError> {
        let layer = self
            .store
            .last_processed_layer()
            .await
            .map_err(RefreshError::query("get last processed layer"))?
            .layer;
        let epoch = self.epoch_math.epoch_of(layer);
        let previous_epoch = epoch.saturating_sub(1);

        let active_smeshers = self
            .store
            .count_atx_epoch(previous_epoch)
            .await
            .map_err(RefreshError::query("count active smeshers"))?;
        let next_active_smeshers = self
            .store
            .count_atx_epoch(epoch)
            .await
            .map_err(RefreshError::query("count next epoch smeshers"))?;
        let accounts = self
            .store
            .count_accounts()
            .await
            .map_err(RefreshError::query("count accounts"))?;
        let supply = self
            .store
            .network_info()
            .await
            .map_err(RefreshError::query("get network info"))?;
        let totals = self
            .store
            .atx_epoch_totals(previous_epoch)
            .await
            .map_err(RefreshError::query("get epoch totals"))?;
        let next_totals = self
            .store
            .atx_epoch_totals(epoch)
            .await
            .map_err(RefreshError::query("get next epoch totals"))?;

        let atx_hex = self.highest_atx_id(previous_epoch).await?;
        let atx_base64 = encode_atx_id(&atx_hex).map_err(|source| RefreshError::AtxId {
            id: atx_hex.clone(),
            source,
        })?;

        let total_slots =
            self.epoch_math
                .number_of_slots(totals.total_weight, totals.total_weight, epoch)?;

        let price = self.price.price();
        Ok(NetworkInfo {
            epoch,
            epoch_subsidy: self.epoch_math.epoch_subsidy(epoch),
            layer,
            total_slots: u64::from(total_slots),
            total_weight: totals.total_weight,
            effective_units_committed: totals.total_effective_num_units,
            circulating_supply: supply.circulating_supply,
            price,
            market_cap: (supply.circulating_supply as f64 * price) as u64,
            total_accounts: accounts.saturating_add(self.genesis_accounts),
            atx_hex,
            atx_base64,
            total_active_smeshers: active_smeshers,
            next_epoch: NetworkInfoNextEpoch {
                epoch: epoch.saturating_add(1),
                effective_units_committed: next_totals.total_effective_num_units,
                total_active_smeshers: next_active_smeshers,
            },
        })
    }

    async fn highest_atx_id(&self, epoch: EpochId) -> Result<String, RefreshError> {
        let atxs = self
            .store
            .atxs_for_epoch(epoch)
            .await
            .map_err(RefreshError::query("get epoch atxs"))?;
        let malfeasant: HashSet<String> = self
            .store
            .malfeasance_nodes()
            .await
            .map_err(RefreshError::query("get malfeasance nodes"))?
            .into_iter()
            .map(|node| node.id)
            .collect();

        Ok(select_highest_atx(&atxs, &malfeasant)
            .map(|atx| atx.atx_id.clone())
            .unwrap_or_default())
    }

    async fn compute_subsidies(&self) -> Result<Vec<(EpochId, u64)>, RefreshError> {
        let layer = self
            .store
            .last_processed_layer()
            .await
            .map_err(RefreshError::query("get last processed layer"))?
            .layer;
        let epoch = self.epoch_math.epoch_of(layer);
        Ok((2..=epoch.saturating_add(1))
            .rev()
            .map(|e| (e, self.epoch_math.epoch_subsidy(e)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::{EpochParams, LayerEpochMath};
    use crate::price::FixedPrice;
    use crate::sink::SubjectKind;
    use async_trait::async_trait;
    use spacemesh_state_store::{MemoryStore, StoreError, StoreResult, WriteStore};
    use spacemesh_state_types::{
        Atx, AtxEpochTotals, Layer, LayerId, MalfeasanceNode, NetworkSupply, Reward,
    };
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    fn math() -> Arc<dyn EpochMath> {
        Arc::new(
            LayerEpochMath::new(EpochParams {
                layers_per_epoch: 400,
                ..Default::default()
            })
            .unwrap(),
        )
    }

    /// Canned query results; `layer` drives every other value
    struct ScenarioStore {
        layer: AtomicU64,
        failing: AtomicBool,
    }

    impl ScenarioStore {
        fn at_layer(layer: LayerId) -> Self {
            Self {
                layer: AtomicU64::new(layer),
                failing: AtomicBool::new(false),
            }
        }

        fn check(&self) -> StoreResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("database down".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ReadStore for ScenarioStore {
        async fn last_processed_layer(&self) -> StoreResult<Layer> {
            self.check()?;
            Ok(Layer {
                layer: self.layer.load(Ordering::SeqCst),
            })
        }

        async fn count_atx_epoch(&self, epoch: EpochId) -> StoreResult<u64> {
            self.check()?;
            Ok(if epoch == 9 { 12 } else { 15 })
        }

        async fn atx_epoch_totals(&self, epoch: EpochId) -> StoreResult<AtxEpochTotals> {
            self.check()?;
            Ok(if epoch == 9 {
                AtxEpochTotals {
                    total_weight: 1000,
                    total_effective_num_units: 50,
                }
            } else {
                AtxEpochTotals {
                    total_weight: 2000,
                    total_effective_num_units: 70,
                }
            })
        }

        async fn atxs_for_epoch(&self, epoch: EpochId) -> StoreResult<Vec<Atx>> {
            self.check()?;
            Ok(vec![Atx {
                atx_id: "00ff10".to_string(),
                node_id: "n1".to_string(),
                coinbase: String::new(),
                base_tick: 100,
                tick_count: 20,
                effective_num_units: 4,
                weight: Some(80),
                epoch,
            }])
        }

        async fn malfeasance_nodes(&self) -> StoreResult<Vec<MalfeasanceNode>> {
            self.check()?;
            Ok(vec![])
        }

        async fn count_accounts(&self) -> StoreResult<u64> {
            self.check()?;
            // Tied to the layer so torn snapshots are detectable
            Ok(self.layer.load(Ordering::SeqCst) / 40)
        }

        async fn network_info(&self) -> StoreResult<NetworkSupply> {
            self.check()?;
            Ok(NetworkSupply {
                circulating_supply: 2_000_000,
            })
        }
    }

    async fn state_with(store: Arc<dyn ReadStore>) -> NetworkState {
        NetworkState::new(
            store,
            math(),
            Arc::new(FixedPrice(0.05)),
            28,
            IndexerMetrics::new_for_testing(),
        )
        .await
    }

    #[tokio::test]
    async fn test_network_info_scenario() {
        let state = state_with(Arc::new(ScenarioStore::at_layer(4000))).await;
        let info = state.info();

        assert_eq!(info.epoch, 10);
        assert_eq!(info.layer, 4000);
        assert_eq!(info.total_weight, 1000);
        assert_eq!(info.effective_units_committed, 50);
        assert_eq!(info.total_active_smeshers, 12);
        assert_eq!(info.circulating_supply, 2_000_000);
        assert_eq!(info.price, 0.05);
        assert_eq!(info.market_cap, 100_000);
        assert_eq!(info.total_accounts, 100 + 28);
        // Same weight twice: every slot of the epoch
        assert_eq!(info.total_slots, 50 * 400);
        assert_eq!(info.atx_hex, "00ff10");
        assert_eq!(info.atx_base64, "AP8Q");
        assert_eq!(info.epoch_subsidy, math().epoch_subsidy(10));
        assert_eq!(info.next_epoch.epoch, 11);
        assert_eq!(info.next_epoch.total_active_smeshers, 15);
        assert_eq!(info.next_epoch.effective_units_committed, 70);
        assert_eq!(state.metrics.published_epoch.get(), 10);
    }

    #[tokio::test]
    async fn test_zero_value_before_first_publish() {
        let state = state_with(Arc::new(MemoryStore::new())).await;
        assert_eq!(*state.info(), NetworkInfo::default());
        assert_eq!(state.epoch_subsidy(5), 0);
        assert_eq!(
            state
                .metrics
                .refresh_cycles
                .with_label_values(&[NETWORK_INFO_JOB, "failed"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_failed_cycle_keeps_previous_snapshot() {
        let store = Arc::new(ScenarioStore::at_layer(4000));
        let state = state_with(store.clone()).await;
        let before = state.info();

        store.failing.store(true, Ordering::SeqCst);
        store.layer.store(8000, Ordering::SeqCst);
        assert!(matches!(
            state.refresh_network_info().await,
            Err(RefreshError::Query { .. })
        ));
        assert!(state.refresh_epoch_subsidies().await.is_err());

        assert!(Arc::ptr_eq(&before, &state.info()));
        assert_eq!(state.info().layer, 4000);
        assert_eq!(state.epoch_subsidy(20), 0);
    }

    #[tokio::test]
    async fn test_subsidy_coverage() {
        let store = Arc::new(ScenarioStore::at_layer(4000));
        let state = state_with(store.clone()).await;
        let math = math();

        assert_eq!(state.epoch_subsidy(0), 0);
        assert_eq!(state.epoch_subsidy(1), 0);
        for epoch in 2..=11 {
            assert!(state.epoch_subsidy(epoch) > 0);
            assert_eq!(state.epoch_subsidy(epoch), math.epoch_subsidy(epoch));
        }
        assert_eq!(state.epoch_subsidy(12), 0);

        // The table only grows
        store.layer.store(400, Ordering::SeqCst);
        state.refresh_epoch_subsidies().await.unwrap();
        assert_eq!(state.epoch_subsidy(11), math.epoch_subsidy(11));

        store.layer.store(4800, Ordering::SeqCst);
        state.refresh_epoch_subsidies().await.unwrap();
        assert_eq!(state.epoch_subsidy(13), math.epoch_subsidy(13));
    }

    #[tokio::test]
    async fn test_malfeasant_highest_atx_excluded() {
        let store = MemoryStore::new();
        store
            .save_layer(&spacemesh_state_types::LayerUpdate {
                layer_id: 4000,
                status: 2,
            })
            .await
            .unwrap();
        for (id, node, base_tick) in [("0a", "honest", 100), ("0b", "cheater", 500)] {
            store
                .save_atx(&Atx {
                    atx_id: id.to_string(),
                    node_id: node.to_string(),
                    coinbase: String::new(),
                    base_tick,
                    tick_count: 10,
                    effective_num_units: 4,
                    weight: None,
                    epoch: 9,
                })
                .await
                .unwrap();
        }
        store
            .save_reward(&Reward {
                layer: 3999,
                node_id: "honest".to_string(),
                coinbase: "sm1".to_string(),
                amount: 1000,
                layer_reward: 1000,
                atx_id: None,
            })
            .await
            .unwrap();
        store
            .save_malfeasance_node(&MalfeasanceNode {
                id: "cheater".to_string(),
            })
            .await
            .unwrap();

        let state = state_with(Arc::new(store)).await;
        let info = state.info();
        assert_eq!(info.atx_hex, "0a");
        assert_eq!(info.atx_base64, "Cg==");
        assert_eq!(info.total_active_smeshers, 2);
        assert_eq!(info.total_accounts, 1 + 28);
        assert_eq!(info.market_cap, 50);
    }

    async fn ingest(store: &MemoryStore, kind: SubjectKind, payload: &str) {
        kind.handle(payload.as_bytes(), store).await.unwrap();
    }

    #[tokio::test]
    async fn test_atx_without_weight_field_publishes() {
        let store = MemoryStore::new();
        ingest(&store, SubjectKind::Layers, r#"{"layerID": 4000}"#).await;
        ingest(
            &store,
            SubjectKind::Atx,
            r#"{"atxID": "0a", "nodeID": "n1", "baseTick": 1, "tickCount": 2,
                "effectiveNumUnits": 4, "epoch": 9}"#,
        )
        .await;

        let state = state_with(Arc::new(store)).await;
        state.refresh_network_info().await.unwrap();
        let info = state.info();
        assert_eq!(info.layer, 4000);
        assert_eq!(info.epoch, 10);
        assert_eq!(info.total_weight, 8);
        assert_eq!(info.effective_units_committed, 4);
        assert_eq!(info.total_slots, 50 * 400);
        assert_eq!(info.atx_hex, "0a");
        assert_eq!(info.atx_base64, "Cg==");
    }

    #[tokio::test]
    async fn test_empty_previous_epoch_publishes() {
        let store = MemoryStore::new();
        ingest(&store, SubjectKind::Layers, r#"{"layerID": 4000}"#).await;
        ingest(
            &store,
            SubjectKind::Rewards,
            r#"{"layer": 3990, "nodeID": "n1", "coinbase": "sm1", "amount": 700}"#,
        )
        .await;

        let state = state_with(Arc::new(store)).await;
        state.refresh_network_info().await.unwrap();
        let info = state.info();
        assert_eq!(info.layer, 4000);
        assert_eq!(info.epoch, 10);
        assert_eq!(info.circulating_supply, 700);
        assert_eq!(info.total_weight, 0);
        assert_eq!(info.total_slots, 0);
        assert_eq!(info.total_active_smeshers, 0);
        assert_eq!(info.atx_hex, "");
        assert_eq!(info.atx_base64, "");
        assert_eq!(
            state
                .metrics
                .refresh_cycles
                .with_label_values(&[NETWORK_INFO_JOB, "failed"])
                .get(),
            0
        );
    }

    #[tokio::test]
    async fn test_fully_malfeasant_previous_epoch_publishes() {
        let store = MemoryStore::new();
        ingest(&store, SubjectKind::Layers, r#"{"layerID": 4001}"#).await;
        ingest(
            &store,
            SubjectKind::Atx,
            r#"{"atxID": "0b", "nodeID": "cheater", "baseTick": 5, "tickCount": 5,
                "effectiveNumUnits": 2, "epoch": 9}"#,
        )
        .await;
        store
            .save_malfeasance_node(&MalfeasanceNode {
                id: "cheater".to_string(),
            })
            .await
            .unwrap();

        let state = state_with(Arc::new(store)).await;
        state.refresh_network_info().await.unwrap();
        let info = state.info();
        assert_eq!(info.layer, 4001);
        assert_eq!(info.total_active_smeshers, 1);
        assert_eq!(info.atx_hex, "");
        assert_eq!(info.atx_base64, "");
    }

    #[tokio::test]
    async fn test_first_epochs_publish() {
        let store = MemoryStore::new();
        ingest(&store, SubjectKind::Layers, r#"{"layerID": 5}"#).await;

        let state = state_with(Arc::new(store)).await;
        state.refresh_network_info().await.unwrap();
        let info = state.info();
        assert_eq!(info.epoch, 0);
        assert_eq!(info.layer, 5);
        assert_eq!(info.epoch_subsidy, 0);
        assert_eq!(info.next_epoch.epoch, 1);
        assert_eq!(info.total_accounts, 28);
    }

    #[tokio::test]
    async fn test_snapshots_are_never_torn() {
        let store = Arc::new(ScenarioStore::at_layer(4000));
        let state = Arc::new(state_with(store.clone()).await);

        let reader_state = state.clone();
        let reader = tokio::spawn(async move {
            for _ in 0..2000 {
                let info = reader_state.info();
                assert_eq!(u64::from(info.epoch), info.layer / 400);
                assert_eq!(info.next_epoch.epoch, info.epoch + 1);
                assert_eq!(info.total_accounts, info.layer / 40 + 28);
                tokio::task::yield_now().await;
            }
        });

        for step in 1..=50u64 {
            store.layer.store(4000 + step * 400, Ordering::SeqCst);
            state.refresh_network_info().await.unwrap();
            tokio::task::yield_now().await;
        }
        reader.await.unwrap();
        assert_eq!(state.info().layer, 4000 + 50 * 400);
    }
}
