// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Row types for the Postgres engine
//!
//! Postgres has no unsigned integers, so every `u64` is stored as `BIGINT`.
//! Values above `i64::MAX` are rejected on write instead of wrapping.

use diesel::prelude::*;
use diesel::sql_types::BigInt;
use spacemesh_state_types::{Atx, EpochId, LayerUpdate, Reward, Transaction};

use super::schema::{atxs, layers, rewards, transactions};
use crate::{StoreError, StoreResult};

pub(crate) fn to_i64(value: u64, field: &'static str) -> StoreResult<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::Internal(format!("{} {} does not fit in BIGINT", field, value)))
}

pub(crate) fn to_u64(value: i64, field: &'static str) -> StoreResult<u64> {
    u64::try_from(value)
        .map_err(|_| StoreError::Internal(format!("negative {} {} in database", field, value)))
}

fn opt_i64(value: Option<u64>, field: &'static str) -> StoreResult<Option<i64>> {
    value.map(|v| to_i64(v, field)).transpose()
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = layers)]
pub(crate) struct LayerRow {
    pub layer_id: i64,
    pub status: i32,
}

impl TryFrom<&LayerUpdate> for LayerRow {
    type Error = StoreError;

    fn try_from(layer: &LayerUpdate) -> StoreResult<Self> {
        Ok(Self {
            layer_id: to_i64(layer.layer_id, "layer")?,
            status: layer.status,
        })
    }
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = rewards, primary_key(layer, node_id), treat_none_as_null = true)]
pub(crate) struct RewardRow {
    pub layer: i64,
    pub node_id: String,
    pub coinbase: String,
    pub amount: i64,
    pub layer_reward: i64,
    pub atx_id: Option<String>,
}

impl TryFrom<&Reward> for RewardRow {
    type Error = StoreError;

    fn try_from(reward: &Reward) -> StoreResult<Self> {
        Ok(Self {
            layer: to_i64(reward.layer, "layer")?,
            node_id: reward.node_id.clone(),
            coinbase: reward.coinbase.clone(),
            amount: to_i64(reward.amount, "reward amount")?,
            layer_reward: to_i64(reward.layer_reward, "layer reward")?,
            atx_id: reward.atx_id.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Insertable, AsChangeset, Queryable, Selectable)]
#[diesel(
    table_name = atxs,
    primary_key(atx_id),
    treat_none_as_null = true,
    check_for_backend(diesel::pg::Pg)
)]
pub(crate) struct AtxRow {
    pub atx_id: String,
    pub node_id: String,
    pub coinbase: String,
    pub base_tick: i64,
    pub tick_count: i64,
    pub effective_num_units: i64,
    pub weight: Option<i64>,
    pub epoch: i64,
}

impl TryFrom<&Atx> for AtxRow {
    type Error = StoreError;

    fn try_from(atx: &Atx) -> StoreResult<Self> {
        Ok(Self {
            atx_id: atx.atx_id.clone(),
            node_id: atx.node_id.clone(),
            coinbase: atx.coinbase.clone(),
            base_tick: to_i64(atx.base_tick, "base tick")?,
            tick_count: to_i64(atx.tick_count, "tick count")?,
            effective_num_units: to_i64(atx.effective_num_units, "effective units")?,
            weight: opt_i64(atx.weight, "weight")?,
            epoch: i64::from(atx.epoch),
        })
    }
}

impl TryFrom<AtxRow> for Atx {
    type Error = StoreError;

    fn try_from(row: AtxRow) -> StoreResult<Self> {
        Ok(Self {
            base_tick: to_u64(row.base_tick, "base tick")?,
            tick_count: to_u64(row.tick_count, "tick count")?,
            effective_num_units: to_u64(row.effective_num_units, "effective units")?,
            weight: row.weight.map(|w| to_u64(w, "weight")).transpose()?,
            epoch: EpochId::try_from(row.epoch)
                .map_err(|_| StoreError::Internal(format!("epoch {} out of range", row.epoch)))?,
            atx_id: row.atx_id,
            node_id: row.node_id,
            coinbase: row.coinbase,
        })
    }
}

/// Bind values for the transaction merge statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TransactionRow {
    pub id: String,
    pub principal: Option<String>,
    pub template: Option<String>,
    pub method: Option<i16>,
    pub nonce: Option<i64>,
    pub layer: Option<i64>,
    pub block: Option<String>,
    pub status: Option<i16>,
    pub message: Option<String>,
    pub fee: Option<i64>,
    pub raw: Option<String>,
}

impl TryFrom<&Transaction> for TransactionRow {
    type Error = StoreError;

    fn try_from(tx: &Transaction) -> StoreResult<Self> {
        Ok(Self {
            id: tx.id.clone(),
            principal: tx.principal.clone(),
            template: tx.template.clone(),
            method: tx.method.map(i16::from),
            nonce: opt_i64(tx.nonce, "nonce")?,
            layer: opt_i64(tx.layer, "layer")?,
            block: tx.block.clone(),
            status: tx.status.map(i16::from),
            message: tx.message.clone(),
            fee: opt_i64(tx.fee, "fee")?,
            raw: tx.raw.clone(),
        })
    }
}

#[derive(Debug, QueryableByName)]
pub(crate) struct CountRow {
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}

#[derive(Debug, QueryableByName)]
pub(crate) struct EpochTotalsRow {
    #[diesel(sql_type = BigInt)]
    pub total_weight: i64,
    #[diesel(sql_type = BigInt)]
    pub total_effective_num_units: i64,
}

#[derive(Debug, QueryableByName)]
pub(crate) struct SupplyRow {
    #[diesel(sql_type = BigInt)]
    pub circulating_supply: i64,
}
