// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Durable Postgres storage engine
//!
//! Tables are created by the embedded migrations; call
//! [`PgStore::run_migrations`] once at startup before serving either port.
//! Every write is an `INSERT .. ON CONFLICT` keyed by the fact's natural key.

use std::time::Duration;

use async_trait::async_trait;
use diesel::dsl::max;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::{BigInt, Int2, Nullable, Text};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations};
use spacemesh_state_types::{
    Atx, AtxEpochTotals, EpochId, Layer, LayerUpdate, MalfeasanceNode, NetworkSupply, Reward,
    Transaction,
};
use tracing::{debug, info};

use crate::{ReadStore, StoreError, StoreResult, WriteStore};

mod models;
pub mod schema;

use models::{
    to_u64, AtxRow, CountRow, EpochTotalsRow, LayerRow, RewardRow, SupplyRow, TransactionRow,
};
use schema::{atxs, layers, malfeasance_nodes, rewards};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

// Sums are computed as NUMERIC and clamped to BIGINT.
const EPOCH_TOTALS_SQL: &str = "
    SELECT
        LEAST(COALESCE(SUM(COALESCE(weight::NUMERIC, effective_num_units::NUMERIC * tick_count)), 0),
              9223372036854775807)::BIGINT AS total_weight,
        LEAST(COALESCE(SUM(effective_num_units::NUMERIC), 0),
              9223372036854775807)::BIGINT AS total_effective_num_units
    FROM atxs
    WHERE epoch = $1";

const SUPPLY_SQL: &str = "
    SELECT LEAST(COALESCE(SUM(amount::NUMERIC), 0), 9223372036854775807)::BIGINT
        AS circulating_supply
    FROM rewards";

const COUNT_ACCOUNTS_SQL: &str = "
    SELECT COUNT(*)::BIGINT AS count FROM (
        SELECT coinbase AS account FROM rewards WHERE coinbase <> ''
        UNION
        SELECT principal FROM transactions WHERE principal IS NOT NULL AND principal <> ''
    ) accounts";

const COUNT_ATX_EPOCH_SQL: &str =
    "SELECT COUNT(DISTINCT node_id)::BIGINT AS count FROM atxs WHERE epoch = $1";

// Fields absent from the incoming half keep their stored value.
const MERGE_TRANSACTION_SQL: &str = "
    INSERT INTO transactions
        (id, principal, template, method, nonce, layer, block, status, message, fee, raw)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
    ON CONFLICT (id) DO UPDATE SET
        principal = COALESCE(EXCLUDED.principal, transactions.principal),
        template = COALESCE(EXCLUDED.template, transactions.template),
        method = COALESCE(EXCLUDED.method, transactions.method),
        nonce = COALESCE(EXCLUDED.nonce, transactions.nonce),
        layer = COALESCE(EXCLUDED.layer, transactions.layer),
        block = COALESCE(EXCLUDED.block, transactions.block),
        status = COALESCE(EXCLUDED.status, transactions.status),
        message = COALESCE(EXCLUDED.message, transactions.message),
        fee = COALESCE(EXCLUDED.fee, transactions.fee),
        raw = COALESCE(EXCLUDED.raw, transactions.raw)";

/// Connection pool settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgStoreArgs {
    /// Number of connections to keep in the pool
    pub pool_size: u32,
    /// Time spent waiting for a pooled connection
    pub connection_timeout: Duration,
}

impl Default for PgStoreArgs {
    fn default() -> Self {
        Self {
            pool_size: 10,
            connection_timeout: Duration::from_secs(60),
        }
    }
}

/// Storage engine backed by a Postgres connection pool
///
/// Clones share the same pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool<AsyncPgConnection>,
    database_url: String,
}

impl PgStore {
    pub async fn connect(database_url: &str, args: PgStoreArgs) -> StoreResult<Self> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(args.pool_size)
            .connection_timeout(args.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| StoreError::Unavailable(format!("failed to build pool: {}", e)))?;
        info!(
            "[PgStore] Connection pool ready (max_size={})",
            args.pool_size
        );
        Ok(Self {
            pool,
            database_url: database_url.to_string(),
        })
    }

    /// Apply pending embedded migrations, returning the versions applied
    pub async fn run_migrations(&self) -> StoreResult<Vec<String>> {
        use diesel_migrations::MigrationHarness;

        info!("[PgStore] Running migrations ...");
        let conn = AsyncPgConnection::establish(&self.database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration connection: {}", e)))?;
        let mut wrapper: AsyncConnectionWrapper<AsyncPgConnection> = conn.into();

        let applied = tokio::task::spawn_blocking(move || {
            wrapper
                .run_pending_migrations(MIGRATIONS)
                .map(|versions| versions.iter().map(ToString::to_string).collect::<Vec<_>>())
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| StoreError::Internal(format!("migration task failed: {}", e)))?
        .map_err(|e| StoreError::Internal(format!("failed to run migrations: {}", e)))?;

        info!("[PgStore] Migrations complete ({} applied)", applied.len());
        Ok(applied)
    }

    async fn conn(&self) -> StoreResult<PooledConnection<'_, AsyncPgConnection>> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn db_error(e: DieselError) -> StoreError {
    match e {
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
            StoreError::Unavailable(info.message().to_string())
        }
        DieselError::NotFound => StoreError::NotFound("row".to_string()),
        other => StoreError::Internal(other.to_string()),
    }
}

#[async_trait]
impl WriteStore for PgStore {
    async fn save_layer(&self, layer: &LayerUpdate) -> StoreResult<()> {
        let row = LayerRow::try_from(layer)?;
        let mut conn = self.conn().await?;
        diesel::insert_into(layers::table)
            .values(&row)
            .on_conflict(layers::layer_id)
            .do_nothing()
            .execute(&mut conn)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn save_reward(&self, reward: &Reward) -> StoreResult<()> {
        let row = RewardRow::try_from(reward)?;
        let mut conn = self.conn().await?;
        diesel::insert_into(rewards::table)
            .values(&row)
            .on_conflict((rewards::layer, rewards::node_id))
            .do_update()
            .set(&row)
            .execute(&mut conn)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn save_atx(&self, atx: &Atx) -> StoreResult<()> {
        if atx.atx_id.is_empty() {
            return Err(StoreError::Internal("ATX without identifier".to_string()));
        }
        let row = AtxRow::try_from(atx)?;
        let mut conn = self.conn().await?;
        diesel::insert_into(atxs::table)
            .values(&row)
            .on_conflict(atxs::atx_id)
            .do_update()
            .set(&row)
            .execute(&mut conn)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn save_transaction(&self, transaction: &Transaction) -> StoreResult<()> {
        if transaction.id.is_empty() {
            return Err(StoreError::Internal(
                "Transaction without identifier".to_string(),
            ));
        }
        let row = TransactionRow::try_from(transaction)?;
        let mut conn = self.conn().await?;
        diesel::sql_query(MERGE_TRANSACTION_SQL)
            .bind::<Text, _>(row.id)
            .bind::<Nullable<Text>, _>(row.principal)
            .bind::<Nullable<Text>, _>(row.template)
            .bind::<Nullable<Int2>, _>(row.method)
            .bind::<Nullable<BigInt>, _>(row.nonce)
            .bind::<Nullable<BigInt>, _>(row.layer)
            .bind::<Nullable<Text>, _>(row.block)
            .bind::<Nullable<Int2>, _>(row.status)
            .bind::<Nullable<Text>, _>(row.message)
            .bind::<Nullable<BigInt>, _>(row.fee)
            .bind::<Nullable<Text>, _>(row.raw)
            .execute(&mut conn)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn save_malfeasance_node(&self, node: &MalfeasanceNode) -> StoreResult<()> {
        if node.id.is_empty() {
            return Err(StoreError::Internal(
                "Malfeasance proof without node identifier".to_string(),
            ));
        }
        let mut conn = self.conn().await?;
        let inserted = diesel::insert_into(malfeasance_nodes::table)
            .values(malfeasance_nodes::node_id.eq(&node.id))
            .on_conflict(malfeasance_nodes::node_id)
            .do_nothing()
            .execute(&mut conn)
            .await
            .map_err(db_error)?;
        if inserted > 0 {
            debug!("[PgStore] Node {} flagged as malfeasant", node.id);
        }
        Ok(())
    }
}

#[async_trait]
impl ReadStore for PgStore {
    async fn last_processed_layer(&self) -> StoreResult<Layer> {
        let mut conn = self.conn().await?;
        let last: Option<i64> = layers::table
            .select(max(layers::layer_id))
            .first(&mut conn)
            .await
            .map_err(db_error)?;
        match last {
            Some(layer) => Ok(Layer {
                layer: to_u64(layer, "layer")?,
            }),
            None => Err(StoreError::NotFound("no layer processed yet".to_string())),
        }
    }

    async fn count_atx_epoch(&self, epoch: EpochId) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let row: CountRow = diesel::sql_query(COUNT_ATX_EPOCH_SQL)
            .bind::<BigInt, _>(i64::from(epoch))
            .get_result(&mut conn)
            .await
            .map_err(db_error)?;
        to_u64(row.count, "smesher count")
    }

    async fn atx_epoch_totals(&self, epoch: EpochId) -> StoreResult<AtxEpochTotals> {
        let mut conn = self.conn().await?;
        let row: EpochTotalsRow = diesel::sql_query(EPOCH_TOTALS_SQL)
            .bind::<BigInt, _>(i64::from(epoch))
            .get_result(&mut conn)
            .await
            .map_err(db_error)?;
        Ok(AtxEpochTotals {
            total_weight: to_u64(row.total_weight, "total weight")?,
            total_effective_num_units: to_u64(row.total_effective_num_units, "effective units")?,
        })
    }

    async fn atxs_for_epoch(&self, epoch: EpochId) -> StoreResult<Vec<Atx>> {
        let mut conn = self.conn().await?;
        let rows: Vec<AtxRow> = atxs::table
            .filter(atxs::epoch.eq(i64::from(epoch)))
            .order(atxs::atx_id.asc())
            .select(AtxRow::as_select())
            .load(&mut conn)
            .await
            .map_err(db_error)?;
        rows.into_iter().map(Atx::try_from).collect()
    }

    async fn malfeasance_nodes(&self) -> StoreResult<Vec<MalfeasanceNode>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = malfeasance_nodes::table
            .select(malfeasance_nodes::node_id)
            .order(malfeasance_nodes::node_id.asc())
            .load(&mut conn)
            .await
            .map_err(db_error)?;
        Ok(ids.into_iter().map(|id| MalfeasanceNode { id }).collect())
    }

    async fn count_accounts(&self) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let row: CountRow = diesel::sql_query(COUNT_ACCOUNTS_SQL)
            .get_result(&mut conn)
            .await
            .map_err(db_error)?;
        to_u64(row.count, "account count")
    }

    async fn network_info(&self) -> StoreResult<NetworkSupply> {
        let mut conn = self.conn().await?;
        let row: SupplyRow = diesel::sql_query(SUPPLY_SQL)
            .get_result(&mut conn)
            .await
            .map_err(db_error)?;
        Ok(NetworkSupply {
            circulating_supply: to_u64(row.circulating_supply, "circulating supply")?,
        })
    }
}
