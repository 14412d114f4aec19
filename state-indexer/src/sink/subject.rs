// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Subject catalogue: names, durable groups, decoders and persistence calls

use serde::de::DeserializeOwned;
use spacemesh_state_store::{StoreError, WriteStore};
use spacemesh_state_types::{Atx, LayerUpdate, Reward, Transaction};
use thiserror::Error;

use crate::broker::ConsumerBinding;

/// Payload that does not decode into the subject's fact type
#[derive(Debug, Error)]
#[error("Failed to decode {subject} payload: {source}")]
pub struct DecodeError {
    pub subject: &'static str,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Debug, Error)]
pub enum HandleError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Failed to persist fact: {0}")]
    Persist(#[from] StoreError),
}

/// One ledger-event subject published by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectKind {
    Layers,
    Rewards,
    Atx,
    TransactionsCreated,
    TransactionsResult,
}

impl SubjectKind {
    pub const ALL: [SubjectKind; 5] = [
        SubjectKind::Layers,
        SubjectKind::Rewards,
        SubjectKind::Atx,
        SubjectKind::TransactionsCreated,
        SubjectKind::TransactionsResult,
    ];

    /// Subject the facts are published on
    pub fn subject(&self) -> &'static str {
        match self {
            SubjectKind::Layers => "layers",
            SubjectKind::Rewards => "rewards",
            SubjectKind::Atx => "atx",
            SubjectKind::TransactionsCreated => "transactions.created",
            SubjectKind::TransactionsResult => "transactions.result",
        }
    }

    /// Stream storing the subject; both transaction subjects share one
    pub fn stream(&self) -> &'static str {
        match self {
            SubjectKind::Layers => "layers",
            SubjectKind::Rewards => "rewards",
            SubjectKind::Atx => "atx",
            SubjectKind::TransactionsCreated | SubjectKind::TransactionsResult => "transactions",
        }
    }

    fn durable_suffix(&self) -> &'static str {
        match self {
            SubjectKind::Layers => "layers",
            SubjectKind::Rewards => "rewards",
            SubjectKind::Atx => "atx",
            SubjectKind::TransactionsCreated => "transactions-created",
            SubjectKind::TransactionsResult => "transactions-result",
        }
    }

    /// Durable group for this subject under `group_prefix`
    ///
    /// Every subject gets its own group name so subjects never compete with
    /// each other, while instances sharing a prefix load-balance a subject.
    pub fn binding(&self, group_prefix: &str) -> ConsumerBinding {
        ConsumerBinding {
            stream: self.stream().to_string(),
            subject: self.subject().to_string(),
            durable: format!("{}-{}", group_prefix, self.durable_suffix()),
        }
    }

    /// Decode `payload` into this subject's fact and persist it
    pub async fn handle(&self, payload: &[u8], store: &dyn WriteStore) -> Result<(), HandleError> {
        match self {
            SubjectKind::Layers => {
                let layer: LayerUpdate = self.decode(payload)?;
                store.save_layer(&layer).await?;
            }
            SubjectKind::Rewards => {
                let reward: Reward = self.decode(payload)?;
                store.save_reward(&reward).await?;
            }
            SubjectKind::Atx => {
                let atx: Atx = self.decode(payload)?;
                store.save_atx(&atx).await?;
            }
            SubjectKind::TransactionsCreated | SubjectKind::TransactionsResult => {
                let transaction: Transaction = self.decode(payload)?;
                store.save_transaction(&transaction).await?;
            }
        }
        Ok(())
    }

    fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, DecodeError> {
        serde_json::from_slice(payload).map_err(|source| DecodeError {
            subject: self.subject(),
            source,
        })
    }
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.subject())
    }
}
