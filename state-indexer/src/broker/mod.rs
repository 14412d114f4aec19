// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Broker transport
//!
//! The sink only needs three things from a broker: pull a bounded batch with
//! a long-poll timeout, acknowledge a message, and ask for redelivery of a
//! message. Those are the [`PullSubscription`] and [`Delivery`] traits.
//!
//! ```text
//! ┌──────────────────┐   fetch(batch, max_wait)   ┌──────────────────┐
//! │ durable group    │ ─────────────────────────▶ │  subject worker  │
//! │ (JetStream pull  │ ◀───────── ack / nak ───── │                  │
//! │  consumer)       │                            └──────────────────┘
//! └──────────────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod jetstream;

pub use jetstream::{JetStreamBroker, JetStreamMessage, JetStreamSubscription};

/// Errors raised by the broker transport
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Failed to connect to broker: {0}")]
    Connect(String),

    #[error("Failed to bootstrap durable group {durable}: {reason}")]
    Bootstrap { durable: String, reason: String },

    #[error("Failed to fetch batch: {0}")]
    Fetch(String),

    #[error("Failed to signal broker: {0}")]
    Ack(String),
}

/// Where a durable group starts delivering when it is first created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliverPolicy {
    All,
    #[default]
    Last,
    New,
}

/// Identity of one durable delivery group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerBinding {
    /// Stream holding the subject
    pub stream: String,
    /// Subject the group is filtered to
    pub subject: String,
    /// Durable group name shared by competing instances
    pub durable: String,
}

/// Delivery settings applied when a durable group is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub deliver_policy: DeliverPolicy,
    /// Delivery attempts before the broker gives up on a message
    pub max_deliver: i64,
}

/// A delivered message awaiting acknowledgment
#[async_trait]
pub trait Delivery: Send + Sync {
    fn payload(&self) -> &[u8];

    /// Delivery attempt number, when the broker reports it
    fn delivery_attempt(&self) -> Option<u64> {
        None
    }

    /// Remove the message from the group's outstanding set
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Request broker-scheduled redelivery
    async fn nak(&self) -> Result<(), BrokerError>;
}

/// Pull-style subscription bound to one durable group
#[async_trait]
pub trait PullSubscription: Send + Sync {
    type Message: Delivery + 'static;

    /// Wait up to `max_wait` for at most `max_messages` messages.
    ///
    /// An expired wait returns an empty batch, not an error.
    async fn fetch(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<Self::Message>, BrokerError>;
}
