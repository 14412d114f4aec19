// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! NATS JetStream adapter

use std::time::Duration;

use async_nats::jetstream::consumer::pull;
use async_nats::jetstream::consumer::{AckPolicy, PullConsumer};
use async_nats::jetstream::{self, AckKind};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{info, warn};

use super::{BrokerError, ConsumerBinding, ConsumerSettings, DeliverPolicy, Delivery, PullSubscription};

impl From<DeliverPolicy> for jetstream::consumer::DeliverPolicy {
    fn from(policy: DeliverPolicy) -> Self {
        match policy {
            DeliverPolicy::All => jetstream::consumer::DeliverPolicy::All,
            DeliverPolicy::Last => jetstream::consumer::DeliverPolicy::Last,
            DeliverPolicy::New => jetstream::consumer::DeliverPolicy::New,
        }
    }
}

/// Connected JetStream context
#[derive(Clone)]
pub struct JetStreamBroker {
    context: jetstream::Context,
}

impl JetStreamBroker {
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BrokerError::Connect(format!("{}: {}", url, e)))?;
        info!("[Broker] Connected to NATS at {}", url);
        Ok(Self {
            context: jetstream::new(client),
        })
    }

    /// Ensure the durable group exists and bind a pull subscription to it
    ///
    /// Binding to a group that already exists is not an error, so every
    /// instance can run this at startup.
    pub async fn bind(
        &self,
        binding: &ConsumerBinding,
        settings: ConsumerSettings,
    ) -> Result<JetStreamSubscription, BrokerError> {
        let bootstrap_err = |reason: String| BrokerError::Bootstrap {
            durable: binding.durable.clone(),
            reason,
        };

        let stream = self
            .context
            .get_stream(&binding.stream)
            .await
            .map_err(|e| bootstrap_err(format!("stream {}: {}", binding.stream, e)))?;

        let consumer: PullConsumer = stream
            .get_or_create_consumer(
                &binding.durable,
                pull::Config {
                    durable_name: Some(binding.durable.clone()),
                    filter_subject: binding.subject.clone(),
                    ack_policy: AckPolicy::Explicit,
                    deliver_policy: settings.deliver_policy.into(),
                    max_deliver: settings.max_deliver,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| bootstrap_err(e.to_string()))?;

        info!(
            "[Broker] Bound durable group {} (stream={}, subject={})",
            binding.durable, binding.stream, binding.subject
        );

        Ok(JetStreamSubscription {
            binding: binding.clone(),
            consumer,
        })
    }
}

/// Pull subscription on a JetStream durable consumer
pub struct JetStreamSubscription {
    binding: ConsumerBinding,
    consumer: PullConsumer,
}

impl JetStreamSubscription {
    pub fn binding(&self) -> &ConsumerBinding {
        &self.binding
    }
}

#[async_trait]
impl PullSubscription for JetStreamSubscription {
    type Message = JetStreamMessage;

    async fn fetch(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<JetStreamMessage>, BrokerError> {
        let batch = self
            .consumer
            .batch()
            .max_messages(max_messages)
            .expires(max_wait)
            .messages()
            .await
            .map_err(|e| BrokerError::Fetch(e.to_string()))?;
        let mut batch = Box::pin(batch);

        let mut messages = Vec::with_capacity(max_messages);
        while let Some(next) = batch.next().await {
            match next {
                Ok(message) => messages.push(JetStreamMessage(message)),
                Err(e) if messages.is_empty() => return Err(BrokerError::Fetch(e.to_string())),
                Err(e) => {
                    // Keep what was delivered; the rest comes with the next pull
                    warn!(
                        "[Broker] Batch on {} ended early after {} messages: {}",
                        self.binding.durable,
                        messages.len(),
                        e
                    );
                    break;
                }
            }
        }
        Ok(messages)
    }
}

/// Message delivered by a JetStream pull consumer
pub struct JetStreamMessage(jetstream::Message);

#[async_trait]
impl Delivery for JetStreamMessage {
    fn payload(&self) -> &[u8] {
        &self.0.payload
    }

    fn delivery_attempt(&self) -> Option<u64> {
        self.0
            .info()
            .ok()
            .and_then(|info| u64::try_from(info.delivered).ok())
    }

    async fn ack(&self) -> Result<(), BrokerError> {
        self.0
            .ack()
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }

    async fn nak(&self) -> Result<(), BrokerError> {
        self.0
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }
}
