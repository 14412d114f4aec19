// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use spacemesh_state_store::WriteStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::subject::{HandleError, SubjectKind};
use super::SinkSettings;
use crate::broker::{Delivery, PullSubscription};
use crate::metrics::IndexerMetrics;

/// What happened to one delivered message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Persisted and acknowledged
    Acked,
    /// Payload did not decode; redelivery requested
    DecodeRejected,
    /// Store write failed; redelivery requested
    PersistFailed,
    /// Shutdown requested before the ack; left for redelivery
    Abandoned,
}

/// Pull loop for a single subject
pub struct SubjectWorker<S: PullSubscription> {
    kind: SubjectKind,
    subscription: S,
    store: Arc<dyn WriteStore>,
    metrics: Arc<IndexerMetrics>,
    settings: SinkSettings,
}

impl<S: PullSubscription> SubjectWorker<S> {
    pub fn new(
        kind: SubjectKind,
        subscription: S,
        store: Arc<dyn WriteStore>,
        metrics: Arc<IndexerMetrics>,
        settings: SinkSettings,
    ) -> Self {
        Self {
            kind,
            subscription,
            store,
            metrics,
            settings,
        }
    }

    /// Fetch and process batches until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let subject = self.kind.subject();
        info!(
            "[Sink:{}] Started (batch_size={}, max_wait={:?})",
            subject, self.settings.batch_size, self.settings.max_wait
        );

        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                fetched = self
                    .subscription
                    .fetch(self.settings.batch_size, self.settings.max_wait) => fetched,
            };

            let messages = match fetched {
                Ok(messages) => messages,
                Err(e) => {
                    warn!("[Sink:{}] Fetch failed: {}", subject, e);
                    self.metrics
                        .sink_fetch_errors
                        .with_label_values(&[subject])
                        .inc();
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.fetch_error_backoff) => continue,
                    }
                }
            };

            if messages.is_empty() {
                debug!("[Sink:{}] No messages before wait expired", subject);
                continue;
            }
            self.metrics
                .sink_messages_fetched
                .with_label_values(&[subject])
                .inc_by(messages.len() as u64);

            for (index, message) in messages.iter().enumerate() {
                if cancel.is_cancelled() {
                    info!(
                        "[Sink:{}] Shutdown requested, leaving {} messages for redelivery",
                        subject,
                        messages.len() - index
                    );
                    break;
                }
                self.process_message(message, &cancel).await;
            }
        }

        info!("[Sink:{}] Stopped", subject);
    }

    /// Decode, persist and acknowledge one message
    pub async fn process_message(
        &self,
        message: &S::Message,
        cancel: &CancellationToken,
    ) -> MessageOutcome {
        let subject = self.kind.subject();

        let outcome = match self.kind.handle(message.payload(), self.store.as_ref()).await {
            Ok(()) if cancel.is_cancelled() => return MessageOutcome::Abandoned,
            Ok(()) => {
                if let Err(e) = message.ack().await {
                    // Persisted already; the redelivery is an idempotent rewrite
                    warn!("[Sink:{}] Failed to ack message: {}", subject, e);
                    self.metrics
                        .sink_ack_failures
                        .with_label_values(&[subject])
                        .inc();
                } else {
                    self.metrics
                        .sink_messages_acked
                        .with_label_values(&[subject])
                        .inc();
                }
                return MessageOutcome::Acked;
            }
            Err(HandleError::Decode(e)) => {
                error!(
                    "[Sink:{}] Rejecting undecodable message (attempt {:?}): {}",
                    subject,
                    message.delivery_attempt(),
                    e
                );
                debug!(
                    "[Sink:{}] Rejected payload: {}",
                    subject,
                    String::from_utf8_lossy(message.payload())
                );
                self.metrics
                    .sink_decode_failures
                    .with_label_values(&[subject])
                    .inc();
                MessageOutcome::DecodeRejected
            }
            Err(HandleError::Persist(e)) => {
                error!(
                    "[Sink:{}] Failed to persist message ({}): {}",
                    subject,
                    e.error_type(),
                    e
                );
                self.metrics
                    .sink_persist_failures
                    .with_label_values(&[subject])
                    .inc();
                MessageOutcome::PersistFailed
            }
        };

        if let Err(e) = message.nak().await {
            // The broker redelivers after its ack wait either way
            warn!("[Sink:{}] Failed to nak message: {}", subject, e);
            self.metrics
                .sink_ack_failures
                .with_label_values(&[subject])
                .inc();
        } else {
            self.metrics
                .sink_messages_nacked
                .with_label_values(&[subject])
                .inc();
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerError;
    use async_trait::async_trait;
    use spacemesh_state_store::{MemoryStore, ReadStore, StoreError, StoreResult};
    use spacemesh_state_types::{Atx, LayerUpdate, MalfeasanceNode, Reward, Transaction};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Signal {
        Pending,
        Acked,
        Nacked,
    }

    struct FakeMessage {
        payload: Vec<u8>,
        signal: Arc<Mutex<Signal>>,
    }

    impl FakeMessage {
        fn new(payload: &str) -> (Self, Arc<Mutex<Signal>>) {
            let signal = Arc::new(Mutex::new(Signal::Pending));
            (
                Self {
                    payload: payload.as_bytes().to_vec(),
                    signal: signal.clone(),
                },
                signal,
            )
        }
    }

    #[async_trait]
    impl Delivery for FakeMessage {
        fn payload(&self) -> &[u8] {
            &self.payload
        }

        async fn ack(&self) -> Result<(), BrokerError> {
            *self.signal.lock().unwrap() = Signal::Acked;
            Ok(())
        }

        async fn nak(&self) -> Result<(), BrokerError> {
            *self.signal.lock().unwrap() = Signal::Nacked;
            Ok(())
        }
    }

    /// Serves queued batches, then cancels `drained` and returns empty batches
    ///
    /// When `cancel_on_fetch` is set it fires while a batch is being handed out.
    struct FakeSubscription {
        batches: Mutex<VecDeque<Result<Vec<FakeMessage>, BrokerError>>>,
        drained: CancellationToken,
        cancel_on_fetch: Option<CancellationToken>,
    }

    #[async_trait]
    impl PullSubscription for FakeSubscription {
        type Message = FakeMessage;

        async fn fetch(
            &self,
            _max_messages: usize,
            _max_wait: Duration,
        ) -> Result<Vec<FakeMessage>, BrokerError> {
            let next = self.batches.lock().unwrap().pop_front();
            match next {
                Some(batch) => {
                    if let Some(cancel) = &self.cancel_on_fetch {
                        cancel.cancel();
                    }
                    batch
                }
                None => {
                    self.drained.cancel();
                    Ok(vec![])
                }
            }
        }
    }

    /// Fails the first `failures` layer writes, then delegates
    struct FlakyStore {
        inner: MemoryStore,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl WriteStore for FlakyStore {
        async fn save_layer(&self, layer: &LayerUpdate) -> StoreResult<()> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.save_layer(layer).await
        }

        async fn save_reward(&self, reward: &Reward) -> StoreResult<()> {
            self.inner.save_reward(reward).await
        }

        async fn save_atx(&self, atx: &Atx) -> StoreResult<()> {
            self.inner.save_atx(atx).await
        }

        async fn save_transaction(&self, transaction: &Transaction) -> StoreResult<()> {
            self.inner.save_transaction(transaction).await
        }

        async fn save_malfeasance_node(&self, node: &MalfeasanceNode) -> StoreResult<()> {
            self.inner.save_malfeasance_node(node).await
        }
    }

    fn settings() -> SinkSettings {
        SinkSettings {
            batch_size: 10,
            max_wait: Duration::from_millis(10),
            fetch_error_backoff: Duration::from_millis(1),
        }
    }

    fn worker(
        kind: SubjectKind,
        batches: Vec<Result<Vec<FakeMessage>, BrokerError>>,
        store: Arc<dyn WriteStore>,
        drained: CancellationToken,
    ) -> SubjectWorker<FakeSubscription> {
        SubjectWorker::new(
            kind,
            FakeSubscription {
                batches: Mutex::new(batches.into()),
                drained,
                cancel_on_fetch: None,
            },
            store,
            IndexerMetrics::new_for_testing(),
            settings(),
        )
    }

    #[tokio::test]
    async fn test_malformed_message_nacked_and_next_processed() {
        let store = MemoryStore::new();
        let (bad, bad_signal) = FakeMessage::new("{oops");
        let (good, good_signal) = FakeMessage::new(r#"{"layerID": 7, "status": 2}"#);
        let cancel = CancellationToken::new();

        let worker = worker(
            SubjectKind::Layers,
            vec![Ok(vec![bad, good])],
            Arc::new(store.clone()),
            cancel.clone(),
        );
        let metrics = worker.metrics.clone();
        worker.run(cancel).await;

        assert_eq!(*bad_signal.lock().unwrap(), Signal::Nacked);
        assert_eq!(*good_signal.lock().unwrap(), Signal::Acked);
        assert_eq!(store.last_processed_layer().await.unwrap().layer, 7);
        assert_eq!(
            metrics
                .sink_decode_failures
                .with_label_values(&["layers"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .sink_messages_acked
                .with_label_values(&["layers"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_persist_failure_nacked_then_redelivery_succeeds() {
        let memory = MemoryStore::new();
        let store = Arc::new(FlakyStore {
            inner: memory.clone(),
            failures: AtomicUsize::new(1),
        });
        let (first, first_signal) = FakeMessage::new(r#"{"layerID": 9}"#);
        let (redelivered, redelivered_signal) = FakeMessage::new(r#"{"layerID": 9}"#);
        let cancel = CancellationToken::new();

        let worker = worker(
            SubjectKind::Layers,
            vec![Ok(vec![first]), Ok(vec![redelivered])],
            store,
            cancel.clone(),
        );
        worker.run(cancel).await;

        assert_eq!(*first_signal.lock().unwrap(), Signal::Nacked);
        assert_eq!(*redelivered_signal.lock().unwrap(), Signal::Acked);
        assert_eq!(memory.layer_count().await, 1);
    }

    #[tokio::test]
    async fn test_fetch_error_does_not_stop_worker() {
        let store = MemoryStore::new();
        let (message, signal) = FakeMessage::new(
            r#"{"layer": 3, "nodeID": "n1", "coinbase": "sm1", "amount": 10}"#,
        );
        let cancel = CancellationToken::new();

        let worker = worker(
            SubjectKind::Rewards,
            vec![
                Err(BrokerError::Fetch("timeout".to_string())),
                Ok(vec![message]),
            ],
            Arc::new(store.clone()),
            cancel.clone(),
        );
        let metrics = worker.metrics.clone();
        worker.run(cancel).await;

        assert_eq!(*signal.lock().unwrap(), Signal::Acked);
        assert_eq!(store.reward_count().await, 1);
        assert_eq!(
            metrics
                .sink_fetch_errors
                .with_label_values(&["rewards"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_no_ack_after_cancel() {
        let store = MemoryStore::new();
        let (message, signal) = FakeMessage::new(r#"{"layerID": 11}"#);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let worker = worker(
            SubjectKind::Layers,
            vec![],
            Arc::new(store.clone()),
            CancellationToken::new(),
        );
        let outcome = worker.process_message(&message, &cancel).await;

        assert_eq!(outcome, MessageOutcome::Abandoned);
        assert_eq!(*signal.lock().unwrap(), Signal::Pending);
    }

    #[tokio::test]
    async fn test_cancelled_worker_leaves_batch_untouched() {
        let store = MemoryStore::new();
        let (message, signal) = FakeMessage::new(r#"{"layerID": 12}"#);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let worker = worker(
            SubjectKind::Layers,
            vec![Ok(vec![message])],
            Arc::new(store.clone()),
            CancellationToken::new(),
        );
        worker.run(cancel).await;

        assert_eq!(*signal.lock().unwrap(), Signal::Pending);
        assert!(store.last_processed_layer().await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_during_fetch_leaves_fetched_batch_for_redelivery() {
        let store = MemoryStore::new();
        let (first, first_signal) = FakeMessage::new(r#"{"layerID": 13}"#);
        let (second, second_signal) = FakeMessage::new(r#"{"layerID": 14}"#);
        let cancel = CancellationToken::new();

        let worker = SubjectWorker::new(
            SubjectKind::Layers,
            FakeSubscription {
                batches: Mutex::new(vec![Ok(vec![first, second])].into()),
                drained: CancellationToken::new(),
                cancel_on_fetch: Some(cancel.clone()),
            },
            Arc::new(store.clone()),
            IndexerMetrics::new_for_testing(),
            settings(),
        );
        let metrics = worker.metrics.clone();
        worker.run(cancel).await;

        assert_eq!(*first_signal.lock().unwrap(), Signal::Pending);
        assert_eq!(*second_signal.lock().unwrap(), Signal::Pending);
        assert_eq!(
            metrics
                .sink_messages_fetched
                .with_label_values(&["layers"])
                .get(),
            2
        );
        assert_eq!(
            metrics
                .sink_messages_acked
                .with_label_values(&["layers"])
                .get(),
            0
        );
        assert!(store.last_processed_layer().await.is_err());
    }

    #[tokio::test]
    async fn test_transaction_halves_from_both_subjects() {
        let store = MemoryStore::new();
        let shared: Arc<dyn WriteStore> = Arc::new(store.clone());
        let (created, _) = FakeMessage::new(r#"{"id": "t1", "principal": "sm1"}"#);
        let (result, _) = FakeMessage::new(r#"{"id": "t1", "layer": 40, "fee": 5}"#);
        let cancel = CancellationToken::new();

        let created_worker = worker(
            SubjectKind::TransactionsCreated,
            vec![],
            shared.clone(),
            CancellationToken::new(),
        );
        let result_worker = worker(
            SubjectKind::TransactionsResult,
            vec![],
            shared,
            CancellationToken::new(),
        );
        assert_eq!(
            result_worker.process_message(&result, &cancel).await,
            MessageOutcome::Acked
        );
        assert_eq!(
            created_worker.process_message(&created, &cancel).await,
            MessageOutcome::Acked
        );

        let tx = store.transaction("t1").await.unwrap();
        assert_eq!(tx.principal.as_deref(), Some("sm1"));
        assert_eq!(tx.layer, Some(40));
        assert_eq!(tx.fee, Some(5));
    }
}
