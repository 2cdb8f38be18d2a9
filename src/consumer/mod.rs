//! Bus intake.
//!
//! Subscribes to the alert topic as part of a consumer group, decodes and
//! validates each message, deduplicates by logical alert identity and
//! timestamp, and enqueues dispatch tasks. Offsets are committed after the
//! enqueue returns: semantics are at-least-once, and the store's
//! alert-id-keyed upsert absorbs redelivery after a crash or rebalance.

mod dedup;

pub use dedup::DedupTable;

use std::time::Duration;

use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::{ClientConfig, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BusConfig;
use crate::dispatch::DispatcherHandle;
use crate::models::{AlertEvent, DispatchTask};
use crate::store::SharedStore;

/// Backoff after a group-rebalance error.
const REBALANCE_BACKOFF: Duration = Duration::from_secs(5);

/// Backoff after any other fetch error.
const FETCH_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

/// Consumer-group subscriber feeding the dispatcher.
pub struct EventConsumer {
    consumer: StreamConsumer,
    dispatcher: DispatcherHandle,
    store: SharedStore,
    topic: String,
    dedup: DedupTable,
}

impl EventConsumer {
    pub fn new(
        config: &BusConfig,
        dispatcher: DispatcherHandle,
        store: SharedStore,
    ) -> Result<Self, ConsumerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            // First join starts at the newest offset; history is not replayed.
            .set("auto.offset.reset", "latest")
            .create()?;

        consumer.subscribe(&[config.topic.as_str()])?;

        Ok(Self {
            consumer,
            dispatcher,
            store,
            topic: config.topic.clone(),
            dedup: DedupTable::new(),
        })
    }

    /// Consume until cancellation.
    pub async fn run(self, cancel: CancellationToken) {
        info!(topic = %self.topic, "consumer started");

        let mut stream = self.consumer.stream();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("consumer shutting down");
                    break;
                }

                next = stream.next() => {
                    match next {
                        Some(Ok(message)) => {
                            self.process(&message).await;
                        }
                        Some(Err(e)) => {
                            let backoff = Self::backoff_for(&e);
                            warn!(error = %e, backoff_secs = backoff.as_secs(), "fetch failed, backing off");
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(backoff) => {}
                            }
                        }
                        None => {
                            info!("message stream closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Handle one message: every branch acknowledges the offset. Poison
    /// messages, duplicates and dropped enqueues are all committed; only
    /// delivery state in the store distinguishes them afterwards.
    async fn process(&self, message: &rdkafka::message::BorrowedMessage<'_>) {
        let Some(payload) = message.payload() else {
            debug!(offset = message.offset(), "empty payload, acknowledging");
            self.ack(message);
            return;
        };

        let event: AlertEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                error!(offset = message.offset(), error = %e, "undecodable message, dropping");
                self.ack(message);
                return;
            }
        };

        if let Err(reason) = event.validate() {
            error!(offset = message.offset(), reason = %reason, "invalid message, dropping");
            self.ack(message);
            return;
        }

        let alert_id = match Uuid::parse_str(&event.alert_id) {
            Ok(id) => id,
            Err(e) => {
                error!(alert_id = %event.alert_id, error = %e, "malformed alert id, dropping");
                self.ack(message);
                return;
            }
        };

        if !self.dedup.observe(alert_id, event.timestamp) {
            debug!(
                alert_id = %alert_id,
                timestamp = %event.timestamp,
                "stale or duplicate event, acknowledging"
            );
            self.ack(message);
            return;
        }

        let task = DispatchTask::from_event(&event, &self.topic);

        // Audit history is best effort; a storage hiccup must not stall the
        // partition.
        if let Err(e) = self.store.create_alert(&task).await {
            warn!(alert_id = %alert_id, error = %e, "failed to record alert history");
        }

        self.dispatcher.queue_task(task);
        self.ack(message);
    }

    fn ack(&self, message: &rdkafka::message::BorrowedMessage<'_>) {
        if let Err(e) = self.consumer.commit_message(message, CommitMode::Async) {
            warn!(offset = message.offset(), error = %e, "offset commit failed");
        }
    }

    fn backoff_for(error: &KafkaError) -> Duration {
        if matches!(
            error,
            KafkaError::MessageConsumption(RDKafkaErrorCode::RebalanceInProgress)
        ) {
            REBALANCE_BACKOFF
        } else {
            FETCH_BACKOFF
        }
    }
}
