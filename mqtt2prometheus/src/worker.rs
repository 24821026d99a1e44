//! Ingestion worker turning broker messages into samples.

use std::time::Instant;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::normalize::{Ignored, Reading, classify};
use crate::store::SharedStore;

/// A message delivered by the broker.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Bytes,
    /// Set when the broker replays a stored value.
    pub retained: bool,
}

impl BrokerMessage {
    /// Create a live (non-retained) message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained: false,
        }
    }

    /// Mark the message as a retained replay.
    pub fn retained(mut self) -> Self {
        self.retained = true;
        self
    }
}

/// Sender half used by the broker subscriber.
pub type MessageSender = mpsc::UnboundedSender<BrokerMessage>;

/// Receiver half consumed by the worker.
pub type MessageReceiver = mpsc::UnboundedReceiver<BrokerMessage>;

/// Create the channel between subscriber and worker.
pub fn message_channel() -> (MessageSender, MessageReceiver) {
    mpsc::unbounded_channel()
}

/// Ingestion statistics.
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    /// Total messages received.
    pub messages_received: u64,
    /// Messages that produced a sample.
    pub samples_accepted: u64,
    /// Retained replays skipped.
    pub ignored_retained: u64,
    /// Payloads that were not valid UTF-8.
    pub ignored_invalid_utf8: u64,
    /// JSON payloads skipped.
    pub ignored_structured: u64,
    /// Payloads that were neither a token nor a number.
    pub ignored_unparseable: u64,
}

/// Applies the normalizer to each message and writes accepted values.
pub struct IngestWorker {
    store: SharedStore,
    stats: RwLock<IngestStats>,
}

impl IngestWorker {
    /// Create a new worker writing into `store`.
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            stats: RwLock::new(IngestStats::default()),
        }
    }

    /// Process a single message.
    pub fn handle(&self, msg: &BrokerMessage, now: Instant) -> Reading {
        let reading = classify(&msg.payload, msg.retained);

        let mut stats = self.stats.write();
        stats.messages_received += 1;

        match reading {
            Reading::Value(value) => {
                stats.samples_accepted += 1;
                drop(stats);
                trace!(topic = %msg.topic, value, "Accepted sample");
                self.store.write(&msg.topic, value, now);
            }
            Reading::Ignore(Ignored::Retained) => {
                stats.ignored_retained += 1;
                trace!(topic = %msg.topic, "Ignoring retained message");
            }
            Reading::Ignore(Ignored::InvalidUtf8) => {
                stats.ignored_invalid_utf8 += 1;
                warn!(
                    topic = %msg.topic,
                    payload = ?msg.payload,
                    "Parse error: payload is not valid UTF-8"
                );
            }
            Reading::Ignore(Ignored::Structured) => {
                stats.ignored_structured += 1;
                trace!(topic = %msg.topic, "Ignoring JSON payload");
            }
            Reading::Ignore(Ignored::Unparseable) => {
                stats.ignored_unparseable += 1;
                debug!(
                    topic = %msg.topic,
                    payload = %String::from_utf8_lossy(&msg.payload),
                    "Parse error: not a number or known token"
                );
            }
        }

        reading
    }

    /// Consume messages until the channel closes or shutdown is signalled.
    pub async fn run(&self, mut messages: MessageReceiver, mut shutdown: watch::Receiver<bool>) {
        info!("Ingestion worker started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping ingestion worker");
                        break;
                    }
                }

                msg = messages.recv() => {
                    match msg {
                        Some(msg) => {
                            self.handle(&msg, Instant::now());
                        }
                        None => {
                            info!("Message channel closed");
                            break;
                        }
                    }
                }
            }
        }

        info!("Ingestion worker stopped");
    }

    /// Get ingestion statistics.
    pub fn stats(&self) -> IngestStats {
        self.stats.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SampleStore;
    use std::sync::Arc;

    fn make_worker() -> (SharedStore, IngestWorker) {
        let store = Arc::new(SampleStore::new());
        let worker = IngestWorker::new(store.clone());
        (store, worker)
    }

    #[test]
    fn test_accepted_value_written() {
        let (store, worker) = make_worker();
        let now = Instant::now();

        let reading = worker.handle(&BrokerMessage::new("sensor/door", "open"), now);

        assert_eq!(reading, Reading::Value(1.0));
        assert_eq!(store.get("sensor/door").map(|s| s.value), Some(1.0));
        assert_eq!(worker.stats().samples_accepted, 1);
    }

    #[test]
    fn test_retained_never_written() {
        let (store, worker) = make_worker();
        let now = Instant::now();

        for payload in ["open", "21.5", "false"] {
            worker.handle(&BrokerMessage::new("sensor/door", payload).retained(), now);
        }

        assert!(store.is_empty());
        assert_eq!(store.stats().writes, 0);
        assert_eq!(worker.stats().ignored_retained, 3);
    }

    #[test]
    fn test_retained_does_not_refresh() {
        let (store, worker) = make_worker();
        let start = Instant::now();

        worker.handle(&BrokerMessage::new("sensor/temp", "20"), start);
        worker.handle(
            &BrokerMessage::new("sensor/temp", "25").retained(),
            start + std::time::Duration::from_secs(10),
        );

        let sample = store.get("sensor/temp").unwrap();
        assert_eq!(sample.value, 20.0);
        assert_eq!(sample.observed_at, start);
    }

    #[test]
    fn test_ignored_payloads_counted() {
        let (store, worker) = make_worker();
        let now = Instant::now();

        worker.handle(&BrokerMessage::new("a", vec![0xffu8, 0xfe]), now);
        worker.handle(&BrokerMessage::new("b", r#"{"x": 1}"#), now);
        worker.handle(&BrokerMessage::new("c", "hello"), now);

        let stats = worker.stats();
        assert!(store.is_empty());
        assert_eq!(stats.messages_received, 3);
        assert_eq!(stats.ignored_invalid_utf8, 1);
        assert_eq!(stats.ignored_structured, 1);
        assert_eq!(stats.ignored_unparseable, 1);
    }

    #[test]
    fn test_bad_payload_does_not_affect_other_topics() {
        let (store, worker) = make_worker();
        let now = Instant::now();

        worker.handle(&BrokerMessage::new("good", "1.5"), now);
        worker.handle(&BrokerMessage::new("good", "garbage"), now);

        assert_eq!(store.get("good").map(|s| s.value), Some(1.5));
    }

    #[tokio::test]
    async fn test_run_until_channel_closed() {
        let (store, worker) = make_worker();
        let (tx, rx) = message_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        tx.send(BrokerMessage::new("x/1", "high")).unwrap();
        tx.send(BrokerMessage::new("x/2", "low")).unwrap();
        drop(tx);

        worker.run(rx, shutdown_rx).await;

        assert_eq!(store.topics(), vec!["x/1".to_string(), "x/2".to_string()]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (_store, worker) = make_worker();
        let (_tx, rx) = message_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            worker.run(rx, shutdown_rx),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_when_shutdown_sender_dropped() {
        let (_store, worker) = make_worker();
        let (_tx, rx) = message_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        drop(shutdown_tx);

        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            worker.run(rx, shutdown_rx),
        )
        .await
        .expect("worker should stop once the shutdown sender is gone");
    }
}
