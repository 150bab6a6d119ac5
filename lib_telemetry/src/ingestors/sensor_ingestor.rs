//! # Sensor Ingestion Coordinator
//!
//! The handler registered for every sensor topic. For each frame it:
//!
//! 1. resolves the sensor kind from the topic,
//! 2. validates the payload (rejections are counted, logged and dropped),
//! 3. builds the immutable `SensorReading` and classifies it,
//! 4. queues a `SensorRecord` for the persistence worker,
//! 5. broadcasts the classified reading to in-process observers.
//!
//! Steps 4 and 5 are independent: observers see every accepted reading even
//! while the sink is failing. Sink failures land in a bounded dead-letter
//! buffer; they are never retried automatically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::connections::sink::{PersistenceSink, SensorRecord};
use crate::core::connection_manager::{ConnectionError, ConnectionManager};
use crate::core::dispatcher::ReadingDispatcher;
use crate::core::registry::{FrameHandler, HandlerError, SubscriptionHandle};
use crate::core::transport::Qos;
use crate::sensors::{validate, Classification, ClassifiedReading, RawFrame, Rejection, SensorReading, TopicScheme};

pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionConfig {
    pub scheme: TopicScheme,
    /// Oldest entries are dropped beyond this many.
    pub dead_letter_capacity: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            scheme: TopicScheme::default(),
            dead_letter_capacity: DEFAULT_DEAD_LETTER_CAPACITY,
        }
    }
}

/// A record the sink refused.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub record: SensorRecord,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Rejections broken down by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionCounts {
    pub malformed_encoding: u64,
    pub missing_value_field: u64,
    pub non_numeric_value: u64,
    pub unparseable_timestamp: u64,
}

impl RejectionCounts {
    pub fn total(&self) -> u64 {
        self.malformed_encoding + self.missing_value_field + self.non_numeric_value + self.unparseable_timestamp
    }
}

/// Snapshot of the coordinator's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionStats {
    pub frames_received: u64,
    /// Frames on a topic that is not a sensor topic of this domain.
    pub unknown_topic: u64,
    pub accepted: u64,
    pub rejected: RejectionCounts,
    pub unclassified: u64,
    pub persisted: u64,
    pub persistence_failures: u64,
    pub dead_letters: usize,
}

#[derive(Default)]
struct Counters {
    frames_received: AtomicU64,
    unknown_topic: AtomicU64,
    accepted: AtomicU64,
    malformed_encoding: AtomicU64,
    missing_value_field: AtomicU64,
    non_numeric_value: AtomicU64,
    unparseable_timestamp: AtomicU64,
    unclassified: AtomicU64,
    persisted: AtomicU64,
    persistence_failures: AtomicU64,
}

impl Counters {
    fn rejection(&self, rejection: Rejection) -> &AtomicU64 {
        match rejection {
            Rejection::MalformedEncoding => &self.malformed_encoding,
            Rejection::MissingValueField => &self.missing_value_field,
            Rejection::NonNumericValue => &self.non_numeric_value,
            Rejection::UnparseableTimestamp => &self.unparseable_timestamp,
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// State shared between the coordinator and its persistence worker.
struct Ledger {
    counters: Counters,
    dead_letters: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
}

impl Ledger {
    fn dead_letters(&self) -> MutexGuard<'_, VecDeque<DeadLetter>> {
        self.dead_letters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_failure(&self, record: SensorRecord, error: String) {
        bump(&self.counters.persistence_failures);
        tracing::error!(
            record = %serde_json::to_string(&record).unwrap_or_default(),
            error = %error,
            "Failed to persist reading"
        );

        if self.capacity == 0 {
            return;
        }
        let mut letters = self.dead_letters();
        if letters.len() >= self.capacity {
            letters.pop_front();
        }
        letters.push_back(DeadLetter {
            record,
            error,
            failed_at: Utc::now(),
        });
    }
}

/// Consumes sensor frames and feeds the sink and the observers.
pub struct IngestionCoordinator {
    scheme: TopicScheme,
    dispatcher: Arc<ReadingDispatcher>,
    persist_tx: mpsc::UnboundedSender<SensorRecord>,
    ledger: Arc<Ledger>,
}

impl IngestionCoordinator {
    /// Builds the coordinator and spawns its persistence worker.
    pub fn start(config: IngestionConfig, sink: Arc<dyn PersistenceSink>, dispatcher: Arc<ReadingDispatcher>) -> Arc<Self> {
        let ledger = Arc::new(Ledger {
            counters: Counters::default(),
            dead_letters: Mutex::new(VecDeque::new()),
            capacity: config.dead_letter_capacity,
        });

        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        tokio::spawn(persistence_worker(persist_rx, sink, Arc::clone(&ledger)));

        Arc::new(Self {
            scheme: config.scheme,
            dispatcher,
            persist_tx,
            ledger,
        })
    }

    pub fn scheme(&self) -> &TopicScheme {
        &self.scheme
    }

    /// Subscribes this coordinator to all four sensor topics.
    pub async fn attach(self: &Arc<Self>, manager: &ConnectionManager) -> Result<Vec<SubscriptionHandle>, ConnectionError> {
        let mut handles = Vec::new();
        for (kind, topic) in self.scheme.sensor_topics() {
            let handler: Arc<dyn FrameHandler> = Arc::clone(self) as Arc<dyn FrameHandler>;
            handles.push(manager.subscribe(&topic, Qos::AtLeastOnce, handler).await?);
            tracing::debug!(%kind, topic = %topic, "Sensor topic attached");
        }
        Ok(handles)
    }

    pub fn stats(&self) -> IngestionStats {
        let c = &self.ledger.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        IngestionStats {
            frames_received: load(&c.frames_received),
            unknown_topic: load(&c.unknown_topic),
            accepted: load(&c.accepted),
            rejected: RejectionCounts {
                malformed_encoding: load(&c.malformed_encoding),
                missing_value_field: load(&c.missing_value_field),
                non_numeric_value: load(&c.non_numeric_value),
                unparseable_timestamp: load(&c.unparseable_timestamp),
            },
            unclassified: load(&c.unclassified),
            persisted: load(&c.persisted),
            persistence_failures: load(&c.persistence_failures),
            dead_letters: self.ledger.dead_letters().len(),
        }
    }

    /// Records the sink refused, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.ledger.dead_letters().iter().cloned().collect()
    }

    fn accept(&self, reading: Arc<SensorReading>) {
        let classified = ClassifiedReading::new(Arc::clone(&reading));
        if classified.classification == Classification::Unclassified {
            bump(&self.ledger.counters.unclassified);
            tracing::debug!(kind = %reading.kind(), value = reading.value(), "Reading outside classification domain");
        }
        bump(&self.ledger.counters.accepted);

        let record = SensorRecord::from_reading(&reading);
        if let Err(mpsc::error::SendError(record)) = self.persist_tx.send(record) {
            self.ledger.record_failure(record, "persistence worker stopped".to_string());
        }

        self.dispatcher.broadcast(classified);
    }
}

impl FrameHandler for IngestionCoordinator {
    fn handle(&self, frame: &RawFrame) -> Result<(), HandlerError> {
        bump(&self.ledger.counters.frames_received);

        let Some(kind) = self.scheme.kind_of(&frame.topic) else {
            bump(&self.ledger.counters.unknown_topic);
            tracing::warn!(topic = %frame.topic, "Frame on a non-sensor topic ignored");
            return Ok(());
        };

        match validate(kind, &frame.payload) {
            Ok(draft) => {
                self.accept(SensorReading::from_draft(draft, frame));
                Ok(())
            }
            Err(rejection) => {
                bump(self.ledger.counters.rejection(rejection));
                tracing::warn!(topic = %frame.topic, reason = %rejection, "Reading rejected");
                Ok(())
            }
        }
    }

    fn name(&self) -> &str {
        "ingestion"
    }
}

async fn persistence_worker(
    mut records: mpsc::UnboundedReceiver<SensorRecord>,
    sink: Arc<dyn PersistenceSink>,
    ledger: Arc<Ledger>,
) {
    tracing::info!(sink = sink.name(), "Persistence worker started");
    while let Some(record) = records.recv().await {
        match sink.store(&record).await {
            Ok(()) => bump(&ledger.counters.persisted),
            Err(e) => ledger.record_failure(record, e.to_string()),
        }
    }
    tracing::info!(sink = sink.name(), "Persistence worker stopped");
}
