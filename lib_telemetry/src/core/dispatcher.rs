//! # Reading Dispatcher
//!
//! Fans validated, classified readings out to in-process observers (the live
//! dashboard state, status endpoints, the narrative collaborator) and keeps
//! the latest reading per sensor kind.
//!
//! ## Design
//!
//! 1.  **Zero-Copy Fan-out**: each reading is wrapped in an `Arc` once; every
//!     observer receives a pointer to the same allocation.
//! 2.  **Never blocks**: observers own unbounded channels, so `broadcast` is a
//!     series of non-blocking sends. It is safe to call from the dispatch path.
//! 3.  **Self-cleaning**: an observer whose receiver was dropped is removed on
//!     the next broadcast.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::sensors::{ClassifiedReading, SensorKind};

/// Latest classified reading per kind, as shown on the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatestReadings {
    #[serde(flatten)]
    by_kind: BTreeMap<SensorKind, Arc<ClassifiedReading>>,
}

impl LatestReadings {
    pub fn get(&self, kind: SensorKind) -> Option<&Arc<ClassifiedReading>> {
        self.by_kind.get(&kind)
    }

    /// The value for `kind`, if one has been observed.
    pub fn value(&self, kind: SensorKind) -> Option<f64> {
        self.get(kind).map(|latest| latest.reading.value())
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    fn update(&mut self, reading: Arc<ClassifiedReading>) {
        let kind = reading.reading.kind();
        // A late, out-of-order delivery must not replace a newer measurement.
        if let Some(current) = self.by_kind.get(&kind) {
            if current.reading.timestamp() > reading.reading.timestamp() {
                return;
            }
        }
        self.by_kind.insert(kind, reading);
    }
}

struct ObserverHandle {
    id: String,
    sender: mpsc::UnboundedSender<Arc<ClassifiedReading>>,
}

/// Observer registry plus latest-value cache.
#[derive(Default)]
pub struct ReadingDispatcher {
    observers: Mutex<Vec<ObserverHandle>>,
    latest: Mutex<LatestReadings>,
}

impl ReadingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn observers(&self) -> MutexGuard<'_, Vec<ObserverHandle>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Add Observer
    ///
    /// Registers an observer and returns the receiving end of its channel.
    /// Re-using an id replaces the previous observer with that id.
    pub fn add_observer(&self, id: &str) -> mpsc::UnboundedReceiver<Arc<ClassifiedReading>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut observers = self.observers();
        observers.retain(|o| o.id != id);
        observers.push(ObserverHandle {
            id: id.to_string(),
            sender: tx,
        });
        tracing::info!(observer = id, "Observer registered");
        rx
    }

    /// Removes a specific observer by its id.
    pub fn remove_observer(&self, id: &str) {
        self.observers().retain(|o| o.id != id);
        tracing::info!(observer = id, "Observer explicitly removed");
    }

    pub fn observer_count(&self) -> usize {
        self.observers().len()
    }

    /// # Broadcast
    ///
    /// Updates the latest-value cache, then sends an `Arc` clone of the
    /// reading to every observer, pruning the ones that went away.
    pub fn broadcast(&self, reading: ClassifiedReading) {
        let reading = Arc::new(reading);

        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .update(Arc::clone(&reading));

        self.observers().retain(|observer| match observer.sender.send(Arc::clone(&reading)) {
            Ok(()) => true,
            Err(_) => {
                tracing::info!(observer = %observer.id, "Observer disconnected, removing");
                false
            }
        });
    }

    /// Snapshot of the latest reading per kind.
    pub fn latest(&self) -> LatestReadings {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{RawFrame, ReadingDraft, SensorReading};
    use chrono::{TimeZone, Utc};

    fn classified(kind: SensorKind, value: f64, second: u32) -> ClassifiedReading {
        let frame = RawFrame::new(format!("d/{}", kind.topic_segment()), &b"{}"[..]);
        let draft = ReadingDraft {
            kind,
            value,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, second).unwrap(),
            unit: None,
        };
        ClassifiedReading::new(SensorReading::from_draft(draft, &frame))
    }

    #[tokio::test]
    async fn every_observer_receives_the_same_allocation() {
        let dispatcher = ReadingDispatcher::new();
        let mut a = dispatcher.add_observer("a");
        let mut b = dispatcher.add_observer("b");

        dispatcher.broadcast(classified(SensorKind::Ph, 7.42, 0));

        let from_a = a.recv().await.unwrap();
        let from_b = b.recv().await.unwrap();
        assert!(Arc::ptr_eq(&from_a, &from_b));
        assert_eq!(from_a.classification.label(), "Slightly Alkaline");
    }

    #[test]
    fn dropped_observers_are_pruned() {
        let dispatcher = ReadingDispatcher::new();
        let keep = dispatcher.add_observer("keep");
        drop(dispatcher.add_observer("gone"));

        dispatcher.broadcast(classified(SensorKind::Tds, 120.0, 0));

        assert_eq!(dispatcher.observer_count(), 1);
        drop(keep);
    }

    #[test]
    fn latest_cache_ignores_older_measurements() {
        let dispatcher = ReadingDispatcher::new();
        dispatcher.broadcast(classified(SensorKind::Level, 60.0, 10));
        dispatcher.broadcast(classified(SensorKind::Level, 40.0, 5));
        dispatcher.broadcast(classified(SensorKind::Ph, 7.0, 1));

        let latest = dispatcher.latest();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest.value(SensorKind::Level), Some(60.0));
        assert_eq!(latest.value(SensorKind::Ph), Some(7.0));
        assert_eq!(latest.value(SensorKind::Tds), None);
    }
}
