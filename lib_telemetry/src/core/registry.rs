//! # Subscription Registry
//!
//! Maps each topic to the ordered list of handlers interested in it. The
//! registry is the source of truth for what the `ConnectionManager` must
//! (re)subscribe on the wire, and it is the only place inbound frames are
//! fanned out to handlers.
//!
//! Registration is idempotent per (topic, handler identity): registering the
//! same `Arc` twice for a topic returns the original handle, so one frame is
//! never processed twice by the same logical handler.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::core::transport::Qos;
use crate::sensors::RawFrame;

/// Failure reported by a handler. Caught and logged at the dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A consumer of inbound frames.
///
/// `handle` runs on the dispatch worker and must not block or perform I/O;
/// anything slow belongs on a queue the handler owns.
pub trait FrameHandler: Send + Sync + 'static {
    fn handle(&self, frame: &RawFrame) -> Result<(), HandlerError>;

    /// Name used when reporting failures.
    fn name(&self) -> &str {
        "handler"
    }
}

/// Returned by `register`; pass it back to `unregister`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    topic: String,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// What a `register` call changed, so the caller knows whether the wire needs updating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub handle: SubscriptionHandle,
    /// First handler for this topic.
    pub new_topic: bool,
    /// The topic's effective QoS went up.
    pub qos_raised: bool,
}

/// Outcome of dispatching one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

struct HandlerEntry {
    id: u64,
    qos: Qos,
    handler: Arc<dyn FrameHandler>,
}

#[derive(Default)]
struct TopicEntry {
    handlers: Vec<HandlerEntry>,
    /// Subscribed on the current session.
    active: bool,
}

impl TopicEntry {
    fn effective_qos(&self) -> Qos {
        self.handlers
            .iter()
            .map(|entry| entry.qos)
            .max()
            .unwrap_or(Qos::AtMostOnce)
    }
}

/// Topic → ordered handlers. Thread-safe; clone the `Arc` to share it.
pub struct SubscriptionRegistry {
    topics: Mutex<HashMap<String, TopicEntry>>,
    next_id: AtomicU64,
    handler_failures: AtomicU64,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn same_handler(a: &Arc<dyn FrameHandler>, b: &Arc<dyn FrameHandler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            handler_failures: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TopicEntry>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `handler` for `topic`. Idempotent per (topic, handler).
    pub fn register(&self, topic: &str, qos: Qos, handler: Arc<dyn FrameHandler>) -> Registration {
        let mut topics = self.lock();
        let new_topic = !topics.contains_key(topic);
        let entry = topics.entry(topic.to_string()).or_default();
        let before = entry.effective_qos();

        if let Some(existing) = entry.handlers.iter_mut().find(|e| same_handler(&e.handler, &handler)) {
            if qos > existing.qos {
                existing.qos = qos;
            }
            let id = existing.id;
            let qos_raised = entry.effective_qos() > before;
            tracing::debug!(topic, handler = handler.name(), "Handler already registered");
            return Registration {
                handle: SubscriptionHandle { id, topic: topic.to_string() },
                new_topic: false,
                qos_raised,
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entry.handlers.push(HandlerEntry { id, qos, handler });
        let qos_raised = !new_topic && entry.effective_qos() > before;
        tracing::info!(topic, ?qos, "Handler registered");

        Registration {
            handle: SubscriptionHandle { id, topic: topic.to_string() },
            new_topic,
            qos_raised,
        }
    }

    /// Removes one registration. Returns `Some(true)` when it was the topic's
    /// last handler (the topic is dropped), `None` for an unknown handle.
    pub fn unregister(&self, handle: &SubscriptionHandle) -> Option<bool> {
        let mut topics = self.lock();
        let entry = topics.get_mut(&handle.topic)?;
        let position = entry.handlers.iter().position(|e| e.id == handle.id)?;
        entry.handlers.remove(position);

        if entry.handlers.is_empty() {
            topics.remove(&handle.topic);
            tracing::info!(topic = %handle.topic, "Last handler removed, topic dropped");
            Some(true)
        } else {
            Some(false)
        }
    }

    /// Every registered topic with its effective QoS, sorted by topic.
    pub fn subscriptions(&self) -> Vec<(String, Qos)> {
        let topics = self.lock();
        let mut subs: Vec<(String, Qos)> = topics
            .iter()
            .map(|(topic, entry)| (topic.clone(), entry.effective_qos()))
            .collect();
        subs.sort();
        subs
    }

    pub fn topic_qos(&self, topic: &str) -> Option<Qos> {
        self.lock().get(topic).map(TopicEntry::effective_qos)
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        self.lock().get(topic).map_or(0, |entry| entry.handlers.len())
    }

    pub fn set_active(&self, topic: &str, active: bool) {
        if let Some(entry) = self.lock().get_mut(topic) {
            entry.active = active;
        }
    }

    pub fn is_active(&self, topic: &str) -> bool {
        self.lock().get(topic).is_some_and(|entry| entry.active)
    }

    /// Clears every "active on wire" flag; registrations are kept.
    pub fn mark_all_inactive(&self) {
        for entry in self.lock().values_mut() {
            entry.active = false;
        }
    }

    /// Total handler failures (errors and panics) caught so far.
    pub fn handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }

    /// Delivers `frame` to every handler of its topic, in registration order.
    ///
    /// Exact topic match only. A failing or panicking handler is reported
    /// and skipped; the remaining handlers still run.
    pub fn dispatch(&self, frame: &RawFrame) -> DispatchReport {
        // Snapshot so handlers run without the lock held.
        let handlers: Vec<Arc<dyn FrameHandler>> = match self.lock().get(&frame.topic) {
            Some(entry) => entry.handlers.iter().map(|e| Arc::clone(&e.handler)).collect(),
            None => {
                tracing::trace!(topic = %frame.topic, "No handlers for topic");
                return DispatchReport::default();
            }
        };

        let mut report = DispatchReport::default();
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(frame))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(topic = %frame.topic, handler = handler.name(), error = %e, "Handler failed");
                }
                Err(_) => {
                    report.failed += 1;
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(topic = %frame.topic, handler = handler.name(), "Handler panicked");
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl FrameHandler for Recorder {
        fn handle(&self, frame: &RawFrame) -> Result<(), HandlerError> {
            self.log.lock().unwrap().push(format!("{}:{}", self.label, frame.topic));
            Ok(())
        }
    }

    struct Failing;

    impl FrameHandler for Failing {
        fn handle(&self, _frame: &RawFrame) -> Result<(), HandlerError> {
            Err(HandlerError::new("boom"))
        }
    }

    struct Panicking;

    impl FrameHandler for Panicking {
        fn handle(&self, _frame: &RawFrame) -> Result<(), HandlerError> {
            panic!("handler blew up")
        }
    }

    fn recorder(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn FrameHandler> {
        Arc::new(Recorder { label, log: Arc::clone(log) })
    }

    #[test]
    fn register_is_idempotent_per_handler() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = recorder("a", &log);

        let first = registry.register("d/pHsensor", Qos::AtLeastOnce, Arc::clone(&handler));
        let second = registry.register("d/pHsensor", Qos::AtLeastOnce, Arc::clone(&handler));

        assert!(first.new_topic);
        assert!(!second.new_topic);
        assert_eq!(first.handle, second.handle);
        assert_eq!(registry.handler_count("d/pHsensor"), 1);

        registry.dispatch(&RawFrame::new("d/pHsensor", &b"{}"[..]));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn dispatch_runs_handlers_in_registration_order() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register("t", Qos::AtMostOnce, recorder("first", &log));
        registry.register("t", Qos::AtMostOnce, recorder("second", &log));
        registry.register("other", Qos::AtMostOnce, recorder("other", &log));

        let report = registry.dispatch(&RawFrame::new("t", &b"x"[..]));

        assert_eq!(report, DispatchReport { delivered: 2, failed: 0 });
        assert_eq!(*log.lock().unwrap(), vec!["first:t".to_string(), "second:t".to_string()]);
    }

    #[test]
    fn failing_and_panicking_handlers_do_not_stop_siblings() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register("t", Qos::AtMostOnce, Arc::new(Failing));
        registry.register("t", Qos::AtMostOnce, Arc::new(Panicking));
        registry.register("t", Qos::AtMostOnce, recorder("survivor", &log));

        let report = registry.dispatch(&RawFrame::new("t", &b"x"[..]));

        assert_eq!(report, DispatchReport { delivered: 1, failed: 2 });
        assert_eq!(registry.handler_failures(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["survivor:t".to_string()]);
    }

    #[test]
    fn unregistered_topic_dispatches_to_nobody() {
        let registry = SubscriptionRegistry::new();
        let report = registry.dispatch(&RawFrame::new("nobody/listens", &b"x"[..]));
        assert_eq!(report, DispatchReport::default());
    }

    #[test]
    fn unregister_drops_topic_after_last_handler() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = registry.register("t", Qos::AtMostOnce, recorder("a", &log)).handle;
        let b = registry.register("t", Qos::AtLeastOnce, recorder("b", &log)).handle;

        assert_eq!(registry.topic_qos("t"), Some(Qos::AtLeastOnce));
        assert_eq!(registry.unregister(&b), Some(false));
        assert_eq!(registry.topic_qos("t"), Some(Qos::AtMostOnce));
        assert_eq!(registry.unregister(&a), Some(true));
        assert_eq!(registry.unregister(&a), None);
        assert!(registry.subscriptions().is_empty());
    }

    #[test]
    fn qos_upgrade_is_reported() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = recorder("a", &log);
        registry.register("t", Qos::AtMostOnce, Arc::clone(&handler));
        let again = registry.register("t", Qos::AtLeastOnce, handler);
        assert!(again.qos_raised);
        assert_eq!(registry.subscriptions(), vec![("t".to_string(), Qos::AtLeastOnce)]);
    }

    #[test]
    fn active_flags_survive_only_until_cleared() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register("t", Qos::AtMostOnce, recorder("a", &log));
        registry.set_active("t", true);
        assert!(registry.is_active("t"));
        registry.mark_all_inactive();
        assert!(!registry.is_active("t"));
        assert_eq!(registry.handler_count("t"), 1);
    }
}
