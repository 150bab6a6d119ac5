//! # Shared Test Fixtures
//!
//! Fakes for the two seams of the ingestion pipeline, used by the
//! integration tests under `tests/`:
//!
//! - `FakeTransport`: a scripted broker. Each `open` consumes the next scripted
//!   outcome (succeeding once the script runs out) and every call is recorded,
//!   so tests can assert exactly what went over the wire. Publish and
//!   subscribe can be made to fail or to hang.
//! - `RecordingSink`: a persistence sink that keeps what it was given and can
//!   be switched into failure mode.
//! - `RecordingHandler`: a frame handler that remembers every frame.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use lib_telemetry::connections::{PersistenceSink, SensorRecord, SinkError};
use lib_telemetry::core::{
    ConnectionConfig, ConnectionManager, ConnectionState, FrameHandler, HandlerError, Qos, SubscriptionRegistry,
    Transport, TransportError, TransportEvent, TransportEvents,
};
use lib_telemetry::sensors::RawFrame;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open,
    Subscribe(String, Qos),
    Unsubscribe(String),
    Publish(String, Bytes, Qos),
    Close,
}

/// Scripted result of an `open` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    Succeed,
    Fail,
}

#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<VecDeque<OpenOutcome>>,
    calls: Mutex<Vec<Call>>,
    session: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    fail_publish: AtomicBool,
    stall_publish: AtomicBool,
    stall_subscribe: AtomicBool,
}

impl FakeTransport {
    /// Every `open` succeeds.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The first `failures` opens fail, later ones succeed.
    pub fn failing_first(failures: usize) -> Arc<Self> {
        Self::scripted(std::iter::repeat_n(OpenOutcome::Fail, failures))
    }

    pub fn scripted(outcomes: impl IntoIterator<Item = OpenOutcome>) -> Arc<Self> {
        let transport = Self::default();
        lock(&transport.script).extend(outcomes);
        Arc::new(transport)
    }

    /// Makes every publish fail (simulates a dead link for keepalive).
    pub fn set_publish_failing(&self, failing: bool) {
        self.fail_publish.store(failing, Ordering::SeqCst);
    }

    /// Makes every publish hang forever (a broker whose request queue is full).
    pub fn set_publish_stalled(&self, stalled: bool) {
        self.stall_publish.store(stalled, Ordering::SeqCst);
    }

    /// Makes every subscribe hang forever.
    pub fn set_subscribe_stalled(&self, stalled: bool) {
        self.stall_subscribe.store(stalled, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    pub fn open_count(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, Call::Open)).count()
    }

    pub fn subscribe_calls(&self) -> Vec<(String, Qos)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Subscribe(topic, qos) => Some((topic, qos)),
                _ => None,
            })
            .collect()
    }

    pub fn unsubscribe_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Unsubscribe(topic) => Some(topic),
                _ => None,
            })
            .collect()
    }

    /// Publishes on `topic` (keepalives included).
    pub fn publishes_to(&self, topic: &str) -> Vec<Bytes> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Publish(t, payload, _) if t == topic => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn has_session(&self) -> bool {
        lock(&self.session).is_some()
    }

    /// Delivers an inbound frame on the open session. False without a session.
    pub fn inject_frame(&self, topic: &str, payload: &'static str) -> bool {
        self.send_event(TransportEvent::Frame {
            topic: topic.to_string(),
            payload: Bytes::from_static(payload.as_bytes()),
        })
    }

    /// Simulates the broker dropping the session.
    pub fn drop_session(&self, reason: &str) -> bool {
        self.send_event(TransportEvent::Closed {
            reason: Some(reason.to_string()),
        })
    }

    fn send_event(&self, event: TransportEvent) -> bool {
        lock(&self.session)
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self) -> Result<TransportEvents, TransportError> {
        self.record(Call::Open);
        let outcome = lock(&self.script).pop_front().unwrap_or(OpenOutcome::Succeed);
        match outcome {
            OpenOutcome::Succeed => {
                let (tx, rx) = mpsc::unbounded_channel();
                *lock(&self.session) = Some(tx);
                Ok(rx)
            }
            OpenOutcome::Fail => Err(TransportError::Handshake("connection refused".to_string())),
        }
    }

    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), TransportError> {
        self.record(Call::Subscribe(topic.to_string(), qos));
        if self.stall_subscribe.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.has_session() { Ok(()) } else { Err(TransportError::NoSession) }
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.record(Call::Unsubscribe(topic.to_string()));
        if self.has_session() { Ok(()) } else { Err(TransportError::NoSession) }
    }

    async fn publish(&self, topic: &str, payload: Bytes, qos: Qos) -> Result<(), TransportError> {
        self.record(Call::Publish(topic.to_string(), payload, qos));
        if self.stall_publish.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::Request("link down".to_string()));
        }
        if self.has_session() { Ok(()) } else { Err(TransportError::NoSession) }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.record(Call::Close);
        lock(&self.session).take();
        Ok(())
    }
}

/// Sink that keeps every record; can be told to fail.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<SensorRecord>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<SensorRecord> {
        lock(&self.records).clone()
    }
}

#[async_trait]
impl PersistenceSink for RecordingSink {
    async fn store(&self, record: &SensorRecord) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("database offline".to_string()));
        }
        lock(&self.records).push(record.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Handler that remembers every frame it was given.
#[derive(Default)]
pub struct RecordingHandler {
    frames: Mutex<Vec<RawFrame>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn topics(&self) -> Vec<String> {
        lock(&self.frames).iter().map(|f| f.topic.clone()).collect()
    }

    pub fn payloads(&self) -> Vec<Bytes> {
        lock(&self.frames).iter().map(|f| f.payload.clone()).collect()
    }

    pub fn count(&self) -> usize {
        lock(&self.frames).len()
    }
}

impl FrameHandler for RecordingHandler {
    fn handle(&self, frame: &RawFrame) -> Result<(), HandlerError> {
        lock(&self.frames).push(frame.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Fast reconnect settings with the given attempt cap.
pub fn test_config(max_reconnect_attempts: u32) -> ConnectionConfig {
    ConnectionConfig {
        client_id: "test-client".to_string(),
        keepalive_interval: Duration::from_secs(30),
        connect_timeout: Duration::from_secs(5),
        reconnect_base_delay: Duration::from_millis(100),
        reconnect_max_delay: Duration::from_secs(2),
        max_reconnect_attempts,
    }
}

pub fn manager_with(transport: Arc<FakeTransport>, max_reconnect_attempts: u32) -> ConnectionManager {
    ConnectionManager::new(
        test_config(max_reconnect_attempts),
        transport,
        Arc::new(SubscriptionRegistry::new()),
    )
}

/// Waits (in tokio time) until the manager reports `target`.
///
/// Panics after a minute of tokio time; under a paused clock that is instant.
pub async fn wait_for_state(manager: &ConnectionManager, target: ConnectionState) {
    let mut states = manager.watch_state();
    let reached = tokio::time::timeout(Duration::from_secs(60), states.wait_for(|s| *s == target)).await;
    assert!(
        matches!(reached, Ok(Ok(_))),
        "state {target} not reached, still {}",
        manager.state()
    );
}

/// Polls `condition` until it holds or a minute of tokio time passes.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..600 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    condition()
}
