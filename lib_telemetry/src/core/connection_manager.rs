//! # Connection Manager
//!
//! Owns the single broker session and drives it through an explicit state
//! machine:
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──handshake ok──▶ Connected
//!      ▲                        │  ▲                         │
//!      │                 failure│  │backoff elapsed    close/error/
//!      │                        ▼  │                   missed keepalive
//!      └──────disconnect──── Reconnecting ◀──────────────────┘
//!                               │
//!                     attempts ≥ cap
//!                               ▼
//!                            Failed ──connect──▶ Disconnected ▶ Connecting
//! ```
//!
//! All mutable state (current state, reconnect bookkeeping, session
//! generation) sits behind one async mutex, so exactly one transition is in
//! flight at a time. State changes are published on a `watch` channel.
//!
//! Transport calls made under that mutex are bounded by the connect timeout
//! and abandoned as soon as the session is cancelled, so a stalled broker can
//! never keep `disconnect` waiting.
//!
//! A background driver task owns the session loop. Inbound frames never run
//! handlers on the read path: they are queued to a dispatch worker that
//! calls `SubscriptionRegistry::dispatch` in arrival order.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, MutexGuard};
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::registry::{FrameHandler, SubscriptionHandle, SubscriptionRegistry};
use crate::core::transport::{Qos, Transport, TransportError, TransportEvent, TransportEvents};
use crate::sensors::{DeviceCommand, RawFrame, TopicScheme};

/// Lifecycle of the broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connecting, Disconnected)
                | (Connected, Reconnecting)
                | (Connected, Disconnected)
                | (Reconnecting, Connecting)
                | (Reconnecting, Failed)
                | (Reconnecting, Disconnected)
                | (Failed, Disconnected)
        )
    }

    /// `Disconnected` and `Failed` wait for an explicit request.
    pub fn is_idle(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Reconnect bookkeeping. Reset on every successful connect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectState {
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub backoff: Duration,
}

/// Tunables for the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Identity used for the keepalive topic.
    pub client_id: String,
    pub keepalive_interval: Duration,
    /// Bound on the handshake and on each keepalive publish.
    pub connect_timeout: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// Consecutive failures before giving up in `Failed`.
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            client_id: "telemetry-client".to_string(),
            keepalive_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            reconnect_base_delay: Duration::from_millis(1000),
            reconnect_max_delay: Duration::from_millis(60_000),
            max_reconnect_attempts: 10,
        }
    }
}

impl ConnectionConfig {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.reconnect_base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.reconnect_max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("not connected")]
    NotConnected,
    #[error("illegal state transition {from} -> {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Point-in-time view for status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub backoff_ms: u64,
}

struct Shared {
    state: ConnectionState,
    reconnect: ReconnectState,
    /// Bumped on every connect/disconnect so a superseded driver stands down.
    generation: u64,
}

struct Inner {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    registry: Arc<SubscriptionRegistry>,
    shared: Mutex<Shared>,
    state_tx: watch::Sender<ConnectionState>,
    session_cancel: StdMutex<Option<CancellationToken>>,
    frame_tx: mpsc::UnboundedSender<RawFrame>,
    frame_rx: StdMutex<Option<mpsc::UnboundedReceiver<RawFrame>>>,
}

enum Established {
    Ready,
    Stale,
    Failed(String),
}

/// Handle to the process-wide connection. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, transport: Arc<dyn Transport>, registry: Arc<SubscriptionRegistry>) -> Self {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                registry,
                shared: Mutex::new(Shared {
                    state: ConnectionState::Disconnected,
                    reconnect: ReconnectState::default(),
                    generation: 0,
                }),
                state_tx: watch::Sender::new(ConnectionState::Disconnected),
                session_cancel: StdMutex::new(None),
                frame_tx,
                frame_rx: StdMutex::new(Some(frame_rx)),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    /// Current state, without waiting on the state lock.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub async fn reconnect_state(&self) -> ReconnectState {
        self.inner.shared.lock().await.reconnect
    }

    pub async fn reconnect_attempts(&self) -> u32 {
        self.reconnect_state().await.attempts
    }

    pub async fn status(&self) -> ConnectionStatus {
        let shared = self.inner.shared.lock().await;
        ConnectionStatus {
            state: shared.state,
            reconnect_attempts: shared.reconnect.attempts,
            last_attempt_at: shared.reconnect.last_attempt_at,
            backoff_ms: u64::try_from(shared.reconnect.backoff.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// # Connect
    ///
    /// Starts the session lifecycle. A no-op while a session is already being
    /// driven; from `Failed` the attempt count is reset and the cycle restarts.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let mut shared = self.inner.shared.lock().await;
        match shared.state {
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting => {
                tracing::debug!(state = %shared.state, "Connect requested while active, ignoring");
                return Ok(());
            }
            ConnectionState::Failed => self.transition(&mut shared, ConnectionState::Disconnected)?,
            ConnectionState::Disconnected => {}
        }

        shared.reconnect = ReconnectState::default();
        self.transition(&mut shared, ConnectionState::Connecting)?;
        shared.generation += 1;

        let cancel = CancellationToken::new();
        if let Some(previous) = self.session_cancel().replace(cancel.clone()) {
            previous.cancel();
        }
        self.start_dispatch_worker();

        let driver = self.clone();
        let generation = shared.generation;
        tokio::spawn(async move { driver.drive(generation, cancel).await });
        Ok(())
    }

    /// # Disconnect
    ///
    /// Cancels the keepalive and any pending backoff, releases the transport
    /// and clears every "active on wire" flag. Registrations are kept.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.cancel_session();
        let mut shared = self.inner.shared.lock().await;
        // A connect may have slipped in before the lock was taken.
        self.cancel_session();
        shared.generation += 1;

        if shared.state == ConnectionState::Disconnected {
            return Ok(());
        }

        self.close_transport().await;
        self.inner.registry.mark_all_inactive();
        if shared.state == ConnectionState::Failed {
            shared.reconnect = ReconnectState::default();
        }
        self.transition(&mut shared, ConnectionState::Disconnected)
    }

    /// # Publish
    ///
    /// Sends on the live session. Rejected with `NotConnected` in any other
    /// state; nothing is queued.
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>, qos: Qos) -> Result<(), ConnectionError> {
        let shared = self.inner.shared.lock().await;
        if shared.state != ConnectionState::Connected {
            tracing::debug!(topic, state = %shared.state, "Publish rejected, not connected");
            return Err(ConnectionError::NotConnected);
        }
        // No live token while Connected means a disconnect is tearing down.
        let cancel = self.live_session().ok_or(ConnectionError::NotConnected)?;
        self.guarded("publish", &cancel, self.inner.transport.publish(topic, payload.into(), qos))
            .await
    }

    /// Publishes a device command on the domain's command topic.
    pub async fn send_command(&self, scheme: &TopicScheme, command: DeviceCommand) -> Result<(), ConnectionError> {
        let topic = scheme.command_topic(command);
        self.publish(&topic, command.as_str(), Qos::AtMostOnce).await?;
        tracing::info!(topic = %topic, "Device command sent");
        Ok(())
    }

    /// # Subscribe
    ///
    /// Registers `handler` for `topic`. While connected the wire subscription
    /// is issued immediately when the topic is new or its QoS went up;
    /// otherwise it is issued on the next connect.
    pub async fn subscribe(
        &self,
        topic: &str,
        qos: Qos,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<SubscriptionHandle, ConnectionError> {
        let shared = self.inner.shared.lock().await;
        let registration = self.inner.registry.register(topic, qos, handler);

        let wire_needed = registration.new_topic || registration.qos_raised;
        if let (ConnectionState::Connected, true, Some(cancel)) = (shared.state, wire_needed, self.live_session()) {
            let effective = self.inner.registry.topic_qos(topic).unwrap_or(qos);
            match self
                .guarded("subscribe", &cancel, self.inner.transport.subscribe(topic, effective))
                .await
            {
                Ok(()) => self.inner.registry.set_active(topic, true),
                // The registration stands; the next connect retries the wire subscribe.
                Err(e) => tracing::warn!(topic, error = %e, "Wire subscribe failed"),
            }
        }
        Ok(registration.handle)
    }

    /// Removes one registration. Returns `false` for an unknown handle.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<bool, ConnectionError> {
        let shared = self.inner.shared.lock().await;
        let Some(last) = self.inner.registry.unregister(handle) else {
            return Ok(false);
        };

        if let (true, ConnectionState::Connected, Some(cancel)) = (last, shared.state, self.live_session()) {
            let call = self.inner.transport.unsubscribe(handle.topic());
            if let Err(e) = self.guarded("unsubscribe", &cancel, call).await {
                tracing::warn!(topic = %handle.topic(), error = %e, "Wire unsubscribe failed");
            }
        }
        Ok(true)
    }

    fn session_cancel(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.inner.session_cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_session(&self) {
        if let Some(token) = self.session_cancel().take() {
            token.cancel();
        }
    }

    fn live_session(&self) -> Option<CancellationToken> {
        self.session_cancel().clone().filter(|token| !token.is_cancelled())
    }

    /// Runs a transport call made while the state lock is held: bounded by
    /// the connect timeout, and cut short with `NotConnected` when the
    /// session is cancelled.
    async fn guarded<F>(&self, op: &str, cancel: &CancellationToken, call: F) -> Result<(), ConnectionError>
    where
        F: Future<Output = Result<(), TransportError>>,
    {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(op, "Transport call abandoned, session cancelled");
                Err(ConnectionError::NotConnected)
            }
            outcome = timeout(self.inner.config.connect_timeout, call) => match outcome {
                Ok(result) => result.map_err(ConnectionError::from),
                Err(_) => Err(TransportError::Request(format!("{op} timed out")).into()),
            },
        }
    }

    async fn close_transport(&self) {
        match timeout(self.inner.config.connect_timeout, self.inner.transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Transport close failed"),
            Err(_) => tracing::warn!("Transport close timed out"),
        }
    }

    /// The only place the state is written.
    fn transition(&self, shared: &mut Shared, next: ConnectionState) -> Result<(), ConnectionError> {
        let from = shared.state;
        if !from.can_transition_to(next) {
            tracing::error!(%from, to = %next, "Illegal connection state transition");
            return Err(ConnectionError::InvalidTransition { from, to: next });
        }
        shared.state = next;
        self.inner.state_tx.send_replace(next);
        tracing::info!(%from, to = %next, "Connection state changed");
        Ok(())
    }

    /// Spawns the frame dispatch worker once; it lives as long as the manager.
    fn start_dispatch_worker(&self) {
        let receiver = self
            .inner
            .frame_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(mut frames) = receiver {
            let registry = Arc::clone(&self.inner.registry);
            tokio::spawn(async move {
                while let Some(frame) = frames.recv().await {
                    registry.dispatch(&frame);
                }
                tracing::debug!("Dispatch worker stopped");
            });
        }
    }

    async fn lock_current(&self, generation: u64) -> Option<MutexGuard<'_, Shared>> {
        let shared = self.inner.shared.lock().await;
        (shared.generation == generation).then_some(shared)
    }

    /// Session loop for one `connect()` request.
    async fn drive(self, generation: u64, cancel: CancellationToken) {
        loop {
            let opened = tokio::select! {
                _ = cancel.cancelled() => return,
                opened = timeout(self.inner.config.connect_timeout, self.inner.transport.open()) => opened,
            };

            let reason = match opened {
                Ok(Ok(events)) => match self.establish(generation, &cancel).await {
                    Established::Stale => return,
                    Established::Failed(reason) => reason,
                    Established::Ready => match self.run_session(events, &cancel).await {
                        Some(reason) => reason,
                        None => return,
                    },
                },
                Ok(Err(e)) => e.to_string(),
                Err(_) => "handshake timed out".to_string(),
            };

            let Some(delay) = self.enter_reconnecting(generation, &reason).await else {
                return;
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(delay) => {}
            }

            let Some(mut shared) = self.lock_current(generation).await else {
                return;
            };
            if self.transition(&mut shared, ConnectionState::Connecting).is_err() {
                return;
            }
        }
    }

    /// Handshake done: re-issue every registered topic exactly once at its
    /// effective QoS, then `Connecting → Connected` with reconnect
    /// bookkeeping reset. The lock is held throughout, so no registration
    /// can slip between the snapshot and the transition. A stalled
    /// resubscribe fails the attempt; a cancelled one makes it stale.
    async fn establish(&self, generation: u64, cancel: &CancellationToken) -> Established {
        let Some(mut shared) = self.lock_current(generation).await else {
            return Established::Stale;
        };

        let subscriptions = self.inner.registry.subscriptions();
        for (topic, qos) in &subscriptions {
            match self
                .guarded("resubscribe", cancel, self.inner.transport.subscribe(topic, *qos))
                .await
            {
                Ok(()) => self.inner.registry.set_active(topic, true),
                Err(ConnectionError::NotConnected) => return Established::Stale,
                Err(e) => return Established::Failed(format!("resubscribe of {topic} failed: {e}")),
            }
        }

        if self.transition(&mut shared, ConnectionState::Connected).is_err() {
            return Established::Stale;
        }
        shared.reconnect = ReconnectState::default();
        tracing::info!(topics = subscriptions.len(), "Subscriptions re-established");
        Established::Ready
    }

    /// Runs until the session ends. Returns the reason, or `None` on cancellation.
    async fn run_session(&self, mut events: TransportEvents, cancel: &CancellationToken) -> Option<String> {
        let period = self.inner.config.keepalive_interval;
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,

                event = events.recv() => match event {
                    Some(TransportEvent::Frame { topic, payload }) => {
                        // Handlers run on the dispatch worker, never on the read path.
                        let _ = self.inner.frame_tx.send(RawFrame::new(topic, payload));
                    }
                    Some(TransportEvent::Closed { reason }) => {
                        return Some(reason.unwrap_or_else(|| "connection closed".to_string()));
                    }
                    Some(TransportEvent::Error { message }) => return Some(message),
                    None => return Some("event stream ended".to_string()),
                },

                _ = keepalive.tick() => {
                    if let Err(reason) = self.send_keepalive().await {
                        tracing::warn!(reason = %reason, "Keepalive missed");
                        return Some(reason);
                    }
                }
            }
        }
    }

    async fn send_keepalive(&self) -> Result<(), String> {
        let client_id = &self.inner.config.client_id;
        let topic = TopicScheme::keepalive_topic(client_id);
        let payload = serde_json::json!({
            "clientId": client_id,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })
        .to_string();

        match timeout(
            self.inner.config.connect_timeout,
            self.inner.transport.publish(&topic, Bytes::from(payload), Qos::AtMostOnce),
        )
        .await
        {
            Ok(Ok(())) => {
                tracing::trace!(topic = %topic, "Keepalive sent");
                Ok(())
            }
            Ok(Err(e)) => Err(format!("keepalive publish failed: {e}")),
            Err(_) => Err("keepalive publish timed out".to_string()),
        }
    }

    /// Moves to `Reconnecting` (counting the attempt) and then either returns
    /// the backoff delay or settles in `Failed`.
    async fn enter_reconnecting(&self, generation: u64, reason: &str) -> Option<Duration> {
        let mut shared = self.lock_current(generation).await?;

        // Connecting and Connected both lead here.
        self.inner.registry.mark_all_inactive();
        self.close_transport().await;
        self.transition(&mut shared, ConnectionState::Reconnecting).ok()?;

        shared.reconnect.attempts += 1;
        shared.reconnect.last_attempt_at = Some(Utc::now());
        let attempt = shared.reconnect.attempts;
        let cap = self.inner.config.max_reconnect_attempts;

        if attempt >= cap {
            tracing::error!(attempt, cap, reason, "Reconnect attempts exhausted");
            let _ = self.transition(&mut shared, ConnectionState::Failed);
            return None;
        }

        let delay = self.inner.config.backoff_for(attempt);
        shared.reconnect.backoff = delay;
        tracing::warn!(attempt, cap, reason, delay_ms = delay.as_millis() as u64, "Connection lost, retrying");
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    /// Never connects; counts every call.
    #[derive(Default)]
    struct CountingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn open(&self) -> Result<TransportEvents, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Handshake("refused".into()))
        }
        async fn subscribe(&self, _topic: &str, _qos: Qos) -> Result<(), TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn unsubscribe(&self, _topic: &str) -> Result<(), TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn publish(&self, _topic: &str, _payload: Bytes, _qos: Qos) -> Result<(), TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn close(&self) -> Result<(), TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager(transport: Arc<CountingTransport>, max_attempts: u32) -> ConnectionManager {
        let config = ConnectionConfig {
            reconnect_base_delay: Duration::from_millis(10),
            reconnect_max_delay: Duration::from_millis(40),
            max_reconnect_attempts: max_attempts,
            ..ConnectionConfig::default()
        };
        ConnectionManager::new(config, transport, Arc::new(SubscriptionRegistry::new()))
    }

    #[test]
    fn only_documented_transitions_are_legal() {
        use ConnectionState::*;
        let all = [Disconnected, Connecting, Connected, Reconnecting, Failed];
        let legal = all
            .iter()
            .flat_map(|from| all.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .count();
        assert_eq!(legal, 10);
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Failed.can_transition_to(Connecting));
        assert!(!Connected.can_transition_to(Failed));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = ConnectionConfig::default();
        assert_eq!(config.backoff_for(1), Duration::from_millis(1000));
        assert_eq!(config.backoff_for(2), Duration::from_millis(2000));
        assert_eq!(config.backoff_for(4), Duration::from_millis(8000));
        assert_eq!(config.backoff_for(7), Duration::from_millis(60_000));
        assert_eq!(config.backoff_for(u32::MAX), Duration::from_millis(60_000));
    }

    #[tokio::test]
    async fn publish_while_disconnected_touches_nothing() {
        let transport = Arc::new(CountingTransport::default());
        let manager = manager(Arc::clone(&transport), 3);

        let result = manager.publish("a/b", "x", Qos::AtMostOnce).await;

        assert_eq!(result, Err(ConnectionError::NotConnected));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_end_in_failed_and_connect_restarts() {
        let transport = Arc::new(CountingTransport::default());
        let manager = manager(Arc::clone(&transport), 3);
        let mut states = manager.watch_state();

        manager.connect().await.unwrap();
        states.wait_for(|s| *s == ConnectionState::Failed).await.unwrap();
        assert_eq!(manager.reconnect_attempts().await, 3);

        manager.connect().await.unwrap();
        assert_eq!(manager.reconnect_attempts().await, 0);
        assert_eq!(manager.state(), ConnectionState::Connecting);

        manager.disconnect().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_when_idle_is_a_no_op() {
        let transport = Arc::new(CountingTransport::default());
        let manager = manager(Arc::clone(&transport), 3);
        manager.disconnect().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }
}
