use lib_telemetry::core::{ConnectionManager, ReadingDispatcher};
use lib_telemetry::ingestors::IngestionCoordinator;
use lib_telemetry::retrieve::Narrator;
use lib_telemetry::sensors::TopicScheme;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Everything the HTTP handlers and the monitor need. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub manager: ConnectionManager,
    pub coordinator: Arc<IngestionCoordinator>,
    pub dispatcher: Arc<ReadingDispatcher>,
    pub narrator: Arc<dyn Narrator>,
    pub scheme: TopicScheme,
    started_at: Instant,
    next_client_id: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(
        manager: ConnectionManager,
        coordinator: Arc<IngestionCoordinator>,
        dispatcher: Arc<ReadingDispatcher>,
        narrator: Arc<dyn Narrator>,
    ) -> Self {
        let scheme = coordinator.scheme().clone();
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            manager,
            coordinator,
            dispatcher,
            narrator,
            scheme,
            started_at: Instant::now(),
            next_client_id: Arc::new(AtomicUsize::new(1)),
            shutdown_tx,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Observer id for a new websocket client.
    pub fn next_client_id(&self) -> String {
        format!("ws-{}", self.next_client_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Tells every long-running component to stop.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
