use crate::telemetry_logic::state::AppState;
use lib_telemetry::core::ConnectionState;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;

pub async fn run(status_interval: Duration, app_state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let mut check_interval = interval(status_interval);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Monitor service received shutdown signal.");
                break;
            }
            _ = check_interval.tick() => report(&app_state).await,
        }
    }
}

async fn report(app_state: &AppState) {
    let status = app_state.manager.status().await;
    let stats = app_state.coordinator.stats();

    tracing::info!(
        state = %status.state,
        attempts = status.reconnect_attempts,
        received = stats.frames_received,
        accepted = stats.accepted,
        rejected = stats.rejected.total(),
        persisted = stats.persisted,
        persistence_failures = stats.persistence_failures,
        dead_letters = stats.dead_letters,
        "Status"
    );

    if status.state == ConnectionState::Failed {
        tracing::warn!(
            attempts = status.reconnect_attempts,
            "Connection is in Failed state; POST /connection/connect to retry."
        );
    }
}
