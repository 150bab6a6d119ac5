//! # Sensor Telemetry Server
//!
//! Connects to the monitoring devices' broker, ingests every sensor reading
//! (validation, classification, persistence, live fan-out) and exposes an HTTP
//! command surface for the dashboard: connection control, device commands,
//! latest readings, status and AI analysis.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;

mod telemetry_logic;
use telemetry_logic::{config, downstream, logger, monitor, state};

use lib_telemetry::connections::{MqttTransport, PersistenceSink, PostgresSink, TracingSink};
use lib_telemetry::core::{ConnectionManager, ReadingDispatcher, SubscriptionRegistry};
use lib_telemetry::ingestors::IngestionCoordinator;
use lib_telemetry::retrieve::GeminiNarrator;

async fn build_sink(config: &config::Config) -> Result<Arc<dyn PersistenceSink>> {
    let Some(url) = &config.database_url else {
        tracing::warn!("No database configured; readings will only be logged.");
        return Ok(Arc::new(TracingSink));
    };

    let sink = PostgresSink::new(url, config.database_pool_size.unwrap_or(5)).context("creating database pool")?;
    // The database may come up after us; writes fail into dead letters until it does.
    if let Err(e) = sink.ensure_schema().await {
        tracing::warn!("Database not ready at startup: {}", e);
    }
    Ok(Arc::new(sink))
}

async fn wait_for_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        tracing::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        tracing::warn!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config, file_layer) = config::load_config();
    let _log_guard = logger::setup_logging(&config.log_dir(), &config.log_level())?;
    file_layer.log();
    tracing::info!(client_id = %config.client_id(), domain = %config.topic_scheme().domain(), "Starting telemetry server");

    let registry = Arc::new(SubscriptionRegistry::new());
    let transport = Arc::new(MqttTransport::new(config.broker_options()));
    let manager = ConnectionManager::new(config.connection_config(), transport, registry);

    let dispatcher = Arc::new(ReadingDispatcher::new());
    let sink = build_sink(&config).await?;
    let coordinator = IngestionCoordinator::start(config.ingestion_config(), sink, Arc::clone(&dispatcher));
    coordinator.attach(&manager).await.context("attaching sensor topics")?;

    let narrator = Arc::new(GeminiNarrator::new(config.narrative_options()).context("creating narrative client")?);
    if !narrator.is_configured() {
        tracing::warn!("No analysis API key configured; /analysis will return the fallback text.");
    }

    let app_state = state::AppState::new(manager.clone(), coordinator, dispatcher, narrator);

    manager.connect().await.context("starting broker connection")?;

    let downstream_handle = tokio::spawn(downstream::run(
        config.port(),
        app_state.clone(),
        app_state.shutdown_signal(),
    ));

    let monitor_handle = tokio::spawn(monitor::run(
        config.status_interval(),
        app_state.clone(),
        app_state.shutdown_signal(),
    ));

    wait_for_signal().await;

    // Send shutdown signal to all components
    app_state.trigger_shutdown();
    if let Err(e) = manager.disconnect().await {
        tracing::warn!("Disconnect during shutdown failed: {}", e);
    }

    // Wait for components to shut down
    let (downstream_result, _) = tokio::join!(downstream_handle, monitor_handle);
    match downstream_result {
        Ok(Err(e)) => tracing::error!("HTTP command surface stopped with error: {:#}", e),
        Err(e) => tracing::error!("HTTP command surface task failed: {}", e),
        Ok(Ok(())) => {}
    }

    tracing::info!("Shutdown complete.");
    Ok(())
}
