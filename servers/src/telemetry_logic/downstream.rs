use crate::telemetry_logic::state::AppState;
use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use lib_telemetry::core::{ConnectionError, Qos};
use lib_telemetry::sensors::DeviceCommand;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

/// # Application Error
///
/// Maps connection failures onto HTTP statuses with a JSON body.
#[derive(Debug)]
pub enum AppError {
    Connection(ConnectionError),
}

impl From<ConnectionError> for AppError {
    fn from(e: ConnectionError) -> Self {
        AppError::Connection(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Connection(ConnectionError::NotConnected) => (StatusCode::CONFLICT, "not connected".to_string()),
            AppError::Connection(e @ ConnectionError::InvalidTransition { .. }) => (StatusCode::CONFLICT, e.to_string()),
            AppError::Connection(e @ ConnectionError::Transport(_)) => {
                tracing::error!("Transport error: {}", e);
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    pub payload: String,
    #[serde(default)]
    pub qos: Option<Qos>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/readings/latest", get(latest_handler))
        .route("/readings/dead-letters", get(dead_letters_handler))
        .route("/readings/ws", get(ws_handler))
        .route("/connection/connect", post(connect_handler))
        .route("/connection/disconnect", post(disconnect_handler))
        .route("/commands/start", post(start_handler))
        .route("/commands/reset", post(reset_handler))
        .route("/publish", post(publish_handler))
        .route("/analysis", get(analysis_handler))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

pub async fn run(port: u16, app_state: AppState, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let app = build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!("HTTP command surface listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            tracing::info!("HTTP command surface shutting down.");
        })
        .await
        .context("serving HTTP")?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "connection": state.manager.status().await,
        "ingestion": state.coordinator.stats(),
        "handlerFailures": state.manager.registry().handler_failures(),
        "observers": state.dispatcher.observer_count(),
        "topicDomain": state.scheme.domain(),
        "uptimeSeconds": state.uptime_seconds(),
    }))
}

async fn latest_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dispatcher.latest())
}

async fn dead_letters_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.dead_letters())
}

async fn connect_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    state.manager.connect().await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "state": state.manager.state() }))))
}

async fn disconnect_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    state.manager.disconnect().await?;
    Ok(Json(json!({ "state": state.manager.state() })))
}

async fn send_command(state: &AppState, command: DeviceCommand) -> Result<Json<serde_json::Value>, AppError> {
    state.manager.send_command(&state.scheme, command).await?;
    Ok(Json(json!({
        "command": command,
        "topic": state.scheme.command_topic(command),
    })))
}

async fn start_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    send_command(&state, DeviceCommand::Start).await
}

async fn reset_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    send_command(&state, DeviceCommand::Reset).await
}

async fn publish_handler(
    State(state): State<AppState>,
    Json(request): Json<PublishRequest>,
) -> Result<impl IntoResponse, AppError> {
    let qos = request.qos.unwrap_or(Qos::AtMostOnce);
    state.manager.publish(&request.topic, request.payload, qos).await?;
    Ok(Json(json!({ "published": request.topic })))
}

async fn analysis_handler(State(state): State<AppState>) -> impl IntoResponse {
    let latest = state.dispatcher.latest();
    let analysis = state.narrator.analyze(&latest).await;
    Json(json!({ "analysis": analysis }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| stream_readings(socket, state))
}

/// Pushes a snapshot, then every classified reading, until either side goes away.
async fn stream_readings(mut socket: WebSocket, state: AppState) {
    let client_id = state.next_client_id();
    let mut readings = state.dispatcher.add_observer(&client_id);
    let mut shutdown = state.shutdown_signal();
    tracing::info!("Client {} connected", client_id);

    let snapshot = json!({ "type": "snapshot", "readings": state.dispatcher.latest() });
    if socket.send(Message::Text(snapshot.to_string().into())).await.is_ok() {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                incoming = socket.recv() => match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
                reading = readings.recv() => {
                    let Some(reading) = reading else { break };
                    let message = json!({ "type": "reading", "reading": &*reading });
                    if socket.send(Message::Text(message.to_string().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    state.dispatcher.remove_observer(&client_id);
    tracing::info!("Client {} disconnected", client_id);
}
