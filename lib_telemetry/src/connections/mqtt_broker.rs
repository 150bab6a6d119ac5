//! # MQTT Broker Transport
//!
//! `Transport` implementation on top of `rumqttc`. Each `open` builds a fresh
//! client/event-loop pair, waits for the broker's CONNACK, then spawns a pump
//! task that forwards inbound publishes and connection loss as
//! `TransportEvent`s.
//!
//! rumqttc would happily reconnect on its own when polled after an error;
//! the pump stops polling instead and reports the error, leaving reconnect
//! policy to the `ConnectionManager`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::core::transport::{Qos, Transport, TransportError, TransportEvent, TransportEvents};

/// Capacity of rumqttc's outgoing request queue.
const REQUEST_CAPACITY: usize = 64;

/// Where and how to reach the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttBrokerOptions {
    pub host: String,
    pub port: u16,
    /// Websocket path (e.g. `/mqtt`). `None` means plain MQTT over TCP.
    pub ws_path: Option<String>,
    pub tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    /// MQTT protocol keep-alive (PINGREQ) interval.
    pub keep_alive: Duration,
    /// `false` keeps the broker-side session, so at-least-once topics are
    /// queued and redelivered across a reconnect.
    pub clean_session: bool,
}

impl Default for MqttBrokerOptions {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: 8884,
            ws_path: Some("/mqtt".to_string()),
            tls: true,
            username: None,
            password: None,
            client_id: "telemetry-client".to_string(),
            keep_alive: Duration::from_secs(60),
            clean_session: false,
        }
    }
}

impl MqttBrokerOptions {
    /// Broker URL for websocket transports (`ws://` or `wss://`).
    pub fn websocket_url(&self) -> Option<String> {
        let path = self.ws_path.as_deref()?;
        let scheme = if self.tls { "wss" } else { "ws" };
        let path = if path.starts_with('/') { path.to_string() } else { format!("/{path}") };
        Some(format!("{scheme}://{}:{}{}", self.host, self.port, path))
    }

    pub fn to_mqtt_options(&self) -> MqttOptions {
        let mut options = match self.websocket_url() {
            Some(url) => {
                let mut options = MqttOptions::new(&self.client_id, url, self.port);
                options.set_transport(if self.tls {
                    rumqttc::Transport::wss_with_default_config()
                } else {
                    rumqttc::Transport::Ws
                });
                options
            }
            None => {
                let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
                if self.tls {
                    options.set_transport(rumqttc::Transport::tls_with_default_config());
                }
                options
            }
        };

        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(self.clean_session);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        options
    }
}

fn to_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
    }
}

struct Session {
    client: AsyncClient,
    pump: JoinHandle<()>,
}

/// A single broker session at a time.
pub struct MqttTransport {
    options: MqttBrokerOptions,
    session: Mutex<Option<Session>>,
}

impl MqttTransport {
    pub fn new(options: MqttBrokerOptions) -> Self {
        Self {
            options,
            session: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &MqttBrokerOptions {
        &self.options
    }

    async fn client(&self) -> Result<AsyncClient, TransportError> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.client.clone())
            .ok_or(TransportError::NoSession)
    }
}

/// Polls until the broker accepts or refuses the connection.
async fn await_connack(eventloop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(TransportError::Handshake(format!("broker refused connection: {code:?}"))),
                };
            }
            Ok(_) => continue,
            Err(e) => return Err(TransportError::Handshake(e.to_string())),
        }
    }
}

/// Forwards inbound traffic until the session ends or the receiver goes away.
async fn pump(mut eventloop: EventLoop, events: mpsc::UnboundedSender<TransportEvent>) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => TransportEvent::Frame {
                topic: publish.topic,
                payload: publish.payload,
            },
            Ok(Event::Incoming(Packet::Disconnect)) => {
                let _ = events.send(TransportEvent::Closed {
                    reason: Some("broker sent disconnect".to_string()),
                });
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                let _ = events.send(TransportEvent::Error { message: e.to_string() });
                return;
            }
        };

        if events.send(event).is_err() {
            tracing::debug!("Session receiver dropped, stopping MQTT pump");
            return;
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn open(&self) -> Result<TransportEvents, TransportError> {
        self.close().await?;

        let (client, mut eventloop) = AsyncClient::new(self.options.to_mqtt_options(), REQUEST_CAPACITY);
        await_connack(&mut eventloop).await?;
        tracing::info!(host = %self.options.host, port = self.options.port, "MQTT session established");

        let (tx, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump(eventloop, tx));
        *self.session.lock().await = Some(Session { client, pump });
        Ok(rx)
    }

    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), TransportError> {
        self.client()
            .await?
            .subscribe(topic, to_qos(qos))
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client()
            .await?
            .unsubscribe(topic)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn publish(&self, topic: &str, payload: Bytes, qos: Qos) -> Result<(), TransportError> {
        self.client()
            .await?
            .publish_bytes(topic, to_qos(qos), false, payload)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };
        // The request queue may already be gone if the session died.
        if let Err(e) = session.client.try_disconnect() {
            tracing::debug!(error = %e, "MQTT disconnect request not delivered");
        }
        session.pump.abort();
        Ok(())
    }
}
