//! # Transport Seam
//!
//! The narrow interface the `ConnectionManager` drives. A transport opens one
//! broker session at a time and reports everything that happens on it as
//! `TransportEvent`s on a channel, so the manager never depends on the shape
//! of a client library's callbacks.
//!
//! The production implementation lives in `connections::mqtt_broker`; tests
//! use a scripted fake that records every call.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Delivery guarantee requested for a subscription or publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
}

/// Something that happened on an open session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// An inbound publish.
    Frame { topic: String, payload: Bytes },
    /// The broker or the network closed the session.
    Closed { reason: Option<String> },
    /// A protocol or I/O error; the session is unusable afterwards.
    Error { message: String },
}

/// Receiving half of a session's event stream.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("no open session")]
    NoSession,
    #[error("transport request failed: {0}")]
    Request(String),
}

/// A publish/subscribe broker connection.
///
/// Implementations hold at most one session. `open` replaces any previous
/// session; all other calls act on the current one.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Performs the handshake and returns the session's event stream.
    async fn open(&self) -> Result<TransportEvents, TransportError>;

    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, payload: Bytes, qos: Qos) -> Result<(), TransportError>;

    /// Releases the session. Closing with no session open is not an error.
    async fn close(&self) -> Result<(), TransportError>;
}
