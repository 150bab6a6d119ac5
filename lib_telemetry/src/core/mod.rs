//! # Core Engine Module
//!
//! The stateful half of the ingestion pipeline: everything between the broker
//! session and the handlers that consume inbound frames.
//!
//! ## Core Components:
//!
//! - **`transport`**: The seam to the broker. A `Transport` opens a session and
//!   reports frames, closes and errors as events on a channel.
//!
//! - **`registry`**: The subscription registry. Maps topics to ordered handlers,
//!   is the source of truth for what must be subscribed on the wire, and fans
//!   inbound frames out with per-handler failure isolation.
//!
//! - **`connection_manager`**: The state machine that owns the session. It
//!   connects, resubscribes, keeps the session alive and reconnects with
//!   bounded exponential backoff until it gives up in `Failed`.
//!
//! - **`dispatcher`**: The zero-copy broadcaster for classified readings. It
//!   feeds in-process observers and keeps the latest value per sensor kind.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Transport trait, events and QoS.
pub mod transport;
/// Topic to handler mapping with isolated dispatch.
pub mod registry;
/// Session lifecycle state machine.
pub mod connection_manager;
/// Observer fan-out and latest-value cache.
pub mod dispatcher;

// --- Public API Re-exports ---
pub use transport::{Qos, Transport, TransportError, TransportEvent, TransportEvents};
pub use registry::{DispatchReport, FrameHandler, HandlerError, Registration, SubscriptionHandle, SubscriptionRegistry};
pub use connection_manager::{
    ConnectionConfig, ConnectionError, ConnectionManager, ConnectionState, ConnectionStatus, ReconnectState,
};
pub use dispatcher::{LatestReadings, ReadingDispatcher};
