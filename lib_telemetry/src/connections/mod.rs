//! # Connections Module
//!
//! This module handles connections to external services: the broker the
//! readings arrive from and the store they are persisted to.

/// Persistence sink contract and the logging fallback sink.
pub mod sink;

/// PostgreSQL history sink with connection pooling.
#[cfg(feature = "postgres")]
pub mod db_postgres;

/// rumqttc-backed broker transport.
#[cfg(feature = "mqtt")]
pub mod mqtt_broker;

pub use sink::{PersistenceSink, SensorRecord, SinkError, TracingSink};
#[cfg(feature = "postgres")]
pub use db_postgres::{DbError, PostgresSink};
#[cfg(feature = "mqtt")]
pub use mqtt_broker::{MqttBrokerOptions, MqttTransport};
