//! Sensor telemetry ingestion.
//!
//! Frames arrive on a broker session owned by `core::ConnectionManager`, are
//! fanned out by `core::SubscriptionRegistry`, and are turned into classified
//! readings by `ingestors::IngestionCoordinator`, which feeds a persistence
//! sink and the in-process observers of `core::ReadingDispatcher`.
//!
//! Optional features: `mqtt` (broker transport), `postgres` (history sink),
//! `retrieve` (HTTP client and narrative analysis); `full` enables all three.

pub mod connections;
pub mod core;
pub mod ingestors;
pub mod sensors;

#[cfg(feature = "retrieve")]
pub mod retrieve;
