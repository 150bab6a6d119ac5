//! # Data Ingestors Module
//!
//! Consumers that turn inbound broker frames into typed, classified readings.
//!
//! ## Contained Modules:
//! - **`sensor_ingestor`**: The ingestion coordinator registered for every
//!   sensor topic. It validates, classifies, persists through a
//!   `PersistenceSink` and broadcasts to in-process observers.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Validation, classification, persistence and fan-out of sensor frames.
pub mod sensor_ingestor;

// --- Public API Re-exports ---
pub use sensor_ingestor::{
    DeadLetter, IngestionConfig, IngestionCoordinator, IngestionStats, RejectionCounts, DEFAULT_DEAD_LETTER_CAPACITY,
};
