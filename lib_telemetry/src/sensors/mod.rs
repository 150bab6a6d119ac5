//! # Sensors Module
//!
//! The pure, stateless half of the ingestion pipeline: the typed data model,
//! topic naming, payload schema validation and the classification tables.
//! Nothing in here performs I/O or holds mutable state.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Reading, frame and sensor kind types.
pub mod reading;
/// Topic naming for readings, commands and keepalive.
pub mod topics;
/// Raw payload to `ReadingDraft` validation.
pub mod schema;
/// Band lookup tables per sensor kind.
pub mod classification;

// --- Public API Re-exports ---
pub use reading::{RawFrame, ReadingDraft, SensorKind, SensorReading};
pub use topics::{DeviceCommand, TopicScheme, DEFAULT_DOMAIN};
pub use schema::{validate, Rejection};
pub use classification::{classify, Classification, ClassificationBand, ClassifiedReading, SeverityTier};
