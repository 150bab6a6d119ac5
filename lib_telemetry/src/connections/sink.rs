//! # Persistence Sink
//!
//! The contract between the ingestion coordinator and whatever stores
//! readings. The coordinator only ever calls `store` from its persistence
//! worker, so implementations may be slow without affecting frame dispatch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::sensors::{SensorKind, SensorReading};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The backing store could not be reached.
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    /// The store was reached but rejected the write.
    #[error("sink write failed: {0}")]
    Write(String),
}

/// One history row, as handed to a sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorRecord {
    pub kind: SensorKind,
    /// Last topic segment (`pHsensor`, `TDSsensor`, ...).
    pub sensor_type: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub topic: String,
    /// The payload as received, parsed back to JSON for storage.
    pub raw_message: Value,
}

impl SensorRecord {
    pub fn from_reading(reading: &SensorReading) -> Self {
        let topic = reading.source_topic();
        let sensor_type = topic.rsplit('/').next().unwrap_or(topic).to_string();
        // Accepted payloads are always JSON; keep the text if that ever changes.
        let raw_message = serde_json::from_slice(reading.raw_payload())
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(reading.raw_payload()).into_owned()));

        Self {
            kind: reading.kind(),
            sensor_type,
            value: reading.value(),
            timestamp: reading.timestamp(),
            topic: topic.to_string(),
            raw_message,
        }
    }
}

/// Somewhere readings are kept.
#[async_trait]
pub trait PersistenceSink: Send + Sync + 'static {
    async fn store(&self, record: &SensorRecord) -> Result<(), SinkError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "sink"
    }
}

/// Logs every record. Used when no database is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl PersistenceSink for TracingSink {
    async fn store(&self, record: &SensorRecord) -> Result<(), SinkError> {
        tracing::info!(
            sensor_type = %record.sensor_type,
            value = record.value,
            timestamp = %record.timestamp,
            topic = %record.topic,
            "Reading recorded"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{RawFrame, ReadingDraft};
    use chrono::TimeZone;

    #[test]
    fn record_uses_last_topic_segment_and_parsed_payload() {
        let frame = RawFrame::new(
            "waterqualitymonitoring/TDSsensor",
            &br#"{"value":412,"timestamp":"2024-01-01T00:00:00Z"}"#[..],
        );
        let draft = ReadingDraft {
            kind: SensorKind::Tds,
            value: 412.0,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            unit: None,
        };
        let reading = SensorReading::from_draft(draft, &frame);

        let record = SensorRecord::from_reading(&reading);

        assert_eq!(record.sensor_type, "TDSsensor");
        assert_eq!(record.topic, "waterqualitymonitoring/TDSsensor");
        assert_eq!(record.raw_message["value"], 412);
    }

    #[tokio::test]
    async fn tracing_sink_accepts_everything() {
        let frame = RawFrame::new("d/pHsensor", &br#"{"value":7}"#[..]);
        let draft = ReadingDraft {
            kind: SensorKind::Ph,
            value: 7.0,
            timestamp: Utc::now(),
            unit: None,
        };
        let record = SensorRecord::from_reading(&SensorReading::from_draft(draft, &frame));
        assert_eq!(TracingSink.store(&record).await, Ok(()));
    }
}
