//! # Sensor Data Model
//!
//! Typed representations of what flows through the ingestion pipeline: the
//! transient `RawFrame` handed over by the transport, and the immutable
//! `SensorReading` built once a frame passes schema validation.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four water-quality parameters published by the monitoring devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SensorKind {
    /// Acidity / alkalinity, 0 to 14.
    Ph,
    /// Total dissolved solids, parts per million.
    Tds,
    /// Phosphate concentration, mg/L.
    Phosphate,
    /// Tank fill level, percent.
    Level,
}

impl SensorKind {
    /// Every kind, in dashboard order.
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Ph,
        SensorKind::Tds,
        SensorKind::Phosphate,
        SensorKind::Level,
    ];

    /// The last topic segment devices publish this kind on.
    ///
    /// Topic names are case-sensitive; the level sensor firmware publishes on
    /// `Levelsensor`, so that spelling is the one matched here.
    pub fn topic_segment(self) -> &'static str {
        match self {
            SensorKind::Ph => "pHsensor",
            SensorKind::Tds => "TDSsensor",
            SensorKind::Phosphate => "phosphatesensor",
            SensorKind::Level => "Levelsensor",
        }
    }

    /// Resolves a kind from a topic's last segment (exact match).
    pub fn from_topic_segment(segment: &str) -> Option<SensorKind> {
        SensorKind::ALL
            .into_iter()
            .find(|kind| kind.topic_segment() == segment)
    }

    /// Display unit for values of this kind.
    pub fn unit(self) -> &'static str {
        match self {
            SensorKind::Ph => "pH",
            SensorKind::Tds => "ppm",
            SensorKind::Phosphate => "mg/L",
            SensorKind::Level => "%",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SensorKind::Ph => "pH",
            SensorKind::Tds => "TDS",
            SensorKind::Phosphate => "phosphate",
            SensorKind::Level => "level",
        };
        f.write_str(name)
    }
}

/// A frame exactly as the transport delivered it. Not retained past dispatch.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Topic the frame was published on.
    pub topic: String,
    /// Opaque payload bytes (cheap to clone).
    pub payload: Bytes,
    /// When the connection read path received the frame.
    pub received_at: DateTime<Utc>,
}

impl RawFrame {
    /// Stamps a frame with the current time.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

/// The fields the schema validator extracts from a payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingDraft {
    /// Kind inferred from the topic, never from the payload.
    pub kind: SensorKind,
    /// Numeric value, exactly as decoded.
    pub value: f64,
    /// Device-side timestamp of the measurement.
    pub timestamp: DateTime<Utc>,
    /// Optional unit the device attached.
    pub unit: Option<String>,
}

/// A validated reading. Immutable once constructed and shared through `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    kind: SensorKind,
    value: f64,
    timestamp: DateTime<Utc>,
    received_at: DateTime<Utc>,
    source_topic: String,
    unit: Option<String>,
    #[serde(skip)]
    raw_payload: Bytes,
}

impl SensorReading {
    /// Completes a validated draft with the frame it came from.
    pub fn from_draft(draft: ReadingDraft, frame: &RawFrame) -> Arc<Self> {
        Arc::new(Self {
            kind: draft.kind,
            value: draft.value,
            timestamp: draft.timestamp,
            received_at: frame.received_at,
            source_topic: frame.topic.clone(),
            unit: draft.unit,
            raw_payload: frame.payload.clone(),
        })
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Device-side measurement time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn source_topic(&self) -> &str {
        &self.source_topic
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// The untouched payload, kept for audit.
    pub fn raw_payload(&self) -> &Bytes {
        &self.raw_payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_segments_round_trip_to_kinds() {
        for kind in SensorKind::ALL {
            assert_eq!(SensorKind::from_topic_segment(kind.topic_segment()), Some(kind));
        }
    }

    #[test]
    fn topic_segment_match_is_case_sensitive() {
        assert_eq!(SensorKind::from_topic_segment("phsensor"), None);
        assert_eq!(SensorKind::from_topic_segment("levelsensor"), None);
        assert_eq!(SensorKind::from_topic_segment("Levelsensor"), Some(SensorKind::Level));
    }

    #[test]
    fn reading_keeps_frame_metadata() {
        let frame = RawFrame::new("waterqualitymonitoring/pHsensor", &b"{}"[..]);
        let draft = ReadingDraft {
            kind: SensorKind::Ph,
            value: 7.42,
            timestamp: Utc::now(),
            unit: None,
        };
        let reading = SensorReading::from_draft(draft, &frame);
        assert_eq!(reading.source_topic(), "waterqualitymonitoring/pHsensor");
        assert_eq!(reading.received_at(), frame.received_at);
        assert_eq!(reading.raw_payload().as_ref(), b"{}");
    }
}
