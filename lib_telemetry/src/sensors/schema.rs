//! # Payload Schema Validation
//!
//! Turns raw payload bytes into a `ReadingDraft` or one of four terminal
//! rejections. The expected shape is one JSON object per message:
//!
//! ```text
//! { "value": 7.42, "timestamp": "2024-01-01T00:00:00Z", "unit": "pH" }
//! ```
//!
//! Decoding is strict: numeric strings are not coerced and nothing is
//! defaulted, so a `NaN` or `null` can never reach classification.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::reading::{ReadingDraft, SensorKind};

/// Why a payload was discarded. Rejections are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rejection {
    #[error("malformed-encoding")]
    MalformedEncoding,
    #[error("missing-value-field")]
    MissingValueField,
    #[error("non-numeric-value")]
    NonNumericValue,
    #[error("unparseable-timestamp")]
    UnparseableTimestamp,
}

impl Rejection {
    pub const ALL: [Rejection; 4] = [
        Rejection::MalformedEncoding,
        Rejection::MissingValueField,
        Rejection::NonNumericValue,
        Rejection::UnparseableTimestamp,
    ];
}

/// Validates one payload for a kind already resolved from the topic.
pub fn validate(kind: SensorKind, payload: &[u8]) -> Result<ReadingDraft, Rejection> {
    let text = std::str::from_utf8(payload).map_err(|_| Rejection::MalformedEncoding)?;
    let document: Value = serde_json::from_str(text).map_err(|_| Rejection::MalformedEncoding)?;

    // Valid JSON that is not an object (a bare number, say) carries no `value` field.
    let object = document.as_object().ok_or(Rejection::MissingValueField)?;

    let value = match object.get("value") {
        None | Some(Value::Null) => return Err(Rejection::MissingValueField),
        Some(Value::Number(number)) => number.as_f64().ok_or(Rejection::NonNumericValue)?,
        Some(_) => return Err(Rejection::NonNumericValue),
    };

    let timestamp = object
        .get("timestamp")
        .and_then(parse_timestamp)
        .ok_or(Rejection::UnparseableTimestamp)?;

    let unit = object
        .get("unit")
        .and_then(Value::as_str)
        .map(str::to_owned);

    Ok(ReadingDraft {
        kind,
        value,
        timestamp,
        unit,
    })
}

/// Accepts RFC 3339, offset-less ISO-8601 (taken as UTC), or integer epoch milliseconds.
fn parse_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::String(text) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(number) => number
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_reading() {
        let draft = validate(
            SensorKind::Ph,
            br#"{"value":7.42,"timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(draft.kind, SensorKind::Ph);
        assert_eq!(draft.value.to_bits(), 7.42f64.to_bits());
        assert_eq!(draft.timestamp.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(draft.unit, None);
    }

    #[test]
    fn values_decode_bit_identical() {
        let samples: [f64; 8] = [0.0, 7.0, 7.01, 0.1 + 0.2, 1234.5678, 1e-7, 999_999.999_999, 2.2250738585072014e-308];
        for sample in samples {
            let payload = format!(r#"{{"value":{},"timestamp":"2024-05-06T07:08:09Z"}}"#, sample);
            let draft = validate(SensorKind::Tds, payload.as_bytes()).unwrap();
            assert_eq!(draft.value.to_bits(), sample.to_bits(), "sample {}", sample);
        }
    }

    #[test]
    fn integer_values_and_units_are_kept() {
        let draft = validate(
            SensorKind::Level,
            br#"{"value":55,"timestamp":"2024-01-01T00:00:00+02:00","unit":"%"}"#,
        )
        .unwrap();
        assert_eq!(draft.value, 55.0);
        assert_eq!(draft.unit.as_deref(), Some("%"));
        assert_eq!(draft.timestamp.to_rfc3339(), "2023-12-31T22:00:00+00:00");
    }

    #[test]
    fn rejects_corrupt_encodings() {
        assert_eq!(validate(SensorKind::Ph, &[0xff, 0xfe, 0x00]), Err(Rejection::MalformedEncoding));
        assert_eq!(validate(SensorKind::Ph, br#"{"value":7.4,"#), Err(Rejection::MalformedEncoding));
        assert_eq!(validate(SensorKind::Ph, b""), Err(Rejection::MalformedEncoding));
    }

    #[test]
    fn rejects_missing_value() {
        assert_eq!(
            validate(SensorKind::Ph, br#"{"timestamp":"2024-01-01T00:00:00Z"}"#),
            Err(Rejection::MissingValueField)
        );
        assert_eq!(
            validate(SensorKind::Ph, br#"{"value":null,"timestamp":"2024-01-01T00:00:00Z"}"#),
            Err(Rejection::MissingValueField)
        );
        // Bare numbers such as the dashboard's generated test data.
        assert_eq!(validate(SensorKind::Ph, b"7.42"), Err(Rejection::MissingValueField));
    }

    #[test]
    fn rejects_non_numeric_value() {
        assert_eq!(
            validate(SensorKind::Ph, br#"{"value":"7.42","timestamp":"2024-01-01T00:00:00Z"}"#),
            Err(Rejection::NonNumericValue)
        );
        assert_eq!(
            validate(SensorKind::Ph, br#"{"value":true,"timestamp":"2024-01-01T00:00:00Z"}"#),
            Err(Rejection::NonNumericValue)
        );
    }

    #[test]
    fn rejects_bad_timestamps() {
        assert_eq!(validate(SensorKind::Ph, br#"{"value":7.4}"#), Err(Rejection::UnparseableTimestamp));
        assert_eq!(
            validate(SensorKind::Ph, br#"{"value":7.4,"timestamp":"yesterday"}"#),
            Err(Rejection::UnparseableTimestamp)
        );
        assert_eq!(
            validate(SensorKind::Ph, br#"{"value":7.4,"timestamp":[2024]}"#),
            Err(Rejection::UnparseableTimestamp)
        );
    }

    #[test]
    fn timestamp_fallback_formats() {
        let naive = validate(SensorKind::Ph, br#"{"value":7,"timestamp":"2024-01-01T12:30:00"}"#).unwrap();
        assert_eq!(naive.timestamp.to_rfc3339(), "2024-01-01T12:30:00+00:00");

        let millis = validate(SensorKind::Ph, br#"{"value":7,"timestamp":1704067200000}"#).unwrap();
        assert_eq!(millis.timestamp.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }
}
