//! # Water-Quality Classification
//!
//! Maps a numeric value of a given `SensorKind` onto a labelled band. Each
//! kind has one static table, ordered by ascending bounds. Within a table the
//! bands are contiguous at the table's resolution and never overlap, so every
//! value inside the declared domain matches exactly one band.
//!
//! Lookup is pure: the value is first checked against the raw domain, then
//! quantized to the table resolution and compared in integer steps with
//! inclusive bounds. The first match wins.

use std::sync::Arc;

use serde::Serialize;

use super::reading::{SensorKind, SensorReading};

/// How urgently a band calls for attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SeverityTier {
    Optimal,
    Acceptable,
    Advisory,
    Critical,
}

/// One labelled, inclusive range of a classification table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationBand {
    pub kind: SensorKind,
    pub lower: f64,
    /// Inclusive. `f64::INFINITY` for an open-ended top band.
    pub upper: f64,
    pub label: &'static str,
    pub severity: SeverityTier,
}

impl ClassificationBand {
    const fn new(
        kind: SensorKind,
        lower: f64,
        upper: f64,
        label: &'static str,
        severity: SeverityTier,
    ) -> Self {
        Self {
            kind,
            lower,
            upper,
            label,
            severity,
        }
    }
}

/// Result of classifying one value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Classification {
    Band(&'static ClassificationBand),
    /// The value lies outside the table's domain (negative TDS, pH above 14, ...).
    Unclassified,
}

impl Classification {
    pub fn band(&self) -> Option<&'static ClassificationBand> {
        match self {
            Classification::Band(band) => Some(band),
            Classification::Unclassified => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Classification::Band(band) => band.label,
            Classification::Unclassified => "Unclassified",
        }
    }
}

/// A validated reading together with the band it fell into.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedReading {
    pub reading: Arc<SensorReading>,
    pub classification: Classification,
}

impl ClassifiedReading {
    /// Classifies `reading` against its kind's table.
    pub fn new(reading: Arc<SensorReading>) -> Self {
        let classification = classify(reading.kind(), reading.value());
        Self {
            reading,
            classification,
        }
    }
}

/// A kind's bands plus the resolution they are contiguous at.
#[derive(Debug)]
pub struct ClassificationTable {
    pub kind: SensorKind,
    /// Decimal places the bounds are expressed in.
    pub resolution: u32,
    pub bands: &'static [ClassificationBand],
}

use self::SeverityTier::{Acceptable, Advisory, Critical, Optimal};
use super::reading::SensorKind::{Level, Ph, Phosphate, Tds};

static PH_BANDS: [ClassificationBand; 13] = [
    ClassificationBand::new(Ph, 0.00, 1.99, "Extremely Acidic", Critical),
    ClassificationBand::new(Ph, 2.00, 2.99, "Highly Acidic", Critical),
    ClassificationBand::new(Ph, 3.00, 3.99, "Strongly Acidic", Critical),
    ClassificationBand::new(Ph, 4.00, 4.99, "Moderately Acidic", Advisory),
    ClassificationBand::new(Ph, 5.00, 5.99, "Weakly Acidic", Advisory),
    ClassificationBand::new(Ph, 6.00, 6.99, "Slightly Acidic", Acceptable),
    ClassificationBand::new(Ph, 7.00, 7.00, "Neutral", Optimal),
    ClassificationBand::new(Ph, 7.01, 7.99, "Slightly Alkaline", Optimal),
    ClassificationBand::new(Ph, 8.00, 8.99, "Weakly Alkaline", Acceptable),
    ClassificationBand::new(Ph, 9.00, 9.99, "Moderately Alkaline", Advisory),
    ClassificationBand::new(Ph, 10.00, 10.99, "Strongly Alkaline", Advisory),
    ClassificationBand::new(Ph, 11.00, 11.99, "Highly Alkaline", Critical),
    ClassificationBand::new(Ph, 12.00, 14.00, "Extremely Alkaline", Critical),
];

static TDS_BANDS: [ClassificationBand; 5] = [
    ClassificationBand::new(Tds, 0.0, 300.0, "Excellent", Optimal),
    ClassificationBand::new(Tds, 301.0, 500.0, "Good", Acceptable),
    ClassificationBand::new(Tds, 501.0, 900.0, "Marginal", Advisory),
    ClassificationBand::new(Tds, 901.0, 1200.0, "Very Poor (Avoid Drinking)", Critical),
    ClassificationBand::new(Tds, 1201.0, f64::INFINITY, "Unacceptable", Critical),
];

static PHOSPHATE_BANDS: [ClassificationBand; 5] = [
    ClassificationBand::new(Phosphate, 0.00, 0.10, "Excellent", Optimal),
    ClassificationBand::new(Phosphate, 0.11, 0.50, "Normal", Acceptable),
    ClassificationBand::new(Phosphate, 0.51, 1.00, "Elevated", Advisory),
    ClassificationBand::new(Phosphate, 1.01, 2.00, "High", Critical),
    ClassificationBand::new(Phosphate, 2.01, f64::INFINITY, "Severe", Critical),
];

static LEVEL_BANDS: [ClassificationBand; 5] = [
    ClassificationBand::new(Level, 0.0, 10.0, "Critically Low", Critical),
    ClassificationBand::new(Level, 10.1, 25.0, "Low", Advisory),
    ClassificationBand::new(Level, 25.1, 75.0, "Normal", Optimal),
    ClassificationBand::new(Level, 75.1, 95.0, "High", Acceptable),
    ClassificationBand::new(Level, 95.1, 100.0, "Full", Advisory),
];

static PH_TABLE: ClassificationTable = ClassificationTable {
    kind: Ph,
    resolution: 2,
    bands: &PH_BANDS,
};

static TDS_TABLE: ClassificationTable = ClassificationTable {
    kind: Tds,
    resolution: 0,
    bands: &TDS_BANDS,
};

static PHOSPHATE_TABLE: ClassificationTable = ClassificationTable {
    kind: Phosphate,
    resolution: 2,
    bands: &PHOSPHATE_BANDS,
};

static LEVEL_TABLE: ClassificationTable = ClassificationTable {
    kind: Level,
    resolution: 1,
    bands: &LEVEL_BANDS,
};

/// The static table for a kind.
pub fn table(kind: SensorKind) -> &'static ClassificationTable {
    match kind {
        Ph => &PH_TABLE,
        Tds => &TDS_TABLE,
        Phosphate => &PHOSPHATE_TABLE,
        Level => &LEVEL_TABLE,
    }
}

impl ClassificationTable {
    fn scale(&self) -> f64 {
        10f64.powi(self.resolution as i32)
    }

    /// Converts a value to whole resolution steps. Saturates at the i64 range,
    /// which maps an infinite upper bound to `i64::MAX`.
    pub fn to_steps(&self, value: f64) -> i64 {
        (value * self.scale()).round() as i64
    }

    /// Lowest value of the declared domain.
    pub fn domain_min(&self) -> f64 {
        self.bands.first().map_or(f64::NAN, |band| band.lower)
    }

    /// Highest value of the declared domain (may be infinite).
    pub fn domain_max(&self) -> f64 {
        self.bands.last().map_or(f64::NAN, |band| band.upper)
    }

    /// Linear scan in ascending-bound order; first inclusive match wins.
    pub fn classify(&self, value: f64) -> Classification {
        if value.is_nan() || value < self.domain_min() || value > self.domain_max() {
            return Classification::Unclassified;
        }
        let steps = self.to_steps(value);
        self.bands
            .iter()
            .find(|band| steps >= self.to_steps(band.lower) && steps <= self.to_steps(band.upper))
            .map_or(Classification::Unclassified, Classification::Band)
    }
}

/// Classifies a value against its kind's table.
pub fn classify(kind: SensorKind, value: f64) -> Classification {
    table(kind).classify(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(kind: SensorKind, value: f64) -> &'static str {
        classify(kind, value).label()
    }

    #[test]
    fn tables_are_contiguous_and_ordered() {
        for kind in SensorKind::ALL {
            let table = table(kind);
            for band in table.bands {
                assert_eq!(band.kind, kind);
                assert!(table.to_steps(band.lower) <= table.to_steps(band.upper), "{:?}", band);
            }
            for pair in table.bands.windows(2) {
                assert_eq!(
                    table.to_steps(pair[0].upper) + 1,
                    table.to_steps(pair[1].lower),
                    "gap or overlap between {:?} and {:?}",
                    pair[0].label,
                    pair[1].label
                );
            }
        }
    }

    #[test]
    fn every_step_of_the_bounded_domain_matches_exactly_one_band() {
        for kind in SensorKind::ALL {
            let table = table(kind);
            let first = table.to_steps(table.domain_min());
            // Open-ended tables are walked up to their last finite bound plus a margin.
            let last = table
                .bands
                .iter()
                .map(|band| if band.upper.is_finite() { band.upper } else { band.lower + 50.0 })
                .map(|bound| table.to_steps(bound))
                .max()
                .unwrap();
            let scale = 10f64.powi(table.resolution as i32);
            for step in first..=last {
                let value = step as f64 / scale;
                let matches = table
                    .bands
                    .iter()
                    .filter(|band| step >= table.to_steps(band.lower) && step <= table.to_steps(band.upper))
                    .count();
                assert_eq!(matches, 1, "{} value {} matched {} bands", kind, value, matches);
                assert!(classify(kind, value).band().is_some());
            }
        }
    }

    #[test]
    fn ph_reference_points() {
        assert_eq!(label(SensorKind::Ph, 7.42), "Slightly Alkaline");
        assert_eq!(label(SensorKind::Ph, 7.00), "Neutral");
        assert_eq!(label(SensorKind::Ph, 7.01), "Slightly Alkaline");
        assert_eq!(label(SensorKind::Ph, 6.99), "Slightly Acidic");
        assert_eq!(label(SensorKind::Ph, 0.0), "Extremely Acidic");
        assert_eq!(label(SensorKind::Ph, 14.0), "Extremely Alkaline");
    }

    #[test]
    fn ph_values_between_printed_bounds_are_quantized() {
        assert_eq!(label(SensorKind::Ph, 6.996), "Neutral");
        assert_eq!(label(SensorKind::Ph, 6.994), "Slightly Acidic");
    }

    #[test]
    fn tds_900_is_marginal_and_901_is_very_poor() {
        let at_900 = classify(SensorKind::Tds, 900.0).band().unwrap();
        assert_eq!(at_900.label, "Marginal");
        assert_eq!((at_900.lower, at_900.upper), (501.0, 900.0));

        let at_901 = classify(SensorKind::Tds, 901.0).band().unwrap();
        assert_eq!(at_901.label, "Very Poor (Avoid Drinking)");
        assert_eq!((at_901.lower, at_901.upper), (901.0, 1200.0));
    }

    #[test]
    fn out_of_domain_values_are_unclassified() {
        assert_eq!(classify(SensorKind::Tds, -1.0), Classification::Unclassified);
        assert_eq!(classify(SensorKind::Tds, -0.2), Classification::Unclassified);
        assert_eq!(classify(SensorKind::Ph, 14.01), Classification::Unclassified);
        assert_eq!(classify(SensorKind::Level, 100.5), Classification::Unclassified);
        assert_eq!(classify(SensorKind::Phosphate, f64::NAN), Classification::Unclassified);
    }

    #[test]
    fn open_ended_bands_catch_large_values() {
        assert_eq!(label(SensorKind::Tds, 25_000.0), "Unacceptable");
        assert_eq!(label(SensorKind::Phosphate, 1e9), "Severe");
    }

    #[test]
    fn classification_is_deterministic() {
        for _ in 0..100 {
            assert_eq!(classify(SensorKind::Phosphate, 0.5), classify(SensorKind::Phosphate, 0.5));
        }
        assert_eq!(label(SensorKind::Phosphate, 0.5), "Normal");
    }
}
