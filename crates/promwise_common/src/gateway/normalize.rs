//! Result normalization - series shaped results into tabular frames.
//!
//! Instantaneous results yield one row per series, ranged results one row per
//! sample per series. The label set of each series becomes row columns.

use chrono::{DateTime, Utc};

use crate::error::GatewayError;
use crate::types::{FrameRow, MetricSeries, ResultKind, Sample, TabularFrame};

/// Decoded query result, closed over the two supported shapes
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Instant(Vec<MetricSeries>),
    Range(Vec<MetricSeries>),
}

impl QueryResult {
    pub fn kind(&self) -> ResultKind {
        match self {
            QueryResult::Instant(_) => ResultKind::Instant,
            QueryResult::Range(_) => ResultKind::Range,
        }
    }

    pub fn series(&self) -> &[MetricSeries] {
        match self {
            QueryResult::Instant(series) | QueryResult::Range(series) => series,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.series().is_empty()
    }

    /// Flatten into rows, coercing every value to a number
    pub fn normalize(&self) -> Result<TabularFrame, GatewayError> {
        let mut rows = Vec::new();

        match self {
            QueryResult::Instant(series) => {
                for s in series {
                    // An instant vector element carries exactly one sample
                    if let Some(sample) = s.samples.first() {
                        rows.push(to_row(s, sample)?);
                    }
                }
            }
            QueryResult::Range(series) => {
                for s in series {
                    for sample in &s.samples {
                        rows.push(to_row(s, sample)?);
                    }
                }
            }
        }

        Ok(TabularFrame {
            kind: self.kind(),
            rows,
        })
    }
}

fn to_row(series: &MetricSeries, sample: &Sample) -> Result<FrameRow, GatewayError> {
    let value = parse_value(&sample.value).ok_or_else(|| GatewayError::MalformedSample {
        series: series.selector(),
        raw: sample.value.clone(),
    })?;

    let timestamp = to_datetime(sample.timestamp).ok_or_else(|| GatewayError::MalformedSample {
        series: series.selector(),
        raw: sample.timestamp.to_string(),
    })?;

    Ok(FrameRow {
        timestamp,
        value,
        labels: series.labels.clone(),
    })
}

/// Parse a sample value; NaN and +/-Inf placeholders are valid numbers
pub fn parse_value(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok()
}

/// Convert fractional unix seconds into a UTC timestamp
pub fn to_datetime(unix_secs: f64) -> Option<DateTime<Utc>> {
    if !unix_secs.is_finite() {
        return None;
    }
    let secs = unix_secs.floor();
    let nanos = ((unix_secs - secs) * 1_000_000_000.0).round() as u32;
    DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Labels, METRIC_NAME_LABEL};

    fn series(instance: &str, points: &[(f64, &str)]) -> MetricSeries {
        let mut labels = Labels::new();
        labels.insert(METRIC_NAME_LABEL.to_string(), "up".to_string());
        labels.insert("instance".to_string(), instance.to_string());
        MetricSeries {
            labels,
            samples: points
                .iter()
                .map(|(ts, v)| Sample {
                    timestamp: *ts,
                    value: v.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_instant_yields_one_row_per_series() {
        let result = QueryResult::Instant(vec![
            series("a", &[(1_700_000_000.0, "1")]),
            series("b", &[(1_700_000_000.0, "0")]),
            series("c", &[(1_700_000_000.0, "1")]),
        ]);
        let frame = result.normalize().unwrap();
        assert_eq!(frame.kind, ResultKind::Instant);
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.rows[1].labels.get("instance").unwrap(), "b");
        assert_eq!(frame.rows[1].value, 0.0);
    }

    #[test]
    fn test_range_yields_row_per_sample_in_order() {
        let points = [
            (1_700_000_000.0, "1"),
            (1_700_000_060.0, "2"),
            (1_700_000_120.0, "3"),
            (1_700_000_180.0, "4"),
        ];
        let result = QueryResult::Range(vec![series("a", &points), series("b", &points)]);
        let frame = result.normalize().unwrap();
        assert_eq!(frame.len(), 8);

        for (_, rows) in frame.series() {
            assert_eq!(rows.len(), 4);
            assert!(rows.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        }
    }

    #[test]
    fn test_placeholder_values_parse() {
        let result = QueryResult::Instant(vec![
            series("a", &[(1.0, "NaN")]),
            series("b", &[(1.0, "+Inf")]),
            series("c", &[(1.0, "-Inf")]),
        ]);
        let frame = result.normalize().unwrap();
        assert!(frame.rows[0].value.is_nan());
        assert_eq!(frame.rows[1].value, f64::INFINITY);
        assert_eq!(frame.rows[2].value, f64::NEG_INFINITY);
    }

    #[test]
    fn test_non_numeric_value_is_malformed_sample() {
        let result = QueryResult::Range(vec![series("a", &[(1.0, "1"), (2.0, "oops")])]);
        match result.normalize() {
            Err(GatewayError::MalformedSample { series, raw }) => {
                assert_eq!(raw, "oops");
                assert!(series.contains("instance=\"a\""));
            }
            other => panic!("expected MalformedSample, got {:?}", other),
        }
    }

    #[test]
    fn test_fractional_timestamp_conversion() {
        let dt = to_datetime(1_700_000_000.5).unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
        assert_eq!(dt.timestamp_subsec_millis(), 500);
        assert!(to_datetime(f64::NAN).is_none());
    }

    #[test]
    fn test_empty_result_normalizes_to_empty_frame() {
        let frame = QueryResult::Range(vec![]).normalize().unwrap();
        assert!(frame.is_empty());
        assert_eq!(frame.kind, ResultKind::Range);
    }
}
