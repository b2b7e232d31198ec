//! Statistics helpers over frame values.
//!
//! Placeholder samples (NaN) are skipped by every aggregate. Infinities are
//! kept out as well so a single `+Inf` sample cannot poison a summary.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Standard deviations from the mean before a value counts as anomalous
pub const DEFAULT_ANOMALY_THRESHOLD: f64 = 2.0;

/// Fewer points than this never produce anomalies
const MIN_ANOMALY_POINTS: usize = 3;

/// Descriptive statistics of one frame's values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameSummary {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub max: f64,
}

impl FrameSummary {
    fn empty() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            std: 0.0,
            min: 0.0,
            p25: 0.0,
            p50: 0.0,
            p75: 0.0,
            max: 0.0,
        }
    }
}

fn finite(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator); zero below two points
fn sample_std(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Linear-interpolated quantile over sorted values
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

pub fn summarize(values: &[f64]) -> FrameSummary {
    let mut values = finite(values);
    if values.is_empty() {
        return FrameSummary::empty();
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let mean = mean(&values);
    FrameSummary {
        count: values.len(),
        mean,
        std: sample_std(&values, mean),
        min: values[0],
        p25: quantile(&values, 0.25),
        p50: quantile(&values, 0.50),
        p75: quantile(&values, 0.75),
        max: values[values.len() - 1],
    }
}

/// Verdict for one input value, in input order
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnomalyMark {
    pub value: f64,
    pub is_anomaly: bool,
    /// Distance from the mean in standard deviations
    pub score: f64,
}

pub fn detect_anomalies(values: &[f64], threshold: f64) -> Vec<AnomalyMark> {
    let usable = finite(values);
    if usable.len() < MIN_ANOMALY_POINTS {
        return values
            .iter()
            .map(|&value| AnomalyMark {
                value,
                is_anomaly: false,
                score: 0.0,
            })
            .collect();
    }

    let mean = mean(&usable);
    let std = sample_std(&usable, mean);

    values
        .iter()
        .map(|&value| {
            if !value.is_finite() || std == 0.0 {
                return AnomalyMark {
                    value,
                    is_anomaly: false,
                    score: 0.0,
                };
            }
            let distance = (value - mean).abs();
            AnomalyMark {
                value,
                is_anomaly: distance > threshold * std,
                score: distance / std,
            }
        })
        .collect()
}

/// One point with its per-second change from the previous point
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RatePoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    /// None for the first point and for duplicate timestamps
    pub rate: Option<f64>,
}

/// Per-second rate between consecutive points, sorted by timestamp
pub fn rate_of_change(points: &[(DateTime<Utc>, f64)]) -> Vec<RatePoint> {
    let mut sorted = points.to_vec();
    sorted.sort_by_key(|(ts, _)| *ts);

    let mut out = Vec::with_capacity(sorted.len());
    let mut previous: Option<(DateTime<Utc>, f64)> = None;
    for (timestamp, value) in sorted {
        let rate = previous.and_then(|(prev_ts, prev_value)| {
            let elapsed = (timestamp - prev_ts).num_milliseconds() as f64 / 1000.0;
            (elapsed > 0.0).then(|| (value - prev_value) / elapsed)
        });
        out.push(RatePoint {
            timestamp,
            value,
            rate,
        });
        previous = Some((timestamp, value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_summary_quartiles_interpolate() {
        let summary = summarize(&[4.0, 1.0, 3.0, 2.0]);
        assert_eq!(summary.count, 4);
        assert_relative_eq!(summary.mean, 2.5);
        assert_relative_eq!(summary.p25, 1.75);
        assert_relative_eq!(summary.p50, 2.5);
        assert_relative_eq!(summary.p75, 3.25);
        assert_relative_eq!(summary.std, 1.2909944, epsilon = 1e-6);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 4.0);
    }

    #[test]
    fn test_summary_skips_placeholders() {
        let summary = summarize(&[f64::NAN, 5.0, f64::INFINITY]);
        assert_eq!(summary.count, 1);
        assert_eq!(summary.std, 0.0);
        assert_eq!(summarize(&[]).count, 0);
    }

    #[test]
    fn test_anomalies_need_three_points() {
        let marks = detect_anomalies(&[1.0, 1000.0], DEFAULT_ANOMALY_THRESHOLD);
        assert!(marks.iter().all(|m| !m.is_anomaly));
    }

    #[test]
    fn test_flat_series_has_no_anomalies() {
        let marks = detect_anomalies(&[7.0; 10], DEFAULT_ANOMALY_THRESHOLD);
        assert!(marks.iter().all(|m| !m.is_anomaly && m.score == 0.0));
    }

    #[test]
    fn test_spike_is_flagged() {
        let mut values = vec![10.0; 20];
        values.push(100.0);
        let marks = detect_anomalies(&values, DEFAULT_ANOMALY_THRESHOLD);
        assert!(marks[20].is_anomaly);
        assert!(marks[20].score > 2.0);
        assert!(!marks[0].is_anomaly);
    }

    #[test]
    fn test_rate_of_change_sorts_first() {
        let t0 = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let t1 = t0 + chrono::Duration::seconds(10);
        let t2 = t0 + chrono::Duration::seconds(30);
        let rates = rate_of_change(&[(t2, 50.0), (t0, 0.0), (t1, 10.0)]);

        assert_eq!(rates[0].rate, None);
        assert_relative_eq!(rates[1].rate.unwrap(), 1.0);
        assert_relative_eq!(rates[2].rate.unwrap(), 2.0);
        assert_eq!(rates[2].timestamp, t2);
    }
}
