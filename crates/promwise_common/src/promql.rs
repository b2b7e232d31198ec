//! PromQL text helpers.
//!
//! These only look at expression text. Nothing here decides whether an
//! expression is valid; the metrics backend is the syntax authority.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

use crate::types::Labels;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromqlTextError {
    #[error("Invalid time range format: {0}")]
    InvalidTimeRange(String),
}

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([a-zA-Z_:][a-zA-Z0-9_:]*)\b(\s*\()?").unwrap());

static QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""(?:[^"\\]|\\.)*""#).unwrap());

/// Label matchers, range selectors and grouping clauses
static NON_METRIC_SPANS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{[^}]*\}|\[[^\]]*\]|\b(?:by|without|on|ignoring|group_left|group_right)\s*\([^)]*\)")
        .unwrap()
});

static TIME_RANGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)([smhd])$").unwrap());

static INVALID_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9_:]").unwrap());

const KEYWORDS: &[&str] = &[
    "and", "or", "unless", "by", "without", "on", "ignoring", "group_left", "group_right",
    "offset", "bool", "inf", "nan",
];

/// Functions and aggregations that may appear without parentheses nearby
const FUNCTIONS: &[&str] = &[
    "rate", "irate", "increase", "delta", "changes", "sum", "avg", "max", "min", "count",
    "topk", "bottomk", "histogram_quantile", "sort", "sort_desc", "time", "vector", "scalar",
];

/// True when the expression uses a rate-style or increase-style function.
///
/// Such expressions only make sense over a range, so the caller should run
/// them as a range query.
pub fn is_rate_style(expression: &str) -> bool {
    expression.contains("rate(") || expression.contains("increase(")
}

/// Metric names referenced by an expression, de-duplicated and sorted
pub fn extract_metric_names(expression: &str) -> Vec<String> {
    let without_strings = QUOTED.replace_all(expression, " ");
    let stripped = NON_METRIC_SPANS.replace_all(&without_strings, " ");

    let names: BTreeSet<String> = IDENTIFIER
        .captures_iter(&stripped)
        .filter(|caps| caps.get(2).is_none())
        .map(|caps| caps[1].to_string())
        .filter(|name| {
            let lower = name.to_lowercase();
            !KEYWORDS.contains(&lower.as_str()) && !FUNCTIONS.contains(&lower.as_str())
        })
        .collect();

    names.into_iter().collect()
}

/// Parse `30s`, `5m`, `1h` or `7d`
pub fn parse_time_range(text: &str) -> Result<Duration, PromqlTextError> {
    let lower = text.trim().to_lowercase();
    let caps = TIME_RANGE
        .captures(&lower)
        .ok_or_else(|| PromqlTextError::InvalidTimeRange(text.to_string()))?;

    let value: u64 = caps[1]
        .parse()
        .map_err(|_| PromqlTextError::InvalidTimeRange(text.to_string()))?;
    let unit_secs = match &caps[2] {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => return Err(PromqlTextError::InvalidTimeRange(text.to_string())),
    };

    Ok(Duration::from_secs(value * unit_secs))
}

/// Replace characters not allowed in metric names; prefix `_` if needed
pub fn sanitize_metric_name(name: &str) -> String {
    let sanitized = INVALID_NAME_CHARS.replace_all(name, "_").into_owned();
    match sanitized.chars().next() {
        Some(c) if !(c.is_ascii_alphabetic() || c == '_') => format!("_{}", sanitized),
        _ => sanitized,
    }
}

/// Quote a string for use as a label value inside a selector
pub fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

/// Parse a label set such as `{job="node",path="a,b"}`
pub fn parse_label_set(text: &str) -> Labels {
    let inner = text.trim().trim_start_matches('{').trim_end_matches('}');
    let mut labels = Labels::new();

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in inner.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);

    for part in parts {
        if let Some((key, value)) = part.split_once('=') {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            labels.insert(key.to_string(), value.trim().trim_matches('"').to_string());
        }
    }
    labels
}

/// Human-readable duration with one decimal: `45.0s`, `2.5m`, `1.0h`, `3.0d`
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        format!("{:.1}m", seconds / 60.0)
    } else if seconds < 86400.0 {
        format!("{:.1}h", seconds / 3600.0)
    } else {
        format!("{:.1}d", seconds / 86400.0)
    }
}

/// Human-readable size with 1024 steps: `512.0B`, `1.5KB`, `2.0GB`
pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut value = bytes;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{:.1}{}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.1}EB", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_style_detection() {
        assert!(is_rate_style("rate(http_requests_total[5m])"));
        assert!(is_rate_style("sum(increase(errors_total[1h]))"));
        assert!(is_rate_style("irate(cpu_seconds_total[1m])"));
        assert!(!is_rate_style("up"));
        assert!(!is_rate_style("node_memory_MemAvailable_bytes"));
    }

    #[test]
    fn test_extract_metric_names() {
        let names = extract_metric_names(
            r#"sum by (job) (rate(http_requests_total{status="500",job=~"api.*"}[5m])) / on(job) sum(rate(http_requests_total[5m])) and up"#,
        );
        assert_eq!(names, vec!["http_requests_total", "up"]);
    }

    #[test]
    fn test_extract_handles_histogram_quantile() {
        let names = extract_metric_names(
            "histogram_quantile(0.95, rate(http_request_duration_seconds_bucket[5m]))",
        );
        assert_eq!(names, vec!["http_request_duration_seconds_bucket"]);
    }

    #[test]
    fn test_parse_time_range() {
        assert_eq!(parse_time_range("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_time_range("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_time_range("1H").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_time_range("7d").unwrap(), Duration::from_secs(604_800));
        assert!(parse_time_range("1w").is_err());
        assert!(parse_time_range("h").is_err());
    }

    #[test]
    fn test_sanitize_metric_name() {
        assert_eq!(sanitize_metric_name("http.requests-total"), "http_requests_total");
        assert_eq!(sanitize_metric_name("9lives"), "_9lives");
        assert_eq!(sanitize_metric_name(""), "");
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("node-1:9100"), "node-1:9100");
        assert_eq!(escape_label_value(r#"a"b"#), r#"a\"b"#);
        assert_eq!(escape_label_value(r"C:\temp"), r"C:\\temp");
        assert_eq!(escape_label_value("two\nlines"), "two\\nlines");
    }

    #[test]
    fn test_parse_label_set_keeps_quoted_commas() {
        let labels = parse_label_set(r#"{job="node",path="/a,b",instance="localhost:9090"}"#);
        assert_eq!(labels.len(), 3);
        assert_eq!(labels["path"], "/a,b");
        assert_eq!(labels["instance"], "localhost:9090");
        assert!(parse_label_set("{}").is_empty());
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_duration(45.0), "45.0s");
        assert_eq!(format_duration(150.0), "2.5m");
        assert_eq!(format_duration(3600.0), "1.0h");
        assert_eq!(format_duration(259_200.0), "3.0d");
        assert_eq!(format_bytes(512.0), "512.0B");
        assert_eq!(format_bytes(1536.0), "1.5KB");
        assert_eq!(format_bytes(2.0 * 1024.0 * 1024.0 * 1024.0), "2.0GB");
    }
}
