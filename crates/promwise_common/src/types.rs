//! Core data model shared by the gateway, the reasoning client and the agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Reserved label carrying the metric name
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Label set of a series, alert or rule
pub type Labels = BTreeMap<String, String>;

// ============================================================================
// Series and frames
// ============================================================================

/// One (timestamp, raw value) pair as reported by the backend.
///
/// The value stays a string until normalization; the backend uses strings
/// such as `"NaN"` or `"+Inf"` for placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Unix seconds, fractional
    pub timestamp: f64,
    pub value: String,
}

/// One uniquely-labeled stream of samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub labels: Labels,
    /// Non-decreasing by timestamp, in backend order
    pub samples: Vec<Sample>,
}

impl MetricSeries {
    pub fn name(&self) -> Option<&str> {
        self.labels.get(METRIC_NAME_LABEL).map(String::as_str)
    }

    /// Compact `name{k="v",...}` rendering used in logs and error messages
    pub fn selector(&self) -> String {
        let name = self.name().unwrap_or("");
        let pairs: Vec<String> = self
            .labels
            .iter()
            .filter(|(k, _)| k.as_str() != METRIC_NAME_LABEL)
            .map(|(k, v)| format!("{}=\"{}\"", k, v))
            .collect();
        format!("{}{{{}}}", name, pairs.join(","))
    }
}

/// Which query mode produced a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Instant,
    Range,
}

/// One materialized sample with its series labels as columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRow {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub labels: Labels,
}

/// Row-oriented view of one query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularFrame {
    pub kind: ResultKind,
    pub rows: Vec<FrameRow>,
}

impl TabularFrame {
    pub fn empty(kind: ResultKind) -> Self {
        Self {
            kind,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.value).collect()
    }

    /// Union of label keys across all rows
    pub fn label_columns(&self) -> BTreeSet<String> {
        self.rows
            .iter()
            .flat_map(|r| r.labels.keys().cloned())
            .collect()
    }

    /// Rows grouped per series, in first-seen order
    pub fn series(&self) -> Vec<(&Labels, Vec<&FrameRow>)> {
        let mut groups: Vec<(&Labels, Vec<&FrameRow>)> = Vec::new();
        for row in &self.rows {
            match groups.iter_mut().find(|(labels, _)| *labels == &row.labels) {
                Some((_, rows)) => rows.push(row),
                None => groups.push((&row.labels, vec![row])),
            }
        }
        groups
    }

    pub fn series_count(&self) -> usize {
        self.series().len()
    }
}

/// Optional bracket for series enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

// ============================================================================
// Alerts and rules
// ============================================================================

/// Lifecycle state of an active alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Pending,
    Firing,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Pending => "pending",
            AlertState::Firing => "firing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: Labels,
    pub state: AlertState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Alert {
    pub fn name(&self) -> Option<&str> {
        self.labels.get("alertname").map(String::as_str)
    }

    pub fn instance(&self) -> Option<&str> {
        self.labels.get("instance").map(String::as_str)
    }

    pub fn severity(&self) -> &str {
        self.labels
            .get("severity")
            .map(String::as_str)
            .unwrap_or("unknown")
    }

    pub fn numeric_value(&self) -> Option<f64> {
        self.value.as_deref().and_then(|v| v.parse().ok())
    }
}

/// Alerting rule as reported by the rules endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertingRule {
    pub name: String,
    pub query: String,
    /// Required sustain duration in seconds
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: Labels,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Metadata entry for a metric name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricMetadata {
    #[serde(rename = "type")]
    pub metric_type: String,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub unit: String,
}

// ============================================================================
// Conversation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}
