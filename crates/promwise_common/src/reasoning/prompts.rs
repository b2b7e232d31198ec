//! Prompt construction for the reasoning tasks.
//!
//! COST: every list handed to the model is capped here; nothing else trims.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::stats::{self, FrameSummary};
use crate::types::{Alert, TabularFrame};

/// Metric names offered to the query generator
pub const MAX_QUERY_METRIC_NAMES: usize = 50;

/// Metric names offered to the improvement advisor
pub const MAX_ADVICE_METRIC_NAMES: usize = 100;

/// Prior turns replayed into a chat prompt
pub const MAX_HISTORY_TURNS: usize = 10;

/// Sampling settings per task
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskProfile {
    pub temperature: f32,
    pub max_tokens: u32,
}

pub const ANALYSIS: TaskProfile = TaskProfile {
    temperature: 0.3,
    max_tokens: 1500,
};

pub const QUERY_GENERATION: TaskProfile = TaskProfile {
    temperature: 0.1,
    max_tokens: 500,
};

pub const ALERT_EXPLANATION: TaskProfile = TaskProfile {
    temperature: 0.3,
    max_tokens: 1200,
};

pub const IMPROVEMENTS: TaskProfile = TaskProfile {
    temperature: 0.4,
    max_tokens: 1500,
};

pub const CHAT: TaskProfile = TaskProfile {
    temperature: 0.7,
    max_tokens: 1000,
};

pub const ANALYSIS_SYSTEM: &str = r#"You are an expert in Prometheus monitoring.
Analyze the metrics data you are given and produce actionable insights. Cover:
1. Anomalies and concerning trends
2. Performance bottlenecks
3. Resource utilization patterns
4. Issues that need attention
5. Optimization recommendations
Structure the answer with one clear section per kind of insight."#;

pub const QUERY_SYSTEM: &str = r#"You are a PromQL expert. Turn natural language questions
into PromQL expressions using the available metrics listed by the user.
Reply with the PromQL expression only. If no expression can be written, explain why."#;

pub const ALERT_SYSTEM: &str = r#"You are a DevOps engineer specialized in monitoring and
incident response. For the alert you are given, explain:
1. What the alert means in plain language
2. Likely root causes
3. Immediate troubleshooting steps
4. Long-term prevention
Keep the advice practical."#;

pub const IMPROVEMENTS_SYSTEM: &str = r#"You are an observability expert. Review the current
monitoring setup and propose improvements for observability, performance tracking
and incident detection."#;

/// Per-metric statistics that travel with the raw rows
#[derive(Debug, Clone, Serialize)]
pub struct MetricDigest {
    pub series: usize,
    pub summary: FrameSummary,
    pub anomalies: usize,
    /// Steepest per-second change across the series; none for instant data
    pub peak_rate: Option<f64>,
}

impl MetricDigest {
    pub fn of(frame: &TabularFrame) -> Self {
        let values = frame.values();
        let anomalies = stats::detect_anomalies(&values, stats::DEFAULT_ANOMALY_THRESHOLD)
            .iter()
            .filter(|m| m.is_anomaly)
            .count();
        let peak_rate = frame
            .series()
            .iter()
            .flat_map(|(_, rows)| {
                let points: Vec<_> = rows.iter().map(|r| (r.timestamp, r.value)).collect();
                stats::rate_of_change(&points)
            })
            .filter_map(|p| p.rate)
            .filter(|r| r.is_finite())
            .max_by(|a, b| a.abs().total_cmp(&b.abs()));

        Self {
            series: frame.series_count(),
            summary: stats::summarize(&values),
            anomalies,
            peak_rate,
        }
    }
}

#[derive(Debug, Serialize)]
struct AnalysisPayload<'a> {
    generated_at: DateTime<Utc>,
    metrics: &'a BTreeMap<String, TabularFrame>,
    digests: BTreeMap<&'a str, MetricDigest>,
    alerts: &'a [Alert],
}

pub fn analysis_user_prompt(
    metrics: &BTreeMap<String, TabularFrame>,
    alerts: &[Alert],
    context: &str,
) -> Result<String, serde_json::Error> {
    let payload = AnalysisPayload {
        generated_at: Utc::now(),
        metrics,
        digests: metrics
            .iter()
            .map(|(name, frame)| (name.as_str(), MetricDigest::of(frame)))
            .collect(),
        alerts,
    };
    let data = serde_json::to_string_pretty(&payload)?;
    let context = if context.is_empty() {
        "No additional context provided"
    } else {
        context
    };

    Ok(format!(
        r#"Analyze the following Prometheus metrics data:

{data}

Additional context: {context}

Include:
- Key findings and anomalies
- Performance insights
- Recommendations for improvement
- Urgent issues needing immediate attention"#
    ))
}

pub fn query_user_prompt(question: &str, available_metrics: &[String]) -> String {
    let names: Vec<&str> = available_metrics
        .iter()
        .take(MAX_QUERY_METRIC_NAMES)
        .map(String::as_str)
        .collect();

    format!(
        r#"Available metrics: {}

Natural language query: "{}"

Write a PromQL query for this request. Consider:
- Common patterns (rate, histogram_quantile, ...)
- Suitable time ranges and aggregations
- Label filtering"#,
        names.join(", "),
        question
    )
}

pub fn alert_user_prompt(
    alert: &Alert,
    related: &BTreeMap<String, TabularFrame>,
) -> Result<String, serde_json::Error> {
    let alert_json = serde_json::to_string_pretty(alert)?;
    let related_json = if related.is_empty() {
        "No additional metrics provided".to_string()
    } else {
        serde_json::to_string_pretty(related)?
    };

    Ok(format!(
        r#"Alert information:
{alert_json}

Additional metrics context:
{related_json}

Provide:
1. A clear explanation of what this alert indicates
2. Possible causes
3. A step-by-step troubleshooting guide
4. Prevention recommendations"#
    ))
}

pub fn improvements_user_prompt(current_metrics: &[String], system_description: &str) -> String {
    let names: Vec<&str> = current_metrics
        .iter()
        .take(MAX_ADVICE_METRIC_NAMES)
        .map(String::as_str)
        .collect();

    format!(
        r#"System description: {}

Metrics currently monitored:
{}

Suggest:
1. Missing critical metrics
2. Alerting rules worth adding
3. Monitoring best practices for this kind of system
4. Dashboards and visualizations"#,
        system_description,
        names.join("\n")
    )
}

pub fn chat_system_prompt(system_summary: &str) -> String {
    let summary = if system_summary.is_empty() {
        "No current metrics data available"
    } else {
        system_summary
    };

    format!(
        r#"You are an assistant specialized in Prometheus monitoring and system observability.
You help users understand their metrics, troubleshoot issues and improve their monitoring.

Current metrics summary: {summary}

Be accurate and give actionable advice when possible."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("metric_{:03}", i)).collect()
    }

    #[test]
    fn test_query_prompt_caps_metric_names() {
        let prompt = query_user_prompt("how many pods", &names(80));
        assert!(prompt.contains("metric_049"));
        assert!(!prompt.contains("metric_050"));
        assert!(prompt.contains("\"how many pods\""));
    }

    #[test]
    fn test_improvements_prompt_caps_metric_names() {
        let prompt = improvements_user_prompt(&names(150), "k8s cluster");
        assert!(prompt.contains("metric_099"));
        assert!(!prompt.contains("metric_100"));
    }

    #[test]
    fn test_alert_prompt_without_related_metrics() {
        let alert: Alert = serde_json::from_str(
            r#"{"labels":{"alertname":"DiskFull"},"annotations":{},"state":"pending"}"#,
        )
        .unwrap();
        let prompt = alert_user_prompt(&alert, &BTreeMap::new()).unwrap();
        assert!(prompt.contains("DiskFull"));
        assert!(prompt.contains("No additional metrics provided"));
    }

    #[test]
    fn test_digest_peak_rate() {
        use crate::gateway::{instant_frame, range_frame};

        let ranged = MetricDigest::of(&range_frame("requests", &[0.0, 60.0, 60.0]));
        assert_eq!(ranged.series, 1);
        assert_eq!(ranged.peak_rate, Some(1.0));

        let instant = MetricDigest::of(&instant_frame("up", &[("a", 1.0), ("b", 1.0)]));
        assert_eq!(instant.series, 2);
        assert_eq!(instant.peak_rate, None);
    }

    #[test]
    fn test_chat_system_prompt_embeds_summary() {
        let prompt = chat_system_prompt("System Status: 3/4 services up, 1 active alerts");
        assert!(prompt.contains("3/4 services up"));
        assert!(chat_system_prompt("").contains("No current metrics data available"));
    }
}
