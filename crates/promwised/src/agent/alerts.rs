//! Alert investigation (Lookup -> CorrelateMetrics -> Explain) and the alert summary.

use chrono::{DateTime, Utc};
use promwise_common::promql::escape_label_value;
use promwise_common::{Alert, TabularFrame};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::{Agent, AgentError};

const PIPELINE: &str = "investigate_alert";

/// Metrics probed around an alerting instance
const PROBE_METRICS: [&str; 3] = ["up", "cpu_usage_percent", "memory_usage_percent"];

/// Alert names listed in the summary
const TOP_ALERT_NAMES: usize = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Investigation {
    Found {
        alert: Alert,
        related_metrics: BTreeMap<String, TabularFrame>,
        ai_explanation: String,
        investigation_timestamp: DateTime<Utc>,
    },
    NotFound {
        alert_name: String,
        message: String,
    },
}

impl Investigation {
    fn label(&self) -> &'static str {
        match self {
            Investigation::Found { .. } => "success",
            Investigation::NotFound { .. } => "not_found",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertSummary {
    pub total_active_alerts: usize,
    pub total_alerting_rules: usize,
    pub severity_breakdown: BTreeMap<String, usize>,
    pub state_breakdown: BTreeMap<String, usize>,
    /// Most frequent alert names, count descending then name ascending
    pub most_common_alerts: Vec<(String, usize)>,
}

/// Instance-scoped probe expressions keyed by metric name
pub fn probe_queries(alert: &Alert) -> Vec<(&'static str, String)> {
    match alert.instance() {
        Some(instance) => {
            let instance = escape_label_value(instance);
            PROBE_METRICS
                .iter()
                .map(|metric| (*metric, format!("{}{{instance=\"{}\"}}", metric, instance)))
                .collect()
        }
        None => Vec::new(),
    }
}

impl Agent {
    #[instrument(skip(self))]
    pub async fn investigate_alert(&self, alert_name: &str) -> Result<Investigation, AgentError> {
        let started = Instant::now();
        let result = self.run_investigation(alert_name).await;
        let outcome = match &result {
            Ok(investigation) => investigation.label(),
            Err(_) => "error",
        };
        self.metrics.record_run(PIPELINE, outcome, started);
        result
    }

    async fn run_investigation(&self, alert_name: &str) -> Result<Investigation, AgentError> {
        let gateway = &self.gateway;
        let alerts = self.with_retry(move || gateway.active_alerts()).await?;

        let Some(alert) = alerts.into_iter().find(|a| a.name() == Some(alert_name)) else {
            info!(alert_name, "Alert not active");
            return Ok(Investigation::NotFound {
                alert_name: alert_name.to_string(),
                message: format!("Alert '{}' not found in active alerts", alert_name),
            });
        };

        let related = self.correlate(&alert).await;

        let explanation = self
            .reasoning
            .explain_alert(&alert, &related)
            .await
            .map_err(|e| self.reasoning_failed(e))?;

        Ok(Investigation::Found {
            alert,
            related_metrics: related,
            ai_explanation: explanation,
            investigation_timestamp: Utc::now(),
        })
    }

    /// Best-effort probes; failing or empty ones are left out
    async fn correlate(&self, alert: &Alert) -> BTreeMap<String, TabularFrame> {
        let mut related = BTreeMap::new();
        let gateway = &self.gateway;

        for (metric, query) in probe_queries(alert) {
            let expr = query.as_str();
            match self.with_retry(move || gateway.query(expr, None)).await {
                Ok(frame) if frame.is_empty() => {
                    debug!(probe = %query, "Probe returned no rows");
                    self.metrics.record_dropped(PIPELINE);
                }
                Ok(frame) => {
                    related.insert(metric.to_string(), frame);
                }
                Err(e) => {
                    warn!(probe = %query, error = %e, "Related metric probe failed");
                    self.metrics.record_dropped(PIPELINE);
                }
            }
        }

        related
    }

    /// Counts over the active alerts plus the alerting-rule total
    #[instrument(skip(self))]
    pub async fn alert_summary(&self) -> Result<AlertSummary, AgentError> {
        let gateway = &self.gateway;
        let alerts = self.with_retry(move || gateway.active_alerts()).await?;
        let rules = self.with_retry(move || gateway.alerting_rules()).await?;

        let mut severity_breakdown = BTreeMap::new();
        let mut state_breakdown = BTreeMap::new();
        let mut names: HashMap<&str, usize> = HashMap::new();

        for alert in &alerts {
            *severity_breakdown
                .entry(alert.severity().to_string())
                .or_insert(0) += 1;
            *state_breakdown
                .entry(alert.state.as_str().to_string())
                .or_insert(0) += 1;
            *names.entry(alert.name().unwrap_or("unknown")).or_insert(0) += 1;
        }

        let mut most_common: Vec<(String, usize)> = names
            .into_iter()
            .map(|(name, count)| (name.to_string(), count))
            .collect();
        most_common.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        most_common.truncate(TOP_ALERT_NAMES);

        Ok(AlertSummary {
            total_active_alerts: alerts.len(),
            total_alerting_rules: rules.len(),
            severity_breakdown,
            state_breakdown,
            most_common_alerts: most_common,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probes_scoped_to_instance() {
        let alert: Alert = serde_json::from_str(
            r#"{"labels":{"alertname":"HighCPU","instance":"node-1:9100"},"state":"firing"}"#,
        )
        .unwrap();
        let probes = probe_queries(&alert);
        assert_eq!(probes.len(), 3);
        assert_eq!(probes[0], ("up", "up{instance=\"node-1:9100\"}".to_string()));
        assert_eq!(probes[2].0, "memory_usage_percent");
    }

    #[test]
    fn test_probe_escapes_instance_label() {
        let alert: Alert = serde_json::from_str(
            r#"{"labels":{"alertname":"Odd","instance":"host\"x\\y"},"state":"firing"}"#,
        )
        .unwrap();
        let probes = probe_queries(&alert);
        assert_eq!(probes[0].1, r#"up{instance="host\"x\\y"}"#);
    }

    #[test]
    fn test_no_instance_no_probes() {
        let alert: Alert =
            serde_json::from_str(r#"{"labels":{"alertname":"Watchdog"},"state":"firing"}"#).unwrap();
        assert!(probe_queries(&alert).is_empty());
    }
}
