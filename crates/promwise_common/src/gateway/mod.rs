//! Metrics gateway - the only component that talks to the metrics backend.
//!
//! Translates the backend's query, alert, rule and label endpoints into the
//! shared tabular/series vocabulary and classifies every failure into a
//! [`GatewayError`] variant.
//!
//! Production code uses [`PrometheusGateway`]. Tests use [`FakeGateway`] with
//! scripted responses and call counters.

pub mod normalize;
pub mod wire;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::GatewayError;
use crate::types::{
    Alert, AlertingRule, FrameRow, Labels, MetricMetadata, ResultKind, TabularFrame, TimeWindow,
    METRIC_NAME_LABEL,
};
use wire::{AlertsData, ApiEnvelope, MetadataData, RawQueryData, RulesData};

pub use normalize::QueryResult;

// ============================================================================
// Gateway Trait
// ============================================================================

#[async_trait]
pub trait MetricsGateway: Send + Sync {
    /// Instantaneous query, optionally evaluated at `at`
    async fn query(
        &self,
        expression: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<TabularFrame, GatewayError>;

    /// Range query; the caller guarantees `start < end`
    async fn query_range(
        &self,
        expression: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<TabularFrame, GatewayError>;

    /// Active alerts in backend order
    async fn active_alerts(&self) -> Result<Vec<Alert>, GatewayError>;

    /// Alerting rules only; recording rules are left out
    async fn alerting_rules(&self) -> Result<Vec<AlertingRule>, GatewayError>;

    async fn label_names(&self) -> Result<Vec<String>, GatewayError>;

    async fn label_values(&self, label: &str) -> Result<Vec<String>, GatewayError>;

    async fn series_matching(
        &self,
        selectors: &[String],
        window: Option<TimeWindow>,
    ) -> Result<Vec<Labels>, GatewayError>;

    async fn metric_metadata(
        &self,
    ) -> Result<BTreeMap<String, Vec<MetricMetadata>>, GatewayError>;

    /// Sorted metric-name catalog
    async fn metric_names(&self) -> Result<Vec<String>, GatewayError> {
        Ok(self.metric_metadata().await?.into_keys().collect())
    }

    async fn is_healthy(&self) -> bool;
}

// ============================================================================
// HTTP Gateway (Production)
// ============================================================================

pub struct PrometheusGateway {
    base_url: String,
    client: reqwest::Client,
}

impl PrometheusGateway {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET an API endpoint and unwrap the status envelope
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "metrics backend request");

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| GatewayError::BackendUnreachable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::BackendUnreachable(e.to_string()))?;

        match serde_json::from_str::<ApiEnvelope<T>>(&body) {
            Ok(ApiEnvelope::Success { data, warnings }) => {
                for warning in warnings {
                    warn!(path, %warning, "metrics backend warning");
                }
                Ok(data)
            }
            Ok(ApiEnvelope::Error { error_type, error }) => {
                Err(GatewayError::BackendRejected {
                    error_type,
                    message: error,
                })
            }
            Err(_) if status.is_server_error() => Err(GatewayError::BackendUnreachable(format!(
                "HTTP {} from {}",
                status, path
            ))),
            Err(_) if !status.is_success() => Err(GatewayError::BackendRejected {
                error_type: format!("http_{}", status.as_u16()),
                message: body.chars().take(200).collect(),
            }),
            Err(e) => Err(GatewayError::MalformedResponse(e.to_string())),
        }
    }

    async fn run_query(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<TabularFrame, GatewayError> {
        let data: RawQueryData = self.get(path, params).await?;
        data.decode()?.normalize()
    }
}

/// Unix seconds with millisecond precision, as the API expects
fn unix_secs(t: DateTime<Utc>) -> String {
    format!("{:.3}", t.timestamp_millis() as f64 / 1000.0)
}

#[async_trait]
impl MetricsGateway for PrometheusGateway {
    async fn query(
        &self,
        expression: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<TabularFrame, GatewayError> {
        let mut params = vec![("query", expression.to_string())];
        if let Some(at) = at {
            params.push(("time", unix_secs(at)));
        }

        self.run_query("/api/v1/query", &params)
            .await
            .inspect_err(|e| error!(query = expression, error = %e, "Query execution failed"))
    }

    async fn query_range(
        &self,
        expression: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<TabularFrame, GatewayError> {
        let params = [
            ("query", expression.to_string()),
            ("start", unix_secs(start)),
            ("end", unix_secs(end)),
            ("step", format!("{}", step.as_secs_f64())),
        ];

        self.run_query("/api/v1/query_range", &params)
            .await
            .inspect_err(|e| error!(query = expression, error = %e, "Range query execution failed"))
    }

    async fn active_alerts(&self) -> Result<Vec<Alert>, GatewayError> {
        let data: AlertsData = self.get("/api/v1/alerts", &[]).await?;
        Ok(data.alerts)
    }

    async fn alerting_rules(&self) -> Result<Vec<AlertingRule>, GatewayError> {
        let data: RulesData = self.get("/api/v1/rules", &[]).await?;
        Ok(data.into_alerting())
    }

    async fn label_names(&self) -> Result<Vec<String>, GatewayError> {
        self.get("/api/v1/labels", &[]).await
    }

    async fn label_values(&self, label: &str) -> Result<Vec<String>, GatewayError> {
        self.get(&format!("/api/v1/label/{}/values", label), &[])
            .await
    }

    async fn series_matching(
        &self,
        selectors: &[String],
        window: Option<TimeWindow>,
    ) -> Result<Vec<Labels>, GatewayError> {
        let mut params: Vec<(&str, String)> =
            selectors.iter().map(|s| ("match[]", s.clone())).collect();
        if let Some(window) = window {
            params.push(("start", unix_secs(window.start)));
            params.push(("end", unix_secs(window.end)));
        }

        self.get("/api/v1/series", &params).await
    }

    async fn metric_metadata(
        &self,
    ) -> Result<BTreeMap<String, Vec<MetricMetadata>>, GatewayError> {
        let data: MetadataData = self.get("/api/v1/metadata", &[]).await?;
        Ok(data)
    }

    async fn is_healthy(&self) -> bool {
        let url = format!("{}/-/healthy", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                error!(error = %e, "Metrics backend health check failed");
                false
            }
        }
    }
}

// ============================================================================
// Fake Gateway (Testing)
// ============================================================================

/// Build a frame with one row per `(instance, value)` for metric `name`
pub fn instant_frame(name: &str, points: &[(&str, f64)]) -> TabularFrame {
    TabularFrame {
        kind: ResultKind::Instant,
        rows: points
            .iter()
            .map(|(instance, value)| {
                let mut labels = Labels::new();
                labels.insert(METRIC_NAME_LABEL.to_string(), name.to_string());
                labels.insert("instance".to_string(), instance.to_string());
                FrameRow {
                    timestamp: Utc::now(),
                    value: *value,
                    labels,
                }
            })
            .collect(),
    }
}

/// Build a ranged frame for one series of metric `name`
pub fn range_frame(name: &str, values: &[f64]) -> TabularFrame {
    let start = Utc::now() - chrono::Duration::seconds(60 * values.len() as i64);
    let mut labels = Labels::new();
    labels.insert(METRIC_NAME_LABEL.to_string(), name.to_string());
    TabularFrame {
        kind: ResultKind::Range,
        rows: values
            .iter()
            .enumerate()
            .map(|(i, value)| FrameRow {
                timestamp: start + chrono::Duration::seconds(60 * i as i64),
                value: *value,
                labels: labels.clone(),
            })
            .collect(),
    }
}

/// Scripted gateway for tests; unscripted queries return empty frames
#[derive(Default)]
pub struct FakeGateway {
    instant: HashMap<String, Result<TabularFrame, GatewayError>>,
    range: HashMap<String, Result<TabularFrame, GatewayError>>,
    alerts: Option<Result<Vec<Alert>, GatewayError>>,
    rules: Vec<AlertingRule>,
    metadata: BTreeMap<String, Vec<MetricMetadata>>,
    /// Remaining transport failures per expression before the script applies
    flaky: Mutex<HashMap<String, usize>>,
    calls: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instant(mut self, expression: &str, frame: TabularFrame) -> Self {
        self.instant.insert(expression.to_string(), Ok(frame));
        self
    }

    pub fn with_instant_error(mut self, expression: &str, error: GatewayError) -> Self {
        self.instant.insert(expression.to_string(), Err(error));
        self
    }

    pub fn with_range(mut self, expression: &str, frame: TabularFrame) -> Self {
        self.range.insert(expression.to_string(), Ok(frame));
        self
    }

    pub fn with_range_error(mut self, expression: &str, error: GatewayError) -> Self {
        self.range.insert(expression.to_string(), Err(error));
        self
    }

    pub fn with_alerts(mut self, alerts: Vec<Alert>) -> Self {
        self.alerts = Some(Ok(alerts));
        self
    }

    pub fn with_alerts_error(mut self, error: GatewayError) -> Self {
        self.alerts = Some(Err(error));
        self
    }

    pub fn with_rules(mut self, rules: Vec<AlertingRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_metric_names(mut self, names: &[&str]) -> Self {
        for name in names {
            self.metadata.insert(
                name.to_string(),
                vec![MetricMetadata {
                    metric_type: "gauge".to_string(),
                    help: String::new(),
                    unit: String::new(),
                }],
            );
        }
        self
    }

    /// Fail the first `times` calls for `expression` with a transport error
    pub fn flaky(self, expression: &str, times: usize) -> Self {
        self.flaky
            .lock()
            .unwrap()
            .insert(expression.to_string(), times);
        self
    }

    /// Every call made so far, as `endpoint:argument`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn take_flaky(&self, expression: &str) -> Option<GatewayError> {
        let mut flaky = self.flaky.lock().unwrap();
        match flaky.get_mut(expression) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Some(GatewayError::BackendUnreachable(
                    "connection refused".to_string(),
                ))
            }
            _ => None,
        }
    }

    fn alerts_result(&self) -> Result<Vec<Alert>, GatewayError> {
        self.alerts.clone().unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[async_trait]
impl MetricsGateway for FakeGateway {
    async fn query(
        &self,
        expression: &str,
        _at: Option<DateTime<Utc>>,
    ) -> Result<TabularFrame, GatewayError> {
        self.record(format!("query:{}", expression));
        if let Some(e) = self.take_flaky(expression) {
            return Err(e);
        }
        self.instant
            .get(expression)
            .cloned()
            .unwrap_or_else(|| Ok(TabularFrame::empty(ResultKind::Instant)))
    }

    async fn query_range(
        &self,
        expression: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _step: Duration,
    ) -> Result<TabularFrame, GatewayError> {
        self.record(format!("query_range:{}", expression));
        if let Some(e) = self.take_flaky(expression) {
            return Err(e);
        }
        self.range
            .get(expression)
            .cloned()
            .unwrap_or_else(|| Ok(TabularFrame::empty(ResultKind::Range)))
    }

    async fn active_alerts(&self) -> Result<Vec<Alert>, GatewayError> {
        self.record("alerts:".to_string());
        self.alerts_result()
    }

    async fn alerting_rules(&self) -> Result<Vec<AlertingRule>, GatewayError> {
        self.record("rules:".to_string());
        Ok(self.rules.clone())
    }

    async fn label_names(&self) -> Result<Vec<String>, GatewayError> {
        self.record("labels:".to_string());
        Ok(vec![METRIC_NAME_LABEL.to_string(), "instance".to_string()])
    }

    async fn label_values(&self, label: &str) -> Result<Vec<String>, GatewayError> {
        self.record(format!("label_values:{}", label));
        if label == METRIC_NAME_LABEL {
            return Ok(self.metadata.keys().cloned().collect());
        }
        Ok(Vec::new())
    }

    async fn series_matching(
        &self,
        selectors: &[String],
        _window: Option<TimeWindow>,
    ) -> Result<Vec<Labels>, GatewayError> {
        self.record(format!("series:{}", selectors.join(",")));
        Ok(Vec::new())
    }

    async fn metric_metadata(
        &self,
    ) -> Result<BTreeMap<String, Vec<MetricMetadata>>, GatewayError> {
        self.record("metadata:".to_string());
        Ok(self.metadata.clone())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}
