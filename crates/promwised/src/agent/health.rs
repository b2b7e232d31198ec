//! Health analysis: CollectMetrics -> CollectAlerts -> Synthesize.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use promwise_common::{Alert, TabularFrame};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

use super::{Agent, AgentError};

const PIPELINE: &str = "health";

/// Resolution of the watch-list range queries
const SWEEP_STEP: Duration = Duration::from_secs(60);

/// Widest bracket the sweep accepts (one year)
pub const MAX_TIME_RANGE_HOURS: u32 = 24 * 365;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub analysis_timestamp: DateTime<Utc>,
    pub time_range_hours: u32,
    /// Watch-list metrics that produced data, in watch-list order
    pub metrics_collected: Vec<String>,
    pub active_alerts_count: usize,
    pub ai_analysis: String,
    pub raw_data: HealthRawData,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthRawData {
    pub metrics: BTreeMap<String, TabularFrame>,
    pub alerts: Vec<Alert>,
}

impl Agent {
    /// Analyze the watch-list over the last `time_range_hours` (default from config)
    #[instrument(skip(self))]
    pub async fn analyze_system_health(
        &self,
        time_range_hours: Option<u32>,
    ) -> Result<HealthReport, AgentError> {
        let started = Instant::now();
        let result = self.run_health(time_range_hours).await;
        let outcome = if result.is_ok() { "success" } else { "error" };
        self.metrics.record_run(PIPELINE, outcome, started);
        result
    }

    async fn run_health(&self, time_range_hours: Option<u32>) -> Result<HealthReport, AgentError> {
        // A zero-width bracket is not a valid range query
        let hours = time_range_hours
            .unwrap_or(self.config.default_time_range_hours)
            .clamp(1, MAX_TIME_RANGE_HOURS);
        let end = Utc::now();
        let start = end - ChronoDuration::hours(hours as i64);

        let (collected, order) = self.collect_watch_list(start, end).await;

        let gateway = &self.gateway;
        let alerts = self.with_retry(move || gateway.active_alerts()).await?;

        let context = format!("System health analysis for the last {} hours", hours);
        let analysis = self
            .reasoning
            .analyze_metrics(&collected, &alerts, &context)
            .await
            .map_err(|e| self.reasoning_failed(e))?;

        info!(
            metrics = order.len(),
            alerts = alerts.len(),
            "Health analysis complete"
        );

        Ok(HealthReport {
            analysis_timestamp: end,
            time_range_hours: hours,
            metrics_collected: order,
            active_alerts_count: alerts.len(),
            ai_analysis: analysis,
            raw_data: HealthRawData {
                metrics: collected,
                alerts,
            },
        })
    }

    /// One range query per watch-list metric; failures and empty results are dropped
    async fn collect_watch_list(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> (BTreeMap<String, TabularFrame>, Vec<String>) {
        let mut collected = BTreeMap::new();
        let mut order = Vec::new();
        let gateway = &self.gateway;

        for metric in &self.config.watch_list {
            let expr = metric.as_str();
            match self
                .with_retry(move || gateway.query_range(expr, start, end, SWEEP_STEP))
                .await
            {
                Ok(frame) if frame.is_empty() => {
                    warn!(metric = %metric, "Metric returned no data, skipping");
                    self.metrics.record_dropped(PIPELINE);
                }
                Ok(frame) => {
                    order.push(metric.clone());
                    collected.insert(metric.clone(), frame);
                }
                Err(e) => {
                    warn!(metric = %metric, error = %e, "Could not collect metric");
                    self.metrics.record_dropped(PIPELINE);
                }
            }
        }

        (collected, order)
    }
}
