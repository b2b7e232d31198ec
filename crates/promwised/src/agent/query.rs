//! Natural-language query:
//! FetchMetadata -> GenerateExpression -> Branch -> Execute -> Classify.
//!
//! The generated expression is never validated locally. A backend rejection
//! becomes `QueryError` with the expression attached; a transport failure is
//! a pipeline error instead.

use chrono::{Duration as ChronoDuration, Utc};
use promwise_common::promql;
use promwise_common::stats::{self, FrameSummary};
use promwise_common::{ErrorKind, GatewayError, TabularFrame};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::{Agent, AgentError};

const PIPELINE: &str = "natural_language";

/// Lookback for rate-style expressions
const RANGE_LOOKBACK_HOURS: i64 = 1;

const RANGE_STEP: Duration = Duration::from_secs(60);

/// Exactly one of three terminal outcomes
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    Success {
        original_query: String,
        generated_promql: String,
        results: TabularFrame,
        summary: FrameSummary,
        ai_analysis: String,
    },
    NoResults {
        original_query: String,
        generated_promql: String,
        message: String,
    },
    QueryError {
        original_query: String,
        generated_promql: String,
        #[serde(serialize_with = "serialize_gateway_error")]
        error: GatewayError,
        message: String,
    },
}

#[derive(Serialize)]
struct ErrorPayload {
    kind: ErrorKind,
    message: String,
}

fn serialize_gateway_error<S: Serializer>(error: &GatewayError, s: S) -> Result<S::Ok, S::Error> {
    ErrorPayload {
        kind: error.kind(),
        message: error.to_string(),
    }
    .serialize(s)
}

impl QueryOutcome {
    pub fn generated_promql(&self) -> &str {
        match self {
            QueryOutcome::Success {
                generated_promql, ..
            }
            | QueryOutcome::NoResults {
                generated_promql, ..
            }
            | QueryOutcome::QueryError {
                generated_promql, ..
            } => generated_promql,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            QueryOutcome::Success { .. } => "success",
            QueryOutcome::NoResults { .. } => "no_results",
            QueryOutcome::QueryError { .. } => "query_error",
        }
    }
}

impl Agent {
    #[instrument(skip(self))]
    pub async fn natural_language_query(&self, question: &str) -> Result<QueryOutcome, AgentError> {
        let started = Instant::now();
        let result = self.run_query(question).await;
        let outcome = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "error",
        };
        self.metrics.record_run(PIPELINE, outcome, started);
        result
    }

    async fn run_query(&self, question: &str) -> Result<QueryOutcome, AgentError> {
        let catalog = self.metric_catalog().await?;

        let expr = self
            .reasoning
            .generate_promql(question, &catalog)
            .await
            .map_err(|e| self.reasoning_failed(e))?;
        info!(promql = %expr, "Generated expression");

        // Informational only; the backend is the judge of the expression
        let unknown: Vec<String> = promql::extract_metric_names(&expr)
            .into_iter()
            .filter(|name| catalog.binary_search(name).is_err())
            .collect();
        if !unknown.is_empty() {
            debug!(promql = %expr, ?unknown, "Expression names metrics outside the catalog");
        }

        let frame = match self.execute(&expr).await {
            Ok(frame) => frame,
            Err(e) if e.is_retryable() => return Err(e.into()),
            Err(e) => {
                warn!(promql = %expr, error = %e, "Generated expression failed");
                return Ok(QueryOutcome::QueryError {
                    original_query: question.to_string(),
                    generated_promql: expr,
                    error: e,
                    message: "Generated PromQL query failed to execute".to_string(),
                });
            }
        };

        if frame.is_empty() {
            return Ok(QueryOutcome::NoResults {
                original_query: question.to_string(),
                generated_promql: expr,
                message: "Query executed successfully but returned no results".to_string(),
            });
        }

        let collected = BTreeMap::from([("query_result".to_string(), frame.clone())]);
        let context = format!("Results for natural language query: '{}'", question);
        let analysis = self
            .reasoning
            .analyze_metrics(&collected, &[], &context)
            .await
            .map_err(|e| self.reasoning_failed(e))?;

        Ok(QueryOutcome::Success {
            original_query: question.to_string(),
            generated_promql: expr,
            summary: stats::summarize(&frame.values()),
            results: frame,
            ai_analysis: analysis,
        })
    }

    /// Range query for rate-style expressions, instant query otherwise
    async fn execute(&self, expr: &str) -> Result<TabularFrame, GatewayError> {
        let gateway = &self.gateway;

        if promql::is_rate_style(expr) {
            let end = Utc::now();
            let start = end - ChronoDuration::hours(RANGE_LOOKBACK_HOURS);
            self.with_retry(move || gateway.query_range(expr, start, end, RANGE_STEP))
                .await
        } else {
            self.with_retry(move || gateway.query(expr, None)).await
        }
    }
}
