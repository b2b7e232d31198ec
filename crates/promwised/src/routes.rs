//! API routes for promwised
//!
//! Thin adapters: decode the request, call one agent entry point, encode the
//! result. Failures use one payload shape: `{status, error_kind, message}`.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use promwise_common::promql;
use promwise_common::{Alert, AlertingRule, ErrorKind, GatewayError, Labels, TabularFrame};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::agent::health::MAX_TIME_RANGE_HOURS;
use crate::agent::{
    AgentError, AlertSummary, ChatReply, HealthReport, Investigation, QueryOutcome,
};
use crate::server::AppState;

type AppStateArc = Arc<AppState>;

// ============================================================================
// Error payload
// ============================================================================

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: String,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "invalid_request".to_string(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal".to_string(),
            message: message.into(),
        }
    }
}

/// HTTP status for a classified failure
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BackendUnreachable => StatusCode::BAD_GATEWAY,
        ErrorKind::BackendRejected | ErrorKind::PromptTooLarge => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::ResultTypeUnsupported
        | ErrorKind::MalformedSample
        | ErrorKind::MalformedResponse => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        Self {
            status: status_for(e.kind()),
            kind: e.kind().as_str().to_string(),
            message: e.to_string(),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        AgentError::from(e).into()
    }
}

/// Undecodable bodies keep axum's status but use the common payload
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            kind: "invalid_request".to_string(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "status": "error",
            "error_kind": self.kind,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// JSON request body that must be present
type JsonBody<T> = Result<Json<T>, JsonRejection>;

/// Body whose fields are all optional; an empty body means defaults
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {}", e)))
}

// ============================================================================
// Analysis Routes
// ============================================================================

pub fn analysis_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/v1/analysis/health", post(analyze_health))
        .route("/api/v1/analysis/natural-language", post(natural_language))
        .route("/api/v1/analysis/chat", post(chat))
        .route("/api/v1/analysis/investigate-alert", post(investigate_alert))
        .route("/api/v1/analysis/recommendations", post(recommendations))
}

#[derive(Debug, Default, Deserialize)]
pub struct HealthAnalysisRequest {
    #[serde(default)]
    pub time_range_hours: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct NaturalLanguageRequest {
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AlertInvestigationRequest {
    pub alert_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecommendationsRequest {
    #[serde(default)]
    pub system_description: String,
}

#[derive(Debug, Serialize)]
pub struct RecommendationsResponse {
    pub recommendations: String,
}

async fn analyze_health(
    State(state): State<AppStateArc>,
    body: Bytes,
) -> ApiResult<HealthReport> {
    let req: HealthAnalysisRequest = optional_body(&body)?;
    if req.time_range_hours.is_some_and(|h| h > MAX_TIME_RANGE_HOURS) {
        return Err(ApiError::bad_request(format!(
            "time_range_hours must be at most {}",
            MAX_TIME_RANGE_HOURS
        )));
    }
    info!(time_range_hours = ?req.time_range_hours, "Starting system health analysis");
    let report = state
        .agent
        .analyze_system_health(req.time_range_hours)
        .await
        .inspect_err(|e| error!(error = %e, "System health analysis failed"))?;
    Ok(Json(report))
}

async fn natural_language(
    State(state): State<AppStateArc>,
    payload: JsonBody<NaturalLanguageRequest>,
) -> ApiResult<QueryOutcome> {
    let Json(req) = payload?;
    if req.query.trim().is_empty() {
        return Err(ApiError::bad_request("query must not be empty"));
    }
    let outcome = state.agent.natural_language_query(&req.query).await?;
    Ok(Json(outcome))
}

async fn chat(
    State(state): State<AppStateArc>,
    payload: JsonBody<ChatRequest>,
) -> ApiResult<ChatReply> {
    let Json(req) = payload?;
    if req.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }
    let reply = state
        .agent
        .chat(&req.message, req.conversation_id.as_deref())
        .await?;
    Ok(Json(reply))
}

async fn investigate_alert(
    State(state): State<AppStateArc>,
    payload: JsonBody<AlertInvestigationRequest>,
) -> ApiResult<Investigation> {
    let Json(req) = payload?;
    let investigation = state.agent.investigate_alert(&req.alert_name).await?;
    Ok(Json(investigation))
}

async fn recommendations(
    State(state): State<AppStateArc>,
    body: Bytes,
) -> ApiResult<RecommendationsResponse> {
    let req: RecommendationsRequest = optional_body(&body)?;
    let recommendations = state
        .agent
        .monitoring_recommendations(&req.system_description)
        .await?;
    Ok(Json(RecommendationsResponse { recommendations }))
}

// ============================================================================
// Alert Routes
// ============================================================================

pub fn alert_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/v1/alerts/active", get(active_alerts))
        .route("/api/v1/alerts/rules", get(alerting_rules))
        .route("/api/v1/alerts/summary", get(alert_summary))
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct RulesResponse {
    pub rules: Vec<AlertingRule>,
    pub count: usize,
}

async fn active_alerts(State(state): State<AppStateArc>) -> ApiResult<AlertsResponse> {
    let alerts = state.agent.gateway().active_alerts().await?;
    Ok(Json(AlertsResponse {
        count: alerts.len(),
        alerts,
    }))
}

async fn alerting_rules(State(state): State<AppStateArc>) -> ApiResult<RulesResponse> {
    let rules = state.agent.gateway().alerting_rules().await?;
    Ok(Json(RulesResponse {
        count: rules.len(),
        rules,
    }))
}

async fn alert_summary(State(state): State<AppStateArc>) -> ApiResult<AlertSummary> {
    Ok(Json(state.agent.alert_summary().await?))
}

// ============================================================================
// Metrics Routes
// ============================================================================

pub fn metrics_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/v1/metrics/query", post(instant_query))
        .route("/api/v1/metrics/query_range", post(range_query))
        .route("/api/v1/metrics/labels", get(label_names))
        .route("/api/v1/metrics/labels/:label/values", get(label_values))
        .route("/api/v1/metrics/series", get(series))
        .route("/api/v1/metrics/metadata", get(metadata))
}

#[derive(Debug, Deserialize)]
pub struct InstantQueryRequest {
    pub query: String,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQueryRequest {
    pub query: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// `30s`, `1m`, `1h` ...
    #[serde(default = "default_step")]
    pub step: String,
}

fn default_step() -> String {
    "1m".to_string()
}

async fn instant_query(
    State(state): State<AppStateArc>,
    payload: JsonBody<InstantQueryRequest>,
) -> ApiResult<TabularFrame> {
    let Json(req) = payload?;
    let frame = state.agent.gateway().query(&req.query, req.time).await?;
    Ok(Json(frame))
}

async fn range_query(
    State(state): State<AppStateArc>,
    payload: JsonBody<RangeQueryRequest>,
) -> ApiResult<TabularFrame> {
    let Json(req) = payload?;
    if req.start >= req.end {
        return Err(ApiError::bad_request("start must be before end"));
    }
    let step =
        promql::parse_time_range(&req.step).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let frame = state
        .agent
        .gateway()
        .query_range(&req.query, req.start, req.end, step)
        .await?;
    Ok(Json(frame))
}

async fn label_names(State(state): State<AppStateArc>) -> ApiResult<Vec<String>> {
    Ok(Json(state.agent.gateway().label_names().await?))
}

async fn label_values(
    State(state): State<AppStateArc>,
    Path(label): Path<String>,
) -> ApiResult<Vec<String>> {
    Ok(Json(state.agent.gateway().label_values(&label).await?))
}

/// Selectors come as repeated `match[]` (or `match`) query parameters
async fn series(
    State(state): State<AppStateArc>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<Vec<Labels>> {
    let selectors: Vec<String> = params
        .into_iter()
        .filter(|(k, _)| k == "match[]" || k == "match")
        .map(|(_, v)| v)
        .collect();
    if selectors.is_empty() {
        return Err(ApiError::bad_request("at least one match[] selector is required"));
    }

    Ok(Json(
        state
            .agent
            .gateway()
            .series_matching(&selectors, None)
            .await?,
    ))
}

async fn metadata(
    State(state): State<AppStateArc>,
) -> ApiResult<BTreeMap<String, Vec<promwise_common::MetricMetadata>>> {
    Ok(Json(state.agent.gateway().metric_metadata().await?))
}

// ============================================================================
// Health and self-metrics
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(export_metrics))
}

async fn health_check(State(state): State<AppStateArc>) -> Json<Value> {
    let prometheus_healthy = state.agent.gateway().is_healthy().await;
    Json(json!({
        "status": if prometheus_healthy { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "prometheus_healthy": prometheus_healthy,
    }))
}

async fn export_metrics(State(state): State<AppStateArc>) -> Result<Response, ApiError> {
    let text = state
        .agent
        .metrics()
        .export()
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        text,
    )
        .into_response())
}
