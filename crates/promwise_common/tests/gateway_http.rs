//! Gateway tests against a canned metrics backend.
//!
//! A local axum server on 127.0.0.1:0 answers with fixed JSON bodies so the
//! full HTTP path (request shape, envelope decoding, normalization and error
//! classification) runs without a real Prometheus.

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, Utc};
use promwise_common::{
    ErrorKind, GatewayError, MetricsGateway, PrometheusGateway, ResultKind,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

// ============================================================================
// Canned backend
// ============================================================================

async fn instant_query(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    let query = params.get("query").cloned().unwrap_or_default();
    let body = match query.as_str() {
        "up" => json!({
            "status": "success",
            "data": {"resultType": "vector", "result": [
                {"metric": {"__name__": "up", "instance": "a:9100", "job": "node"}, "value": [1700000000.5, "1"]},
                {"metric": {"__name__": "up", "instance": "b:9100", "job": "node"}, "value": [1700000000.5, "0"]},
                {"metric": {"__name__": "up", "instance": "c:9100", "job": "node"}, "value": [1700000000.5, "NaN"]}
            ]}
        }),
        "nonexistent_metric_xyz" => json!({
            "status": "success",
            "data": {"resultType": "vector", "result": []}
        }),
        "scalar(1)" => json!({
            "status": "success",
            "data": {"resultType": "scalar", "result": [1700000000, "1"]}
        }),
        "garbled" => json!({
            "status": "success",
            "data": {"resultType": "vector", "result": [
                {"metric": {"__name__": "garbled"}, "value": [1700000000, "twelve"]}
            ]}
        }),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "status": "error",
                    "errorType": "bad_data",
                    "error": format!("invalid parameter \"query\": parse error in {}", query)
                })),
            )
        }
    };
    (StatusCode::OK, Json(body))
}

async fn range_query(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    assert!(params.contains_key("start"));
    assert!(params.contains_key("end"));
    assert_eq!(params.get("step").map(String::as_str), Some("60"));

    Json(json!({
        "status": "success",
        "data": {"resultType": "matrix", "result": [
            {"metric": {"__name__": "cpu_usage_percent", "instance": "a"},
             "values": [[1700000000, "10"], [1700000060, "12.5"], [1700000120, "11"]]},
            {"metric": {"__name__": "cpu_usage_percent", "instance": "b"},
             "values": [[1700000000, "50"], [1700000060, "55"], [1700000120, "+Inf"]]}
        ]},
        "warnings": ["query touched many series"]
    }))
}

async fn alerts() -> Json<Value> {
    Json(json!({
        "status": "success",
        "data": {"alerts": [
            {"labels": {"alertname": "HighCPU", "instance": "a", "severity": "warning"},
             "annotations": {"summary": "CPU above 90%"}, "state": "firing",
             "activeAt": "2024-05-01T10:00:00Z", "value": "9.4e+01"},
            {"labels": {"alertname": "DiskFilling"}, "annotations": {}, "state": "pending"}
        ]}
    }))
}

async fn rules() -> Json<Value> {
    Json(json!({
        "status": "success",
        "data": {"groups": [
            {"name": "node", "file": "node.yml", "rules": [
                {"type": "recording", "name": "instance:cpu:avg", "query": "avg by (instance) (cpu_usage_percent)", "health": "ok"},
                {"type": "alerting", "name": "HighCPU", "query": "cpu_usage_percent > 90", "duration": 300,
                 "labels": {"severity": "warning"}, "annotations": {}, "alerts": [], "health": "ok", "state": "firing"}
            ]}
        ]}
    }))
}

async fn metadata() -> Json<Value> {
    Json(json!({
        "status": "success",
        "data": {
            "up": [{"type": "gauge", "help": "Target health", "unit": ""}],
            "http_requests_total": [{"type": "counter", "help": "Requests", "unit": ""}],
            "cpu_usage_percent": [{"type": "gauge", "help": "CPU", "unit": "percent"}]
        }
    }))
}

async fn label_values() -> Json<Value> {
    Json(json!({"status": "success", "data": ["node", "prometheus"]}))
}

async fn series(Query(params): Query<Vec<(String, String)>>) -> Json<Value> {
    let matchers: Vec<&str> = params
        .iter()
        .filter(|(k, _)| k == "match[]")
        .map(|(_, v)| v.as_str())
        .collect();
    assert_eq!(matchers, vec!["up", "process_start_time_seconds{job=\"node\"}"]);

    Json(json!({"status": "success", "data": [
        {"__name__": "up", "instance": "a", "job": "node"}
    ]}))
}

async fn overloaded() -> impl IntoResponse {
    (StatusCode::SERVICE_UNAVAILABLE, "upstream overloaded")
}

async fn spawn_backend() -> String {
    let app = Router::new()
        .route("/api/v1/query", get(instant_query))
        .route("/api/v1/query_range", get(range_query))
        .route("/api/v1/alerts", get(alerts))
        .route("/api/v1/rules", get(rules))
        .route("/api/v1/metadata", get(metadata))
        .route("/api/v1/label/job/values", get(label_values))
        .route("/api/v1/series", get(series))
        .route("/api/v1/labels", get(overloaded))
        .route("/-/healthy", get(|| async { "Prometheus Server is Healthy.\n" }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn gateway() -> PrometheusGateway {
    let url = spawn_backend().await;
    PrometheusGateway::new(&url, Duration::from_secs(5)).unwrap()
}

// ============================================================================
// Queries
// ============================================================================

#[tokio::test]
async fn test_instant_query_one_row_per_series() {
    let gw = gateway().await;
    let frame = gw.query("up", None).await.unwrap();

    assert_eq!(frame.kind, ResultKind::Instant);
    assert_eq!(frame.len(), 3);
    assert_eq!(frame.rows[0].labels["instance"], "a:9100");
    assert_eq!(frame.rows[1].value, 0.0);
    assert!(frame.rows[2].value.is_nan());
    assert_eq!(frame.rows[0].timestamp.timestamp_millis(), 1_700_000_000_500);
}

#[tokio::test]
async fn test_empty_result_is_not_an_error() {
    let gw = gateway().await;
    let frame = gw.query("nonexistent_metric_xyz", None).await.unwrap();
    assert!(frame.is_empty());
}

#[tokio::test]
async fn test_range_query_n_by_k_rows() {
    let gw = gateway().await;
    let end = Utc::now();
    let frame = gw
        .query_range(
            "cpu_usage_percent",
            end - ChronoDuration::hours(1),
            end,
            Duration::from_secs(60),
        )
        .await
        .unwrap();

    assert_eq!(frame.kind, ResultKind::Range);
    assert_eq!(frame.len(), 6);
    for (_, rows) in frame.series() {
        assert_eq!(rows.len(), 3);
        assert!(rows.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
    assert!(frame.rows[5].value.is_infinite());
}

#[tokio::test]
async fn test_rejected_expression_carries_backend_message() {
    let gw = gateway().await;
    let err = gw.query("invalid_query(", None).await.unwrap_err();

    match &err {
        GatewayError::BackendRejected {
            error_type,
            message,
        } => {
            assert_eq!(error_type, "bad_data");
            assert!(message.contains("parse error"));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_scalar_result_is_unsupported() {
    let gw = gateway().await;
    let err = gw.query("scalar(1)", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResultTypeUnsupported);
}

#[tokio::test]
async fn test_non_numeric_value_is_malformed_sample() {
    let gw = gateway().await;
    let err = gw.query("garbled", None).await.unwrap_err();
    match err {
        GatewayError::MalformedSample { raw, .. } => assert_eq!(raw, "twelve"),
        other => panic!("expected malformed sample, got {:?}", other),
    }
}

// ============================================================================
// Alerts, rules, enumerations
// ============================================================================

#[tokio::test]
async fn test_active_alerts_keep_backend_order() {
    let gw = gateway().await;
    let alerts = gw.active_alerts().await.unwrap();

    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[0].name(), Some("HighCPU"));
    assert_eq!(alerts[0].numeric_value(), Some(94.0));
    assert_eq!(alerts[1].name(), Some("DiskFilling"));
    assert!(alerts[1].active_at.is_none());
}

#[tokio::test]
async fn test_alerting_rules_skip_recording_rules() {
    let gw = gateway().await;
    let rules = gw.alerting_rules().await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].name, "HighCPU");
}

#[tokio::test]
async fn test_metric_catalog_is_sorted() {
    let gw = gateway().await;
    let names = gw.metric_names().await.unwrap();
    assert_eq!(names, vec!["cpu_usage_percent", "http_requests_total", "up"]);
}

#[tokio::test]
async fn test_label_values_and_series() {
    let gw = gateway().await;
    assert_eq!(gw.label_values("job").await.unwrap(), vec!["node", "prometheus"]);

    let series = gw
        .series_matching(
            &[
                "up".to_string(),
                "process_start_time_seconds{job=\"node\"}".to_string(),
            ],
            None,
        )
        .await
        .unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0]["job"], "node");
}

#[tokio::test]
async fn test_plain_5xx_is_unreachable() {
    let gw = gateway().await;
    let err = gw.label_names().await.unwrap_err();
    assert!(err.is_retryable(), "got {:?}", err);
}

#[tokio::test]
async fn test_health_probe() {
    let gw = gateway().await;
    assert!(gw.is_healthy().await);
}

#[tokio::test]
async fn test_refused_connection_is_unreachable() {
    // Bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let gw = PrometheusGateway::new(&format!("http://{}", addr), Duration::from_secs(2)).unwrap();
    let err = gw.query("up", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendUnreachable);
    assert!(!gw.is_healthy().await);
}
