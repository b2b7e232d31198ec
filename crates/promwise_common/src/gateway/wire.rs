//! Wire shapes of the metrics backend HTTP API.
//!
//! Every endpoint answers with a `status` envelope; the payload under `data`
//! differs per endpoint.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::str::FromStr;

use super::normalize::QueryResult;
use crate::error::GatewayError;
use crate::types::{Alert, AlertingRule, Labels, MetricMetadata, MetricSeries, Sample};

/// Top-level response envelope
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ApiEnvelope<T> {
    Success {
        data: T,
        #[serde(default)]
        warnings: Vec<String>,
    },
    Error {
        #[serde(rename = "errorType", default)]
        error_type: String,
        #[serde(default)]
        error: String,
    },
}

/// Query payload before the result type is resolved
#[derive(Debug, Deserialize)]
pub struct RawQueryData {
    #[serde(rename = "resultType")]
    pub result_type: String,
    pub result: serde_json::Value,
}

/// Result types the backend can report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireResultType {
    Vector,
    Matrix,
    Scalar,
    String,
}

impl FromStr for WireResultType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vector" => Ok(WireResultType::Vector),
            "matrix" => Ok(WireResultType::Matrix),
            "scalar" => Ok(WireResultType::Scalar),
            "string" => Ok(WireResultType::String),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InstantSeries {
    #[serde(default)]
    metric: Labels,
    value: (f64, String),
}

#[derive(Debug, Deserialize)]
struct RangeSeries {
    #[serde(default)]
    metric: Labels,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

impl RawQueryData {
    /// Resolve the payload into one of the two supported shapes
    pub fn decode(self) -> Result<QueryResult, GatewayError> {
        let kind = WireResultType::from_str(&self.result_type)
            .map_err(|_| GatewayError::ResultTypeUnsupported(self.result_type.clone()))?;

        match kind {
            WireResultType::Vector => {
                let series: Vec<InstantSeries> = serde_json::from_value(self.result)
                    .map_err(|e| GatewayError::MalformedResponse(format!("vector result: {}", e)))?;
                Ok(QueryResult::Instant(
                    series
                        .into_iter()
                        .map(|s| MetricSeries {
                            labels: s.metric,
                            samples: vec![Sample {
                                timestamp: s.value.0,
                                value: s.value.1,
                            }],
                        })
                        .collect(),
                ))
            }
            WireResultType::Matrix => {
                let series: Vec<RangeSeries> = serde_json::from_value(self.result)
                    .map_err(|e| GatewayError::MalformedResponse(format!("matrix result: {}", e)))?;
                Ok(QueryResult::Range(
                    series
                        .into_iter()
                        .map(|s| MetricSeries {
                            labels: s.metric,
                            samples: s
                                .values
                                .into_iter()
                                .map(|(timestamp, value)| Sample { timestamp, value })
                                .collect(),
                        })
                        .collect(),
                ))
            }
            WireResultType::Scalar | WireResultType::String => {
                Err(GatewayError::ResultTypeUnsupported(self.result_type))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AlertsData {
    #[serde(default)]
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Deserialize)]
pub struct RulesData {
    #[serde(default)]
    pub groups: Vec<RuleGroup>,
}

#[derive(Debug, Deserialize)]
pub struct RuleGroup {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<WireRule>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireRule {
    Alerting(AlertingRule),
    Recording(RecordingRule),
}

#[derive(Debug, Deserialize)]
pub struct RecordingRule {
    pub name: String,
    #[serde(default)]
    pub query: String,
}

impl RulesData {
    /// Alerting rules only, group order then rule order
    pub fn into_alerting(self) -> Vec<AlertingRule> {
        self.groups
            .into_iter()
            .flat_map(|g| g.rules)
            .filter_map(|rule| match rule {
                WireRule::Alerting(rule) => Some(rule),
                WireRule::Recording(_) => None,
            })
            .collect()
    }
}

pub type MetadataData = BTreeMap<String, Vec<MetricMetadata>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_error_variant() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"parse error at char 14"}"#;
        let env: ApiEnvelope<RawQueryData> = serde_json::from_str(body).unwrap();
        match env {
            ApiEnvelope::Error { error_type, error } => {
                assert_eq!(error_type, "bad_data");
                assert!(error.contains("parse error"));
            }
            ApiEnvelope::Success { .. } => panic!("expected error envelope"),
        }
    }

    #[test]
    fn test_scalar_result_is_unsupported() {
        let body = r#"{"resultType":"scalar","result":[1700000000,"1"]}"#;
        let raw: RawQueryData = serde_json::from_str(body).unwrap();
        assert!(matches!(
            raw.decode(),
            Err(GatewayError::ResultTypeUnsupported(t)) if t == "scalar"
        ));
    }

    #[test]
    fn test_unknown_result_type_is_unsupported() {
        let raw = RawQueryData {
            result_type: "histogram".to_string(),
            result: serde_json::json!([]),
        };
        assert!(matches!(
            raw.decode(),
            Err(GatewayError::ResultTypeUnsupported(_))
        ));
    }

    #[test]
    fn test_rules_filter_drops_recording() {
        let body = r#"{
            "groups": [
                {"name": "node", "rules": [
                    {"type": "recording", "name": "job:up:sum", "query": "sum(up) by (job)"},
                    {"type": "alerting", "name": "InstanceDown", "query": "up == 0", "duration": 300,
                     "labels": {"severity": "critical"}, "annotations": {}, "alerts": []}
                ]},
                {"name": "empty", "rules": []},
                {"name": "recording-only", "rules": [
                    {"type": "recording", "name": "x", "query": "y"}
                ]}
            ]
        }"#;
        let rules: RulesData = serde_json::from_str(body).unwrap();
        let alerting = rules.into_alerting();
        assert_eq!(alerting.len(), 1);
        assert_eq!(alerting[0].name, "InstanceDown");
        assert_eq!(alerting[0].duration, 300.0);
    }

    #[test]
    fn test_matrix_decodes_all_samples() {
        let body = r#"{"resultType":"matrix","result":[
            {"metric":{"__name__":"up","instance":"a"},"values":[[1,"1"],[2,"1"],[3,"0"]]},
            {"metric":{"__name__":"up","instance":"b"},"values":[[1,"1"],[2,"1"],[3,"1"]]}
        ]}"#;
        let raw: RawQueryData = serde_json::from_str(body).unwrap();
        let result = raw.decode().unwrap();
        assert_eq!(result.series().len(), 2);
        assert_eq!(result.normalize().unwrap().len(), 6);
    }
}
