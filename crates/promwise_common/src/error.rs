//! Error types for the metrics gateway and the reasoning client.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of failure kinds callers can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BackendUnreachable,
    BackendRejected,
    ResultTypeUnsupported,
    MalformedSample,
    MalformedResponse,
    PromptTooLarge,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BackendUnreachable => "backend_unreachable",
            ErrorKind::BackendRejected => "backend_rejected",
            ErrorKind::ResultTypeUnsupported => "result_type_unsupported",
            ErrorKind::MalformedSample => "malformed_sample",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::PromptTooLarge => "prompt_too_large",
        }
    }
}

/// Metrics backend failures
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("Metrics backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("Metrics backend rejected request ({error_type}): {message}")]
    BackendRejected { error_type: String, message: String },

    #[error("Unsupported result type: {0}")]
    ResultTypeUnsupported(String),

    #[error("Malformed sample in series {series}: {raw:?}")]
    MalformedSample { series: String, raw: String },

    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::BackendUnreachable(_) => ErrorKind::BackendUnreachable,
            GatewayError::BackendRejected { .. } => ErrorKind::BackendRejected,
            GatewayError::ResultTypeUnsupported(_) => ErrorKind::ResultTypeUnsupported,
            GatewayError::MalformedSample { .. } => ErrorKind::MalformedSample,
            GatewayError::MalformedResponse(_) => ErrorKind::MalformedResponse,
        }
    }

    /// Only transport failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::BackendUnreachable(_))
    }
}

/// Reasoning backend failures
#[derive(Error, Debug, Clone)]
pub enum ReasoningError {
    #[error("Reasoning backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("Reasoning backend rejected request (HTTP {status}): {message}")]
    BackendRejected { status: u16, message: String },

    #[error("Prompt exceeds the model context: {0}")]
    PromptTooLarge(String),
}

impl ReasoningError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReasoningError::BackendUnreachable(_) => ErrorKind::BackendUnreachable,
            ReasoningError::BackendRejected { .. } => ErrorKind::BackendRejected,
            ReasoningError::PromptTooLarge(_) => ErrorKind::PromptTooLarge,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ReasoningError::BackendUnreachable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_failures_retry() {
        assert!(GatewayError::BackendUnreachable("refused".into()).is_retryable());
        assert!(!GatewayError::BackendRejected {
            error_type: "bad_data".into(),
            message: "parse error".into(),
        }
        .is_retryable());
        assert!(!GatewayError::ResultTypeUnsupported("scalar".into()).is_retryable());
        assert!(!ReasoningError::PromptTooLarge("too long".into()).is_retryable());
        assert!(ReasoningError::BackendUnreachable("timeout".into()).is_retryable());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ResultTypeUnsupported).unwrap();
        assert_eq!(json, "\"result_type_unsupported\"");
        assert_eq!(ErrorKind::PromptTooLarge.as_str(), "prompt_too_large");
    }
}
