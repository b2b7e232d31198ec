//! Promwise Common - shared types and backend clients for the promwise agent.
//!
//! Holds everything the daemon composes: the metrics gateway, the reasoning
//! client, resilience primitives and the small statistics/PromQL helpers.

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod promql;
pub mod reasoning;
pub mod retry;
pub mod stats;
pub mod types;

pub use cache::TtlCache;
pub use error::{ErrorKind, GatewayError, ReasoningError};
pub use gateway::{MetricsGateway, PrometheusGateway};
pub use reasoning::{CompletionBackend, OpenAiBackend, ReasoningClient};
pub use retry::RetryPolicy;
pub use types::*;
