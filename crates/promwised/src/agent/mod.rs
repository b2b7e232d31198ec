//! Agent orchestrator.
//!
//! Composes the metrics gateway and the reasoning client into pipelines:
//! 1. Health analysis (watch-list sweep, alerts, synthesis)
//! 2. Natural-language query (catalog, generation, branch, execute, classify)
//! 3. Alert investigation (lookup, correlate, explain) and the alert summary
//! 4. Chat over a bounded per-conversation window
//! 5. Monitoring recommendations
//!
//! Invariants:
//! - Per-item sweeps drop failing items and keep going
//! - The final reasoning step of every pipeline is fatal on failure
//! - Only gateway calls are retried, and only transport failures

pub mod alerts;
pub mod chat;
pub mod health;
pub mod query;
pub mod recommendations;
pub mod window;

use promwise_common::config::AgentConfig;
use promwise_common::retry::{retry_with_cancel, RetryPolicy};
use promwise_common::{
    ErrorKind, GatewayError, MetricsGateway, ReasoningClient, ReasoningError, TtlCache,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::metrics::AgentMetrics;
use window::ConversationStore;

pub use alerts::{AlertSummary, Investigation};
pub use chat::ChatReply;
pub use health::HealthReport;
pub use query::QueryOutcome;
pub use window::{ConversationWindow, DEFAULT_CONVERSATION};

/// Cache key of the metric-name catalog
pub const CATALOG_CACHE_KEY: &str = "metadata";

/// Catalog and other small lookups shared across pipelines
pub type AgentCache = TtlCache<String, Vec<String>>;

// ============================================================================
// Errors
// ============================================================================

/// Classified pipeline failure
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Reasoning(#[from] ReasoningError),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Gateway(e) => e.kind(),
            AgentError::Reasoning(e) => e.kind(),
        }
    }

    /// Which backend failed
    pub fn backend(&self) -> &'static str {
        match self {
            AgentError::Gateway(_) => "metrics",
            AgentError::Reasoning(_) => "reasoning",
        }
    }
}

// ============================================================================
// Agent
// ============================================================================

pub struct Agent {
    gateway: Arc<dyn MetricsGateway>,
    reasoning: ReasoningClient,
    cache: Arc<AgentCache>,
    retry: RetryPolicy,
    config: AgentConfig,
    conversations: ConversationStore,
    metrics: AgentMetrics,
    /// Stops pending retries on daemon shutdown
    shutdown: CancellationToken,
}

impl Agent {
    pub fn new(
        gateway: Arc<dyn MetricsGateway>,
        reasoning: ReasoningClient,
        config: AgentConfig,
        metrics: AgentMetrics,
    ) -> Self {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(config.cache_ttl_secs)));
        let retry = RetryPolicy {
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            backoff_factor: config.retry_backoff_factor,
            ..RetryPolicy::default()
        };
        let conversations =
            ConversationStore::new(config.max_conversation_turns, config.max_conversations);

        Self {
            gateway,
            reasoning,
            cache,
            retry,
            config,
            conversations,
            metrics,
            shutdown: CancellationToken::new(),
        }
    }

    /// Share a process-wide cache instead of the private one
    pub fn with_cache(mut self, cache: Arc<AgentCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn gateway(&self) -> &Arc<dyn MetricsGateway> {
        &self.gateway
    }

    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run a gateway call under the retry policy; transport failures only
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        retry_with_cancel(&self.retry, &self.shutdown, GatewayError::is_retryable, op)
            .await
            .inspect_err(|e| self.metrics.record_backend_error("metrics", e.kind()))
    }

    fn reasoning_failed(&self, e: ReasoningError) -> AgentError {
        self.metrics.record_backend_error("reasoning", e.kind());
        AgentError::Reasoning(e)
    }

    /// Metric-name catalog, served from the TTL cache when fresh
    pub async fn metric_catalog(&self) -> Result<Vec<String>, AgentError> {
        let key = CATALOG_CACHE_KEY.to_string();
        if let Some(names) = self.cache.get(&key) {
            debug!(count = names.len(), "metric catalog from cache");
            return Ok(names);
        }

        let gateway = &self.gateway;
        let names = self.with_retry(move || gateway.metric_names()).await?;
        self.cache.set(key, names.clone());
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promwise_common::gateway::FakeGateway;
    use promwise_common::reasoning::FakeCompletionBackend;

    fn agent(gateway: Arc<FakeGateway>) -> Agent {
        let backend = Arc::new(FakeCompletionBackend::always("ok"));
        Agent::new(
            gateway,
            ReasoningClient::new(backend),
            AgentConfig::default(),
            AgentMetrics::new().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_catalog_is_cached() {
        let gateway = Arc::new(FakeGateway::new().with_metric_names(&["up", "cpu_usage_percent"]));
        let agent = agent(gateway.clone());

        let first = agent.metric_catalog().await.unwrap();
        let second = agent.metric_catalog().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, vec!["cpu_usage_percent", "up"]);
        assert_eq!(gateway.call_count("metadata:"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_catalog_refetched_after_ttl() {
        let gateway = Arc::new(FakeGateway::new().with_metric_names(&["up"]));
        let agent = agent(gateway.clone());

        agent.metric_catalog().await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        agent.metric_catalog().await.unwrap();

        assert_eq!(gateway.call_count("metadata:"), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_retries() {
        let gateway = Arc::new(FakeGateway::new().flaky("up", 5));
        let token = CancellationToken::new();
        token.cancel();
        let agent = agent(gateway.clone()).with_shutdown(token);

        let gw = &gateway;
        let err = agent
            .with_retry(move || gw.query("up", None))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BackendUnreachable);
        assert_eq!(gateway.call_count("query:up"), 1);
    }

    #[test]
    fn test_error_kind_projection() {
        let err = AgentError::from(ReasoningError::PromptTooLarge("big".into()));
        assert_eq!(err.kind(), ErrorKind::PromptTooLarge);
        assert_eq!(err.backend(), "reasoning");
    }
}
