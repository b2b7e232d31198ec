//! Monitoring recommendations over the current metric catalog.

use std::time::Instant;
use tracing::instrument;

use super::{Agent, AgentError};

const PIPELINE: &str = "recommendations";

pub const DEFAULT_SYSTEM_DESCRIPTION: &str = "Generic system monitoring setup";

impl Agent {
    #[instrument(skip(self))]
    pub async fn monitoring_recommendations(
        &self,
        system_description: &str,
    ) -> Result<String, AgentError> {
        let started = Instant::now();
        let result = self.run_recommendations(system_description).await;
        let outcome = if result.is_ok() { "success" } else { "error" };
        self.metrics.record_run(PIPELINE, outcome, started);
        result
    }

    async fn run_recommendations(&self, system_description: &str) -> Result<String, AgentError> {
        let catalog = self.metric_catalog().await?;
        let description = match system_description.trim() {
            "" => DEFAULT_SYSTEM_DESCRIPTION,
            text => text,
        };

        self.reasoning
            .suggest_improvements(&catalog, description)
            .await
            .map_err(|e| self.reasoning_failed(e))
    }
}
