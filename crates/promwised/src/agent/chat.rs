//! Chat: Summarize -> Respond -> Append, one turn at a time per conversation.

use promwise_common::{ChatTurn, GatewayError};
use serde::Serialize;
use std::time::Instant;
use tracing::{instrument, warn};

use super::window::DEFAULT_CONVERSATION;
use super::{Agent, AgentError};

const PIPELINE: &str = "chat";

/// Digest used when the metrics backend cannot be read
pub const SUMMARY_UNAVAILABLE: &str = "System status unavailable";

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub conversation_id: String,
    pub response: String,
    pub system_summary: String,
    /// Window length after the exchange was appended
    pub history_len: usize,
}

impl Agent {
    #[instrument(skip(self, message), fields(chars = message.len()))]
    pub async fn chat(
        &self,
        message: &str,
        conversation_id: Option<&str>,
    ) -> Result<ChatReply, AgentError> {
        let started = Instant::now();
        let result = self.run_chat(message, conversation_id).await;
        let outcome = if result.is_ok() { "success" } else { "error" };
        self.metrics.record_run(PIPELINE, outcome, started);
        result
    }

    async fn run_chat(
        &self,
        message: &str,
        conversation_id: Option<&str>,
    ) -> Result<ChatReply, AgentError> {
        let id = conversation_id.unwrap_or(DEFAULT_CONVERSATION);
        let conversation = self.conversations.get_or_create(id);

        // Held until the exchange is appended; later turns on this
        // conversation wait here
        let _turn = conversation.begin_turn().await;

        let summary = self.system_summary().await;
        let history = conversation.history();

        let response = self
            .reasoning
            .chat(message, &history, &summary)
            .await
            .map_err(|e| self.reasoning_failed(e))?;

        let history_len = conversation.append(
            ChatTurn::user(message),
            ChatTurn::assistant(response.clone()),
        );

        Ok(ChatReply {
            conversation_id: id.to_string(),
            response,
            system_summary: summary,
            history_len,
        })
    }

    /// One-line digest: services up out of total, plus active alert count.
    ///
    /// Not retried; a down backend degrades the digest instead of delaying the reply.
    pub async fn system_summary(&self) -> String {
        let digest = async {
            let up = self.gateway.query("up", None).await?;
            let alerts = self.gateway.active_alerts().await?;
            Ok::<_, GatewayError>((up, alerts))
        };

        match digest.await {
            Ok((up, alerts)) => {
                let up_count = up.rows.iter().filter(|r| r.value == 1.0).count();
                format!(
                    "System Status: {}/{} services up, {} active alerts",
                    up_count,
                    up.len(),
                    alerts.len()
                )
            }
            Err(e) => {
                warn!(error = %e, "Failed to get system summary");
                self.metrics.record_backend_error("metrics", e.kind());
                SUMMARY_UNAVAILABLE.to_string()
            }
        }
    }
}
