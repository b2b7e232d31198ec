//! Reasoning client - task-specific prompts over a chat completion backend.
//!
//! The client never retries and never validates what the model returns;
//! failures surface to the caller as [`ReasoningError`].

pub mod openai;
pub mod prompts;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

use crate::error::ReasoningError;
use crate::types::{Alert, ChatTurn, TabularFrame};
use prompts::TaskProfile;

pub use openai::OpenAiBackend;

/// One chat-style completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    /// Prior turns followed by the current user turn
    pub turns: Vec<ChatTurn>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ReasoningError>;
}

pub struct ReasoningClient {
    backend: Arc<dyn CompletionBackend>,
    max_tokens_cap: u32,
    history_turns: usize,
}

impl ReasoningClient {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            backend,
            max_tokens_cap: u32::MAX,
            history_turns: prompts::MAX_HISTORY_TURNS,
        }
    }

    /// Prior turns replayed into a chat prompt
    pub fn with_history_turns(mut self, turns: usize) -> Self {
        self.history_turns = turns;
        self
    }

    /// Upper bound applied to every task's token budget
    pub fn with_max_tokens(mut self, cap: u32) -> Self {
        self.max_tokens_cap = cap;
        self
    }

    async fn run(
        &self,
        task: &'static str,
        profile: TaskProfile,
        system: String,
        turns: Vec<ChatTurn>,
    ) -> Result<String, ReasoningError> {
        let request = CompletionRequest {
            system,
            turns,
            temperature: profile.temperature,
            max_tokens: profile.max_tokens.min(self.max_tokens_cap),
        };
        debug!(task, max_tokens = request.max_tokens, "reasoning request");

        self.backend
            .complete(&request)
            .await
            .inspect_err(|e| error!(task, error = %e, "Reasoning call failed"))
    }

    /// Narrative analysis of collected metrics and alerts
    pub async fn analyze_metrics(
        &self,
        collected: &BTreeMap<String, TabularFrame>,
        alerts: &[Alert],
        context: &str,
    ) -> Result<String, ReasoningError> {
        let user = prompts::analysis_user_prompt(collected, alerts, context).map_err(|e| {
            ReasoningError::BackendRejected {
                status: 0,
                message: format!("payload serialization failed: {}", e),
            }
        })?;

        self.run(
            "analyze_metrics",
            prompts::ANALYSIS,
            prompts::ANALYSIS_SYSTEM.to_string(),
            vec![ChatTurn::user(user)],
        )
        .await
    }

    /// Best-effort PromQL for a question; the text is returned as-is, trimmed
    pub async fn generate_promql(
        &self,
        question: &str,
        available_metrics: &[String],
    ) -> Result<String, ReasoningError> {
        let reply = self
            .run(
                "generate_promql",
                prompts::QUERY_GENERATION,
                prompts::QUERY_SYSTEM.to_string(),
                vec![ChatTurn::user(prompts::query_user_prompt(
                    question,
                    available_metrics,
                ))],
            )
            .await?;
        Ok(reply.trim().to_string())
    }

    pub async fn explain_alert(
        &self,
        alert: &Alert,
        related: &BTreeMap<String, TabularFrame>,
    ) -> Result<String, ReasoningError> {
        let user = prompts::alert_user_prompt(alert, related).map_err(|e| {
            ReasoningError::BackendRejected {
                status: 0,
                message: format!("payload serialization failed: {}", e),
            }
        })?;

        self.run(
            "explain_alert",
            prompts::ALERT_EXPLANATION,
            prompts::ALERT_SYSTEM.to_string(),
            vec![ChatTurn::user(user)],
        )
        .await
    }

    pub async fn suggest_improvements(
        &self,
        current_metrics: &[String],
        system_description: &str,
    ) -> Result<String, ReasoningError> {
        self.run(
            "suggest_improvements",
            prompts::IMPROVEMENTS,
            prompts::IMPROVEMENTS_SYSTEM.to_string(),
            vec![ChatTurn::user(prompts::improvements_user_prompt(
                current_metrics,
                system_description,
            ))],
        )
        .await
    }

    /// Reply to a chat message; only the newest history turns are replayed
    pub async fn chat(
        &self,
        message: &str,
        history: &[ChatTurn],
        system_summary: &str,
    ) -> Result<String, ReasoningError> {
        let skip = history.len().saturating_sub(self.history_turns);
        let mut turns: Vec<ChatTurn> = history[skip..].to_vec();
        turns.push(ChatTurn::user(message));

        self.run(
            "chat",
            prompts::CHAT,
            prompts::chat_system_prompt(system_summary),
            turns,
        )
        .await
    }
}

// ============================================================================
// Fake Backend (Testing)
// ============================================================================

/// Scripted completion backend.
///
/// Responses are consumed in order; the last one repeats once the script
/// runs out. Every request is recorded for inspection.
pub struct FakeCompletionBackend {
    responses: Mutex<Vec<Result<String, ReasoningError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeCompletionBackend {
    pub fn new(responses: Vec<Result<String, ReasoningError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always(reply: &str) -> Self {
        Self::new(vec![Ok(reply.to_string())])
    }

    pub fn always_error(error: ReasoningError) -> Self {
        Self::new(vec![Err(error)])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionBackend for FakeCompletionBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ReasoningError> {
        self.requests.lock().unwrap().push(request.clone());

        let mut responses = self.responses.lock().unwrap();
        match responses.len() {
            0 => Err(ReasoningError::BackendRejected {
                status: 500,
                message: "no scripted response".to_string(),
            }),
            1 => responses[0].clone(),
            _ => responses.remove(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatRole;

    fn client(backend: &Arc<FakeCompletionBackend>) -> ReasoningClient {
        ReasoningClient::new(backend.clone())
    }

    #[tokio::test]
    async fn test_chat_replays_only_last_ten_turns() {
        let backend = Arc::new(FakeCompletionBackend::always("ok"));
        let history: Vec<ChatTurn> = (0..16)
            .map(|i| {
                if i % 2 == 0 {
                    ChatTurn::user(format!("q{}", i))
                } else {
                    ChatTurn::assistant(format!("a{}", i))
                }
            })
            .collect();

        client(&backend).chat("latest", &history, "").await.unwrap();

        let request = &backend.requests()[0];
        assert_eq!(request.turns.len(), 11);
        assert_eq!(request.turns[0].content, "q6");
        let last = request.turns.last().unwrap();
        assert_eq!(last.role, ChatRole::User);
        assert_eq!(last.content, "latest");
        assert_eq!(request.temperature, 0.7);
    }

    #[tokio::test]
    async fn test_generated_query_is_trimmed_not_validated() {
        let backend = Arc::new(FakeCompletionBackend::always("  invalid_query(  \n"));
        let expr = client(&backend)
            .generate_promql("broken", &["up".to_string()])
            .await
            .unwrap();
        assert_eq!(expr, "invalid_query(");
    }

    #[tokio::test]
    async fn test_token_cap_applies() {
        let backend = Arc::new(FakeCompletionBackend::always("fine"));
        let client = ReasoningClient::new(backend.clone()).with_max_tokens(800);
        client.suggest_improvements(&[], "web").await.unwrap();
        client.generate_promql("q", &[]).await.unwrap();

        let requests = backend.requests();
        assert_eq!(requests[0].max_tokens, 800);
        assert_eq!(requests[1].max_tokens, 500);
    }

    #[tokio::test]
    async fn test_errors_surface_unchanged() {
        let backend = Arc::new(FakeCompletionBackend::always_error(
            ReasoningError::PromptTooLarge("too big".to_string()),
        ));
        let err = client(&backend)
            .analyze_metrics(&BTreeMap::new(), &[], "ctx")
            .await
            .unwrap_err();
        assert!(matches!(err, ReasoningError::PromptTooLarge(_)));
        assert_eq!(backend.call_count(), 1);
    }
}
