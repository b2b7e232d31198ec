//! Configuration for promwised.
//!
//! Loads settings from /etc/promwise/config.toml (or `--config`), falls back
//! to defaults when the file is missing, then applies environment overrides.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::retry::RetryPolicy;

/// Config file path
pub const CONFIG_PATH: &str = "/etc/promwise/config.toml";

/// Placeholder shipped in sample env files
const API_KEY_PLACEHOLDER: &str = "your_openai_api_key_here";

/// Metrics backend connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    #[serde(default = "default_prometheus_url")]
    pub url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_prometheus_timeout")]
    pub timeout_secs: u64,

    /// Retries after the first attempt for gateway calls
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

fn default_prometheus_url() -> String {
    "http://localhost:9090".to_string()
}

fn default_prometheus_timeout() -> u64 {
    30
}

fn default_max_retries() -> usize {
    3
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            url: default_prometheus_url(),
            timeout_secs: default_prometheus_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

/// Reasoning backend (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default = "default_reasoning_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_reasoning_timeout")]
    pub timeout_secs: u64,

    /// Cap on every task's completion budget
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_reasoning_endpoint() -> String {
    "https://api.openai.com".to_string()
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_reasoning_timeout() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    2000
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            endpoint: default_reasoning_endpoint(),
            model: default_model(),
            api_key: None,
            timeout_secs: default_reasoning_timeout(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Orchestrator behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Conversation window capacity in turns
    #[serde(default = "default_max_conversation_turns")]
    pub max_conversation_turns: usize,

    /// Conversations kept in memory; least recently used idle ones go first
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,

    /// Turns replayed into each chat prompt
    #[serde(default = "default_history_turns_in_prompt")]
    pub history_turns_in_prompt: usize,

    #[serde(default = "default_time_range_hours")]
    pub default_time_range_hours: u32,

    /// Metrics collected by the health analysis sweep
    #[serde(default = "default_watch_list")]
    pub watch_list: Vec<String>,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_backoff_factor")]
    pub retry_backoff_factor: f64,
}

fn default_max_conversation_turns() -> usize {
    20
}

fn default_max_conversations() -> usize {
    1000
}

fn default_history_turns_in_prompt() -> usize {
    10
}

fn default_time_range_hours() -> u32 {
    1
}

pub fn default_watch_list() -> Vec<String> {
    [
        "up",
        "cpu_usage_percent",
        "memory_usage_percent",
        "disk_usage_percent",
        "http_requests_total",
        "http_request_duration_seconds",
        "process_resident_memory_bytes",
        "go_memstats_alloc_bytes",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_retry_base_delay() -> u64 {
    1000
}

fn default_retry_backoff_factor() -> f64 {
    2.0
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_conversation_turns: default_max_conversation_turns(),
            max_conversations: default_max_conversations(),
            history_turns_in_prompt: default_history_turns_in_prompt(),
            default_time_range_hours: default_time_range_hours(),
            watch_list: default_watch_list(),
            cache_ttl_secs: default_cache_ttl(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_backoff_factor: default_retry_backoff_factor(),
        }
    }
}

/// HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => bail!("Unknown log format: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    #[serde(default)]
    pub reasoning: ReasoningConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load `path`, or defaults if it does not exist, then apply the environment
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load_from_path(path)?
        } else {
            warn!("Config not found at {}, using defaults", path.display());
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply overrides from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("PROMETHEUS_URL") {
            self.prometheus.url = url;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.reasoning.api_key = Some(key);
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            self.reasoning.model = model;
        }
        if let Some(endpoint) = lookup("OPENAI_BASE_URL") {
            self.reasoning.endpoint = endpoint;
        }
        if let Some(host) = lookup("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("API_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("API_PORT is not a port number: {}", port))?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        Ok(())
    }

    /// Reject configurations the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        match self.reasoning.api_key.as_deref() {
            None | Some("") => bail!("Reasoning API key is required (set OPENAI_API_KEY)"),
            Some(API_KEY_PLACEHOLDER) => {
                bail!("Reasoning API key is still the placeholder value")
            }
            Some(_) => {}
        }

        reqwest::Url::parse(&self.prometheus.url)
            .with_context(|| format!("Invalid Prometheus URL: {}", self.prometheus.url))?;
        reqwest::Url::parse(&self.reasoning.endpoint)
            .with_context(|| format!("Invalid reasoning endpoint: {}", self.reasoning.endpoint))?;

        if self.agent.max_conversation_turns == 0 {
            bail!("agent.max_conversation_turns must be at least 1");
        }
        if self.agent.max_conversations == 0 {
            bail!("agent.max_conversations must be at least 1");
        }
        Ok(())
    }

    /// Backoff policy for gateway call-sites
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_retries(
            self.prometheus.max_retries,
            Duration::from_millis(self.agent.retry_base_delay_ms),
            self.agent.retry_backoff_factor,
        )
    }

    pub fn prometheus_timeout(&self) -> Duration {
        Duration::from_secs(self.prometheus.timeout_secs)
    }

    pub fn reasoning_timeout(&self) -> Duration {
        Duration::from_secs(self.reasoning.timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.agent.cache_ttl_secs)
    }
}
