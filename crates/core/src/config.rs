// Configuration for agent runs
//
// LoopConfig drives the controller; GatewayConfig locates the
// OpenAI-compatible endpoint. Both can be created directly or read from the
// environment.

use agentrun_durable::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AgentRunError, Result};

/// Default chat-completions endpoint
pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Default model identifier
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default turn budget
pub const DEFAULT_MAX_TURNS: usize = 10;

/// Configuration for the loop controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Model identifier sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum number of turns before the run stops without an answer
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Maximum tokens to generate per response
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Retry policy for the LLM step of each turn
    #[serde(default = "default_llm_retry")]
    pub llm_retry: RetryPolicy,

    /// Retry policy for each tool call
    #[serde(default = "default_tool_retry")]
    pub tool_retry: RetryPolicy,

    /// Sent ahead of the transcript, never stored in it
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}

fn default_llm_retry() -> RetryPolicy {
    RetryPolicy::exponential()
        .with_max_attempts(3)
        .with_initial_interval(Duration::from_secs(1))
}

fn default_tool_retry() -> RetryPolicy {
    RetryPolicy::fixed(Duration::from_millis(500), 2)
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_turns: default_max_turns(),
            max_tokens: None,
            llm_retry: default_llm_retry(),
            tool_retry: default_tool_retry(),
            system_prompt: None,
        }
    }
}

impl LoopConfig {
    /// Create a configuration for the given model
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `AGENTRUN_MODEL`: Model identifier (default: "gpt-4o-mini")
    /// - `AGENTRUN_MAX_TURNS`: Turn budget (default: 10)
    /// - `AGENTRUN_MAX_TOKENS`: Maximum tokens per response
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(model) = std::env::var("AGENTRUN_MODEL") {
            config.model = model;
        }
        if let Ok(value) = std::env::var("AGENTRUN_MAX_TURNS") {
            config.max_turns = parse_env("AGENTRUN_MAX_TURNS", &value)?;
        }
        if let Ok(value) = std::env::var("AGENTRUN_MAX_TOKENS") {
            config.max_tokens = Some(parse_env("AGENTRUN_MAX_TOKENS", &value)?);
        }
        Ok(config)
    }

    /// Set maximum turns
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the LLM step retry policy
    pub fn with_llm_retry(mut self, policy: RetryPolicy) -> Self {
        self.llm_retry = policy;
        self
    }

    /// Set the tool step retry policy
    pub fn with_tool_retry(mut self, policy: RetryPolicy) -> Self {
        self.tool_retry = policy;
        self
    }

    /// Set the system prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Configuration for the OpenAI-compatible gateway
#[derive(Clone)]
pub struct GatewayConfig {
    /// Full chat-completions URL
    pub api_url: String,
    /// Bearer token
    pub api_key: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl GatewayConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `AGENTRUN_API_KEY` or `OPENAI_API_KEY`: Bearer token (required)
    /// - `AGENTRUN_API_URL`: Chat-completions URL (default: OpenAI)
    /// - `AGENTRUN_API_TIMEOUT_SECS`: Per-request timeout (default: 60)
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("AGENTRUN_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .map_err(|_| {
                AgentRunError::config("AGENTRUN_API_KEY or OPENAI_API_KEY must be set")
            })?;

        let mut config = Self::new(api_key);
        if let Ok(url) = std::env::var("AGENTRUN_API_URL") {
            config.api_url = url;
        }
        if let Ok(value) = std::env::var("AGENTRUN_API_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(parse_env("AGENTRUN_API_TIMEOUT_SECS", &value)?);
        }
        Ok(config)
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AgentRunError::config(format!("{} has an invalid value: {}", name, value)))
}
