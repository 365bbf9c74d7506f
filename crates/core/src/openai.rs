// OpenAI-compatible LLM Gateway
//
// Implementation of LlmGateway for OpenAI chat-completions compatible APIs.
// The response body is returned as JSON without interpretation; shape
// checks happen in the loop after the body has been checkpointed.

use agentrun_durable::StepFailure;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{AgentRunError, Result};
use crate::llm::{ChatRequest, LlmGateway};
use crate::message::{Message, MessageRole};

/// OpenAI-compatible gateway
///
/// # Example
///
/// ```ignore
/// use agentrun_core::openai::OpenAiCompatibleGateway;
///
/// let gateway = OpenAiCompatibleGateway::from_env()?;
/// // or with a custom endpoint
/// let gateway = OpenAiCompatibleGateway::with_base_url(
///     "your-api-key",
///     "http://localhost:8080/v1/chat/completions",
/// )?;
/// ```
#[derive(Clone)]
pub struct OpenAiCompatibleGateway {
    client: Client,
    api_key: String,
    api_url: String,
}

impl OpenAiCompatibleGateway {
    /// Create a gateway from explicit configuration
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AgentRunError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: config.api_key,
            api_url: config.api_url,
        })
    }

    /// Create a gateway from `AGENTRUN_API_*` / `OPENAI_API_KEY` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(GatewayConfig::from_env()?)
    }

    /// Create a gateway with a custom API URL (for OpenAI-compatible APIs)
    pub fn with_base_url(api_key: impl Into<String>, api_url: impl Into<String>) -> Result<Self> {
        Self::new(GatewayConfig::new(api_key).with_api_url(api_url))
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn convert_message(msg: &Message) -> WireMessage<'_> {
        let tool_calls = if msg.has_tool_calls() {
            Some(
                msg.tool_calls()
                    .iter()
                    .map(|tc| WireToolCall {
                        id: &tc.id,
                        r#type: "function",
                        function: WireFunction {
                            name: &tc.name,
                            arguments: &tc.arguments,
                        },
                    })
                    .collect(),
            )
        } else {
            None
        };

        // Assistant tool-call turns carry no text
        let content = if msg.role == MessageRole::Assistant
            && msg.content.is_empty()
            && tool_calls.is_some()
        {
            None
        } else {
            Some(msg.content.as_str())
        };

        WireMessage {
            role: msg.role,
            content,
            tool_calls,
            tool_call_id: msg.tool_call_id.as_deref(),
        }
    }
}

#[async_trait]
impl LlmGateway for OpenAiCompatibleGateway {
    async fn complete(&self, request: ChatRequest) -> std::result::Result<Value, StepFailure> {
        let body = WireRequest {
            model: &request.model,
            messages: request.messages.iter().map(Self::convert_message).collect(),
            max_tokens: request.max_tokens,
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(&request.tools)
            },
        };

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending chat completion request"
        );

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                StepFailure::retryable(format!("Failed to send request: {}", e))
                    .with_type("TRANSPORT")
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            StepFailure::retryable(format!("Failed to read response body: {}", e))
                .with_type("TRANSPORT")
        })?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "gateway returned an error status");
            return Err(StepFailure::retryable(format!(
                "Gateway error ({}): {}",
                status, text
            ))
            .with_type(format!("HTTP_{}", status.as_u16())));
        }

        // A non-JSON success body is kept as a string so it fails the shape check
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

impl std::fmt::Debug for OpenAiCompatibleGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleGateway")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a Vec<Value>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: MessageRole,
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct WireToolCall<'a> {
    id: &'a str,
    r#type: &'static str,
    function: WireFunction<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    arguments: &'a str,
}
