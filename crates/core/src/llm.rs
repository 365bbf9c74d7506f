// LLM Gateway Abstraction
//
// The gateway is the only way the loop talks to a model. A call returns the
// raw JSON body so it can be checkpointed verbatim; the body is validated and
// parsed after the checkpoint, which keeps a skipped turn deterministic on
// replay.

use agentrun_durable::StepFailure;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::message::{Message, ToolCall};
use crate::validation::{validate, Validation};

/// A chat-completions request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Tool declarations (`{type: function, function: {...}}`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Trait for LLM gateways
///
/// Implementations return the response body as JSON. Transport problems and
/// non-success statuses are reported as [`StepFailure`] so the step executor
/// can retry them.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<Value, StepFailure>;
}

/// Why a response body could not be turned into an assistant turn
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResponseShapeError {
    #[error("response does not match the chat-completions shape: {0}")]
    InvalidShape(String),

    #[error("response has no choices")]
    NoChoices,

    #[error("first choice could not be parsed: {0}")]
    MalformedChoice(String),
}

/// Assistant turn extracted from a response body
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantTurn {
    /// Content, empty when the model sent `null`
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
}

impl AssistantTurn {
    /// Whether the run should finish with this turn's content
    pub fn is_final(&self) -> bool {
        self.finish_reason.as_deref() == Some("stop") || self.tool_calls.is_empty()
    }

    pub fn into_message(self) -> Message {
        Message::assistant_with_tools(self.content, self.tool_calls)
    }
}

/// Minimal schema every chat-completions body must satisfy
pub fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string" },
            "model": { "type": "string" },
            "choices": { "type": "array" }
        },
        "required": ["id", "model", "choices"]
    })
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Validate a response body and extract the first choice
pub fn parse_response(body: &Value) -> Result<AssistantTurn, ResponseShapeError> {
    if let Validation::Invalid(errors) = validate(&response_schema(), body) {
        return Err(ResponseShapeError::InvalidShape(errors.join("; ")));
    }

    let first = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or(ResponseShapeError::NoChoices)?;

    let choice: WireChoice = serde_json::from_value(first.clone())
        .map_err(|e| ResponseShapeError::MalformedChoice(e.to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCall::new(call.id, call.function.name, call.function.arguments))
        .collect();

    Ok(AssistantTurn {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        finish_reason: choice.finish_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(choices: Value) -> Value {
        json!({"id": "chatcmpl-1", "model": "gpt-4o-mini", "choices": choices})
    }

    #[test]
    fn test_parse_final_answer() {
        let turn = parse_response(&body(json!([{
            "message": {"role": "assistant", "content": "pong"},
            "finish_reason": "stop"
        }])))
        .unwrap();

        assert_eq!(turn.content, "pong");
        assert!(turn.is_final());
    }

    #[test]
    fn test_parse_tool_calls() {
        let turn = parse_response(&body(json!([{
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "c1",
                    "type": "function",
                    "function": {"name": "search_repos", "arguments": "{\"query\":\"rust\"}"}
                }]
            },
            "finish_reason": "tool_calls"
        }])))
        .unwrap();

        assert_eq!(turn.content, "");
        assert!(!turn.is_final());
        assert_eq!(turn.tool_calls[0].id, "c1");
        assert_eq!(turn.tool_calls[0].arguments, "{\"query\":\"rust\"}");
    }

    #[test]
    fn test_stop_wins_over_tool_calls() {
        let turn = parse_response(&body(json!([{
            "message": {
                "content": "done",
                "tool_calls": [{"id": "c1", "function": {"name": "echo", "arguments": "{}"}}]
            },
            "finish_reason": "stop"
        }])))
        .unwrap();
        assert!(turn.is_final());
    }

    #[test]
    fn test_missing_fields_fail_shape() {
        let result = parse_response(&json!({"choices": []}));
        assert!(matches!(result, Err(ResponseShapeError::InvalidShape(_))));

        let result = parse_response(&json!("<html>bad gateway</html>"));
        assert!(matches!(result, Err(ResponseShapeError::InvalidShape(_))));
    }

    #[test]
    fn test_empty_choices() {
        let result = parse_response(&body(json!([])));
        assert_eq!(result, Err(ResponseShapeError::NoChoices));
    }

    #[test]
    fn test_unparseable_choice() {
        let result = parse_response(&body(json!([{"text": "legacy completion"}])));
        assert!(matches!(result, Err(ResponseShapeError::MalformedChoice(_))));
    }
}
