// In-memory implementations for examples and testing
//
// ScriptedGateway plays back a queue of gateway replies. The in-memory run
// store lives in `store::memory`; the in-memory step store is provided by
// agentrun-durable.

use agentrun_durable::StepFailure;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;

use crate::llm::{ChatRequest, LlmGateway};
use crate::message::ToolCall;

/// One scripted gateway reply
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Response body returned as-is
    Body(Value),
    /// Failure reported to the step executor
    Failure(StepFailure),
}

/// Build a chat-completions body with a final answer
pub fn text_completion(content: impl Into<String>) -> Value {
    json!({
        "id": "chatcmpl-scripted",
        "model": "scripted",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content.into()},
            "finish_reason": "stop"
        }]
    })
}

/// Build a chat-completions body requesting tools
pub fn tool_call_completion(calls: &[ToolCall]) -> Value {
    let tool_calls: Vec<Value> = calls
        .iter()
        .map(|call| {
            json!({
                "id": call.id,
                "type": "function",
                "function": {"name": call.name, "arguments": call.arguments}
            })
        })
        .collect();

    json!({
        "id": "chatcmpl-scripted",
        "model": "scripted",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": null, "tool_calls": tool_calls},
            "finish_reason": "tool_calls"
        }]
    })
}

/// Mock LLM gateway for testing
///
/// Returns scripted replies in sequence. Once the script is exhausted the
/// fallback reply (if any) is repeated; without one the call fails with a
/// non-retryable error.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<ScriptedReply>>,
    fallback: Option<ScriptedReply>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a final answer
    pub fn with_text(self, content: impl Into<String>) -> Self {
        self.with_body(text_completion(content))
    }

    /// Queue a tool-call response
    pub fn with_tool_calls(self, calls: Vec<ToolCall>) -> Self {
        self.with_body(tool_call_completion(&calls))
    }

    /// Queue an arbitrary body
    pub fn with_body(self, body: Value) -> Self {
        self.push(ScriptedReply::Body(body));
        self
    }

    /// Queue a failure
    pub fn with_failure(self, failure: StepFailure) -> Self {
        self.push(ScriptedReply::Failure(failure));
        self
    }

    /// Reply used after the script runs out
    pub fn with_fallback(mut self, reply: ScriptedReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// Append a reply to the script
    pub fn push(&self, reply: ScriptedReply) {
        self.script.lock().push_back(reply);
    }

    /// Number of calls made so far
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    /// Replies not consumed yet
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    async fn complete(&self, request: ChatRequest) -> Result<Value, StepFailure> {
        self.requests.lock().push(request);

        let reply = self
            .script
            .lock()
            .pop_front()
            .or_else(|| self.fallback.clone());

        match reply {
            Some(ScriptedReply::Body(body)) => Ok(body),
            Some(ScriptedReply::Failure(failure)) => Err(failure),
            None => Err(StepFailure::non_retryable("scripted gateway has no replies left")),
        }
    }
}
