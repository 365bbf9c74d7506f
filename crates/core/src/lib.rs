// Durable Agent Runs
//
// This crate drives multi-turn LLM agent runs that survive restarts,
// transient failures, and partial progress loss (LLM call → tool calls →
// repeat).
//
// Key design decisions:
// - Every LLM call and tool call is a checkpointed step (agentrun-durable)
// - Runs are always replayed from turn 0; checkpoints make replay deterministic
// - The LLM gateway, run store and step store are traits with in-memory and
//   production implementations
// - Tool dispatch never fails; problems become strings the model can read
// - Progress is published per agent through an identity-keyed hub

pub mod config;
pub mod controller;
pub mod error;
pub mod llm;
pub mod message;
pub mod openai;
pub mod progress;
pub mod run;
pub mod runs;
pub mod store;
pub mod telemetry;
pub mod tools;
pub mod validation;

// In-memory implementations for examples and testing
pub mod memory;

// Re-exports for convenience
pub use config::{GatewayConfig, LoopConfig};
pub use controller::AgentLoopController;
pub use error::{AgentRunError, Result};
pub use llm::{parse_response, AssistantTurn, ChatRequest, LlmGateway, ResponseShapeError};
pub use memory::{ScriptedGateway, ScriptedReply};
pub use message::{Message, MessageRole, ToolCall};
pub use openai::OpenAiCompatibleGateway;
pub use progress::{
    AgentState, ProgressBroadcaster, ProgressHub, ProgressStatus, ProgressUpdate, Subscription,
};
pub use run::{Run, RunOutcome, RunStatus, RunView};
pub use runs::RunManager;
pub use store::{InMemoryRunStore, PostgresRunStore, RunStore};
pub use tools::{EchoTool, StaticTool, Tool, ToolRegistry, ToolRegistryBuilder};
pub use validation::{validate, Validation};

// Step primitives used alongside the controller
pub use agentrun_durable::{
    InMemoryStepStore, PostgresStepStore, RetryPolicy, StepFailure, StepStore,
};
