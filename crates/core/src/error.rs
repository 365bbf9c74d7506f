// Error types for agent runs

use agentrun_durable::{StepError, StoreError};
use thiserror::Error;

use crate::run::RunStatus;

/// Result type alias for agent run operations
pub type Result<T> = std::result::Result<T, AgentRunError>;

/// Errors that can occur while driving or managing agent runs
#[derive(Debug, Error)]
pub enum AgentRunError {
    /// A checkpointed step could not complete
    #[error("Step error: {0}")]
    Step(#[from] StepError),

    /// Run or step store error
    #[error("Store error: {0}")]
    Store(String),

    /// Run not found
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Run already reached a terminal status
    #[error("Run {run_id} is already {status}")]
    RunTerminal { run_id: String, status: RunStatus },

    /// Appending a message would break the transcript invariants
    #[error("Invalid transcript: {0}")]
    InvalidTranscript(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AgentRunError {
    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        AgentRunError::Store(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        AgentRunError::Configuration(msg.into())
    }

    /// Create an invalid transcript error
    pub fn transcript(msg: impl Into<String>) -> Self {
        AgentRunError::InvalidTranscript(msg.into())
    }

    /// Create a run not found error
    pub fn run_not_found(run_id: impl Into<String>) -> Self {
        AgentRunError::RunNotFound(run_id.into())
    }
}

impl From<StoreError> for AgentRunError {
    fn from(err: StoreError) -> Self {
        AgentRunError::Store(err.to_string())
    }
}

impl From<sqlx::Error> for AgentRunError {
    fn from(err: sqlx::Error) -> Self {
        AgentRunError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for AgentRunError {
    fn from(err: serde_json::Error) -> Self {
        AgentRunError::Store(format!("serialization: {}", err))
    }
}
