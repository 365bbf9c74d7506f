// Run domain types
//
// A Run is one durable execution of an agent task. It is created by the
// control surface, mutated only by the loop controller, and immutable once
// it reaches a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AgentRunError, Result};
use crate::message::{Message, MessageRole};

/// Run status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Complete,
    Error,
    MaxTurnsReached,
    Cancelled,
}

impl RunStatus {
    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Complete => "complete",
            RunStatus::Error => "error",
            RunStatus::MaxTurnsReached => "max_turns_reached",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = AgentRunError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "complete" => Ok(RunStatus::Complete),
            "error" => Ok(RunStatus::Error),
            "max_turns_reached" => Ok(RunStatus::MaxTurnsReached),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(AgentRunError::store(format!("unknown run status: {}", other))),
        }
    }
}

/// Final outcome of driving a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Turns executed (including skipped turns)
    pub turns: usize,
    /// Final answer, only for `complete`
    pub result: Option<String>,
    /// Cause, only for `error`
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn complete(turns: usize, result: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Complete,
            turns,
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn max_turns_reached(turns: usize) -> Self {
        Self {
            status: RunStatus::MaxTurnsReached,
            turns,
            result: None,
            error: None,
        }
    }

    pub fn error(turns: usize, cause: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Error,
            turns,
            result: None,
            error: Some(cause.into()),
        }
    }

    pub fn cancelled(turns: usize) -> Self {
        Self {
            status: RunStatus::Cancelled,
            turns,
            result: None,
            error: None,
        }
    }
}

/// Control-surface projection of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunView {
    pub run_id: String,
    pub status: RunStatus,
    /// Final answer, only for `complete`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub turns: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Run - one durable execution of an agent task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    /// Logical agent whose progress state this run publishes to
    pub agent_id: String,
    pub task: String,
    /// Index of the next turn to execute
    pub turn: usize,
    pub messages: Vec<Message>,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Create a running run whose transcript holds the task as a user message
    pub fn new(
        id: impl Into<String>,
        agent_id: impl Into<String>,
        task: impl Into<String>,
    ) -> Self {
        let task = task.into();
        let now = Utc::now();
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            messages: vec![Message::user(task.clone())],
            task,
            turn: 0,
            status: RunStatus::Running,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Append a message to the transcript
    ///
    /// Tool messages must answer a tool call emitted by an earlier assistant
    /// message of this run.
    pub fn push_message(&mut self, message: Message) -> Result<()> {
        if self.is_terminal() {
            return Err(AgentRunError::RunTerminal {
                run_id: self.id.clone(),
                status: self.status,
            });
        }

        if message.role == MessageRole::Tool {
            let call_id = message.tool_call_id.as_deref().ok_or_else(|| {
                AgentRunError::transcript("tool message without tool_call_id")
            })?;
            let known = self
                .messages
                .iter()
                .filter(|m| m.role == MessageRole::Assistant)
                .flat_map(|m| m.tool_calls())
                .any(|call| call.id == call_id);
            if !known {
                return Err(AgentRunError::transcript(format!(
                    "tool message answers unknown tool call {}",
                    call_id
                )));
            }
        } else if message.tool_call_id.is_some() {
            return Err(AgentRunError::transcript(format!(
                "{} message cannot carry a tool_call_id",
                message.role
            )));
        }

        self.messages.push(message);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record the final outcome, making the run terminal
    pub fn finish(&mut self, outcome: &RunOutcome) {
        self.status = outcome.status;
        self.turn = self.turn.max(outcome.turns);
        self.result = outcome.result.clone();
        self.error = outcome.error.clone();
        self.updated_at = Utc::now();
    }

    /// Project the run for the control surface
    pub fn view(&self) -> RunView {
        RunView {
            run_id: self.id.clone(),
            status: self.status,
            output: match self.status {
                RunStatus::Complete => self.result.clone(),
                _ => None,
            },
            turns: self.turn,
            error: self.error.clone(),
        }
    }
}
