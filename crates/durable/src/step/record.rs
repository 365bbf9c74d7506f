//! Checkpoint records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a checkpointed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    /// An attempt has started but no outcome was recorded yet
    Pending,

    /// The step completed and its result is cached
    Succeeded,

    /// The last execution exhausted its retry budget
    Failed,
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for StepOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown step outcome: {}", other)),
        }
    }
}

/// A checkpoint for one (run, step key) pair
///
/// Once `outcome` is [`StepOutcome::Succeeded`] the record is frozen: stores
/// never overwrite it and the executor serves `result` verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Run that owns this step
    pub run_id: String,

    /// Step key, unique within the run (e.g. `llm-turn-0`, `tool-1-call_abc`)
    pub key: String,

    /// Attempts made so far, counted across resumes
    pub attempts: u32,

    /// Current outcome
    pub outcome: StepOutcome,

    /// Cached result (only when succeeded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Last error message (only when failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Last time the record changed
    pub updated_at: DateTime<Utc>,
}

impl StepRecord {
    /// Create a pending record for the given attempt
    pub fn pending(run_id: impl Into<String>, key: impl Into<String>, attempts: u32) -> Self {
        Self {
            run_id: run_id.into(),
            key: key.into(),
            attempts,
            outcome: StepOutcome::Pending,
            result: None,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Whether this record holds a cached result
    pub fn is_succeeded(&self) -> bool {
        self.outcome == StepOutcome::Succeeded
    }
}

/// Key of the LLM call made during `turn`
pub fn llm_step_key(turn: usize) -> String {
    format!("llm-turn-{}", turn)
}

/// Key of the tool call `tool_call_id` made during `turn`
pub fn tool_step_key(turn: usize, tool_call_id: &str) -> String {
    format!("tool-{}-{}", turn, tool_call_id)
}
