//! Checkpointed steps
//!
//! A step is a unit of work identified by `(run_id, key)` whose first
//! successful result is persisted and replayed on every later execution.

mod executor;
mod failure;
mod record;

pub use executor::{StepAttempt, StepError, StepExecutor};
pub use failure::StepFailure;
pub use record::{llm_step_key, tool_step_key, StepOutcome, StepRecord};
