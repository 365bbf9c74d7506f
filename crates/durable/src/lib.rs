//! # Durable Step Execution
//!
//! Checkpointed, retried execution of side-effecting steps.
//!
//! ## Features
//!
//! - **Checkpoints**: The first successful result of a step is persisted and replayed verbatim
//! - **Automatic retries**: Configurable retry policies with fixed or exponential backoff and jitter
//! - **Crash resume**: Steps that never succeeded run again with a fresh retry budget
//! - **Cancellation**: No new attempt starts once termination was requested
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       StepExecutor                           │
//! │   (serves checkpoints, runs attempts under a RetryPolicy)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        StepStore                             │
//! │      (in-memory, or PostgreSQL table `step_records`)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use agentrun_durable::prelude::*;
//!
//! let executor = StepExecutor::new(Arc::new(InMemoryStepStore::new()));
//! let body: serde_json::Value = executor
//!     .execute(&run_id, &llm_step_key(0), &RetryPolicy::exponential(), |_| async {
//!         gateway.complete(request.clone()).await
//!     })
//!     .await?;
//! ```

pub mod persistence;
pub mod reliability;
pub mod step;

/// Prelude for common imports
pub mod prelude {
    pub use crate::persistence::{InMemoryStepStore, PostgresStepStore, StepStore, StoreError};
    pub use crate::reliability::{BackoffKind, RetryPolicy};
    pub use crate::step::{
        llm_step_key, tool_step_key, StepAttempt, StepError, StepExecutor, StepFailure,
        StepOutcome, StepRecord,
    };
}

// Re-export key types at crate root
pub use persistence::{InMemoryStepStore, PostgresStepStore, StepStore, StoreError};
pub use reliability::{BackoffKind, RetryPolicy};
pub use step::{
    llm_step_key, tool_step_key, StepAttempt, StepError, StepExecutor, StepFailure, StepOutcome,
    StepRecord,
};
