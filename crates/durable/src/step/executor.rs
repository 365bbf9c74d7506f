//! Checkpointed step execution
//!
//! The `StepExecutor` is responsible for:
//! - Serving completed steps from their checkpoint (replay)
//! - Running pending steps under a retry policy
//! - Recording the outcome of every step in the store

use std::future::Future;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{StepFailure, StepRecord};
use crate::persistence::{StepStore, StoreError};
use crate::reliability::RetryPolicy;

/// Errors from step execution
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// All attempts failed (or a failure was not retryable)
    #[error("step {key} exhausted after {attempts} attempt(s): {last_error}")]
    Exhausted {
        key: String,
        attempts: u32,
        last_error: StepFailure,
    },

    /// Termination was requested before the step could start
    #[error("step {key} cancelled before it started")]
    Cancelled { key: String },

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Result could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StepError {
    /// Key of the step that failed, when known
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Exhausted { key, .. } | Self::Cancelled { key } => Some(key),
            _ => None,
        }
    }

    /// Whether this error came from a cancellation request
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Information about the attempt being made, passed to the operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepAttempt {
    /// Attempt number within this execution (1-based)
    pub attempt: u32,

    /// Maximum attempts allowed by the policy
    pub max_attempts: u32,
}

impl StepAttempt {
    /// Check if this is the last retry attempt
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Executes operations as checkpointed, retried steps
///
/// A step is identified by `(run_id, key)`. The first successful result is
/// recorded and every later `execute` call with the same identity returns it
/// without invoking the operation again. Operations must tolerate being
/// retried: an attempt that crashed before its success was recorded runs
/// again on resume.
///
/// # Example
///
/// ```ignore
/// use agentrun_durable::prelude::*;
///
/// let executor = StepExecutor::new(Arc::new(InMemoryStepStore::new()));
/// let value: String = executor
///     .execute("run-1", "llm-turn-0", &RetryPolicy::exponential(), |_| async {
///         call_gateway().await
///     })
///     .await?;
/// ```
#[derive(Clone)]
pub struct StepExecutor {
    store: Arc<dyn StepStore>,
    cancellation: Option<CancellationToken>,
}

impl StepExecutor {
    /// Create a new executor backed by the given store
    pub fn new(store: Arc<dyn StepStore>) -> Self {
        Self {
            store,
            cancellation: None,
        }
    }

    /// Stop starting new attempts once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Get a reference to the store
    pub fn store(&self) -> &Arc<dyn StepStore> {
        &self.store
    }

    /// Whether termination has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Execute `operation` as the step `(run_id, key)`
    ///
    /// Returns the cached result if the step already succeeded. Otherwise
    /// runs the operation up to `policy.max_attempts` times, waiting
    /// `policy.delay_for_attempt(n)` before each retry.
    ///
    /// # Errors
    ///
    /// - [`StepError::Exhausted`] when every attempt failed or a failure was
    ///   not retryable. The failure is recorded in the store.
    /// - [`StepError::Cancelled`] when termination was requested before an
    ///   attempt started.
    /// - [`StepError::Store`] / [`StepError::Serialization`] for infrastructure
    ///   failures.
    #[instrument(skip(self, policy, operation), fields(max_attempts = policy.max_attempts))]
    pub async fn execute<T, F, Fut>(
        &self,
        run_id: &str,
        key: &str,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(StepAttempt) -> Fut,
        Fut: Future<Output = Result<T, StepFailure>>,
    {
        if let Some(record) = self.store.load_step(run_id, key).await? {
            if record.is_succeeded() {
                debug!(attempts = record.attempts, "replaying step from checkpoint");
                return decode(record);
            }
        }

        let max_attempts = policy.max_attempts.max(1);
        let mut last_error = StepFailure::retryable("step was not attempted");
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            let delay = policy.delay_for_attempt(attempt);
            if !delay.is_zero() {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "waiting before retry");
                self.sleep_or_cancel(key, delay).await?;
            }
            if self.is_cancelled() {
                info!("termination requested, not starting step");
                return Err(StepError::Cancelled {
                    key: key.to_string(),
                });
            }

            let record = self.store.begin_attempt(run_id, key).await?;
            if record.is_succeeded() {
                // Another writer completed the step concurrently
                return decode(record);
            }
            attempts = attempt;

            match operation(StepAttempt {
                attempt,
                max_attempts,
            })
            .await
            {
                Ok(value) => {
                    let payload = serde_json::to_value(&value)?;
                    let stored = self
                        .store
                        .record_success(run_id, key, payload.clone())
                        .await?;
                    if stored.result.as_ref() == Some(&payload) {
                        debug!(attempt, total_attempts = stored.attempts, "step succeeded");
                        return Ok(value);
                    }
                    debug!("step already recorded by another writer, using stored result");
                    return decode(stored);
                }
                Err(failure) => {
                    let retryable = policy.allows_retry(&failure);
                    warn!(
                        attempt,
                        retryable,
                        error = %failure,
                        "step attempt failed"
                    );
                    last_error = failure;
                    if !retryable {
                        break;
                    }
                }
            }
        }

        self.store
            .record_failure(run_id, key, &last_error.to_string())
            .await?;
        error!(attempts, error = %last_error, "step exhausted its retry budget");

        Err(StepError::Exhausted {
            key: key.to_string(),
            attempts,
            last_error,
        })
    }

    async fn sleep_or_cancel(
        &self,
        key: &str,
        delay: std::time::Duration,
    ) -> Result<(), StepError> {
        match &self.cancellation {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Err(StepError::Cancelled { key: key.to_string() }),
                    _ = tokio::time::sleep(delay) => Ok(()),
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

fn decode<T: DeserializeOwned>(record: StepRecord) -> Result<T, StepError> {
    let value = record.result.unwrap_or(serde_json::Value::Null);
    Ok(serde_json::from_value(value)?)
}
