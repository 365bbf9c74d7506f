//! StepStore trait definition

use async_trait::async_trait;

use crate::step::StepRecord;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Step not found
    #[error("step not found: {run_id}/{key}")]
    StepNotFound { run_id: String, key: String },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Store for step checkpoints
///
/// Implementations must be thread-safe and must never overwrite a record
/// whose outcome is `succeeded`: that record is the checkpoint every later
/// lookup is served from.
#[async_trait]
pub trait StepStore: Send + Sync + 'static {
    /// Load the record for a step, if any
    async fn load_step(&self, run_id: &str, key: &str) -> Result<Option<StepRecord>, StoreError>;

    /// Start a new attempt
    ///
    /// Creates the record if missing, increments the attempt counter and marks
    /// it pending. A succeeded record is returned unchanged.
    async fn begin_attempt(&self, run_id: &str, key: &str) -> Result<StepRecord, StoreError>;

    /// Record a successful result
    ///
    /// Returns the record that holds the success. If another writer already
    /// recorded a success for this key, that record wins and is returned.
    async fn record_success(
        &self,
        run_id: &str,
        key: &str,
        result: serde_json::Value,
    ) -> Result<StepRecord, StoreError>;

    /// Record that the step failed after exhausting its attempts
    ///
    /// A succeeded record is returned unchanged.
    async fn record_failure(
        &self,
        run_id: &str,
        key: &str,
        error: &str,
    ) -> Result<StepRecord, StoreError>;

    /// List all steps of a run in creation order
    async fn list_steps(&self, run_id: &str) -> Result<Vec<StepRecord>, StoreError>;

    /// Delete all steps of a run, returning how many were removed
    async fn delete_run_steps(&self, run_id: &str) -> Result<u64, StoreError>;
}
