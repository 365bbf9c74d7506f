//! In-memory implementation of StepStore for testing

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::store::{StepStore, StoreError};
use crate::step::{StepOutcome, StepRecord};

/// In-memory implementation of StepStore
///
/// This is primarily for testing and single-process use. It stores all
/// records in memory and provides the same semantics as the PostgreSQL
/// implementation.
///
/// # Example
///
/// ```
/// use agentrun_durable::InMemoryStepStore;
///
/// let store = InMemoryStepStore::new();
/// assert_eq!(store.step_count(), 0);
/// ```
#[derive(Default)]
pub struct InMemoryStepStore {
    // Per run, records kept in creation order
    runs: RwLock<HashMap<String, Vec<StepRecord>>>,
}

impl InMemoryStepStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the total number of step records
    pub fn step_count(&self) -> usize {
        self.runs.read().values().map(Vec::len).sum()
    }

    /// Insert or replace a record (for testing)
    pub fn seed(&self, record: StepRecord) {
        let mut runs = self.runs.write();
        let steps = runs.entry(record.run_id.clone()).or_default();
        match steps.iter_mut().find(|s| s.key == record.key) {
            Some(existing) => *existing = record,
            None => steps.push(record),
        }
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.runs.write().clear();
    }

    fn with_record<F>(&self, run_id: &str, key: &str, update: F) -> StepRecord
    where
        F: FnOnce(&mut StepRecord),
    {
        let mut runs = self.runs.write();
        let steps = runs.entry(run_id.to_string()).or_default();
        let index = match steps.iter().position(|s| s.key == key) {
            Some(index) => index,
            None => {
                steps.push(StepRecord::pending(run_id, key, 0));
                steps.len() - 1
            }
        };

        let record = &mut steps[index];
        if !record.is_succeeded() {
            update(record);
            record.updated_at = Utc::now();
        }
        record.clone()
    }
}

#[async_trait]
impl StepStore for InMemoryStepStore {
    async fn load_step(&self, run_id: &str, key: &str) -> Result<Option<StepRecord>, StoreError> {
        Ok(self
            .runs
            .read()
            .get(run_id)
            .and_then(|steps| steps.iter().find(|s| s.key == key))
            .cloned())
    }

    async fn begin_attempt(&self, run_id: &str, key: &str) -> Result<StepRecord, StoreError> {
        Ok(self.with_record(run_id, key, |record| {
            record.attempts += 1;
            record.outcome = StepOutcome::Pending;
            record.last_error = None;
        }))
    }

    async fn record_success(
        &self,
        run_id: &str,
        key: &str,
        result: serde_json::Value,
    ) -> Result<StepRecord, StoreError> {
        Ok(self.with_record(run_id, key, |record| {
            record.attempts = record.attempts.max(1);
            record.outcome = StepOutcome::Succeeded;
            record.result = Some(result);
            record.last_error = None;
        }))
    }

    async fn record_failure(
        &self,
        run_id: &str,
        key: &str,
        error: &str,
    ) -> Result<StepRecord, StoreError> {
        Ok(self.with_record(run_id, key, |record| {
            record.outcome = StepOutcome::Failed;
            record.last_error = Some(error.to_string());
        }))
    }

    async fn list_steps(&self, run_id: &str) -> Result<Vec<StepRecord>, StoreError> {
        Ok(self.runs.read().get(run_id).cloned().unwrap_or_default())
    }

    async fn delete_run_steps(&self, run_id: &str) -> Result<u64, StoreError> {
        Ok(self
            .runs
            .write()
            .remove(run_id)
            .map(|steps| steps.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_begin_attempt_counts() {
        let store = InMemoryStepStore::new();

        let first = store.begin_attempt("run-1", "llm-turn-0").await.unwrap();
        assert_eq!(first.attempts, 1);
        assert_eq!(first.outcome, StepOutcome::Pending);

        let second = store.begin_attempt("run-1", "llm-turn-0").await.unwrap();
        assert_eq!(second.attempts, 2);
        assert_eq!(store.step_count(), 1);
    }

    #[tokio::test]
    async fn test_success_is_frozen() {
        let store = InMemoryStepStore::new();
        store.begin_attempt("run-1", "tool-0-c1").await.unwrap();
        store
            .record_success("run-1", "tool-0-c1", json!("first"))
            .await
            .unwrap();

        // Later writes never replace the cached result
        let again = store
            .record_success("run-1", "tool-0-c1", json!("second"))
            .await
            .unwrap();
        assert_eq!(again.result, Some(json!("first")));

        let failed = store
            .record_failure("run-1", "tool-0-c1", "boom")
            .await
            .unwrap();
        assert_eq!(failed.outcome, StepOutcome::Succeeded);

        let attempt = store.begin_attempt("run-1", "tool-0-c1").await.unwrap();
        assert_eq!(attempt.attempts, 1);
        assert!(attempt.is_succeeded());
    }

    #[tokio::test]
    async fn test_failure_then_retry() {
        let store = InMemoryStepStore::new();
        store.begin_attempt("run-1", "llm-turn-0").await.unwrap();
        let failed = store
            .record_failure("run-1", "llm-turn-0", "HTTP 503")
            .await
            .unwrap();
        assert_eq!(failed.outcome, StepOutcome::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("HTTP 503"));

        let retried = store.begin_attempt("run-1", "llm-turn-0").await.unwrap();
        assert_eq!(retried.attempts, 2);
        assert_eq!(retried.outcome, StepOutcome::Pending);
        assert!(retried.last_error.is_none());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let store = InMemoryStepStore::new();
        store.begin_attempt("run-1", "llm-turn-0").await.unwrap();
        store.begin_attempt("run-1", "tool-0-c1").await.unwrap();
        store.begin_attempt("run-2", "llm-turn-0").await.unwrap();

        let steps = store.list_steps("run-1").await.unwrap();
        let keys: Vec<_> = steps.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["llm-turn-0", "tool-0-c1"]);

        assert_eq!(store.delete_run_steps("run-1").await.unwrap(), 2);
        assert!(store.list_steps("run-1").await.unwrap().is_empty());
        assert_eq!(store.step_count(), 1);
    }

    #[tokio::test]
    async fn test_load_missing() {
        let store = InMemoryStepStore::new();
        assert!(store.load_step("run-1", "llm-turn-0").await.unwrap().is_none());
    }
}
