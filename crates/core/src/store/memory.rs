//! In-memory implementation of RunStore for testing

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::RunStore;
use crate::error::{AgentRunError, Result};
use crate::run::{Run, RunStatus};

/// In-memory implementation of RunStore
///
/// Same semantics as the PostgreSQL implementation.
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<String, Run>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored runs
    pub fn run_count(&self) -> usize {
        self.runs.read().len()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create_run(&self, run: &Run) -> Result<()> {
        let mut runs = self.runs.write();
        if runs.contains_key(&run.id) {
            return Err(AgentRunError::store(format!("run already exists: {}", run.id)));
        }
        runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        Ok(self.runs.read().get(run_id).cloned())
    }

    async fn save_run(&self, run: &Run) -> Result<()> {
        let mut runs = self.runs.write();
        let stored = runs
            .get_mut(&run.id)
            .ok_or_else(|| AgentRunError::run_not_found(&run.id))?;
        if stored.is_terminal() {
            return Err(AgentRunError::RunTerminal {
                run_id: run.id.clone(),
                status: stored.status,
            });
        }
        *stored = run.clone();
        Ok(())
    }

    async fn list_runs(&self, status: Option<RunStatus>) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self
            .runs
            .read()
            .values()
            .filter(|run| status.map_or(true, |s| run.status == s))
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::run::RunOutcome;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryRunStore::new();
        let run = Run::new("run-1", "agent-1", "ping");
        store.create_run(&run).await.unwrap();

        let loaded = store.get_run("run-1").await.unwrap().unwrap();
        assert_eq!(loaded.task, "ping");
        assert!(store.create_run(&run).await.is_err());
        assert!(store.get_run("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_refuses_terminal_runs() {
        let store = InMemoryRunStore::new();
        let mut run = Run::new("run-1", "agent-1", "ping");
        store.create_run(&run).await.unwrap();

        run.push_message(Message::assistant("pong")).unwrap();
        run.finish(&RunOutcome::complete(1, "pong"));
        store.save_run(&run).await.unwrap();

        let result = store.save_run(&run).await;
        assert!(matches!(result, Err(AgentRunError::RunTerminal { .. })));
    }

    #[tokio::test]
    async fn test_save_unknown_run() {
        let store = InMemoryRunStore::new();
        let run = Run::new("run-1", "agent-1", "ping");
        let result = store.save_run(&run).await;
        assert!(matches!(result, Err(AgentRunError::RunNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let store = InMemoryRunStore::new();
        let running = Run::new("run-1", "agent-1", "a");
        let mut done = Run::new("run-2", "agent-1", "b");
        store.create_run(&running).await.unwrap();
        store.create_run(&done).await.unwrap();
        done.finish(&RunOutcome::max_turns_reached(10));
        store.save_run(&done).await.unwrap();

        assert_eq!(store.list_runs(None).await.unwrap().len(), 2);
        let active = store.list_runs(Some(RunStatus::Running)).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "run-1");
    }
}
