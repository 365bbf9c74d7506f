//! Persistence for runs
//!
//! This module provides:
//! - [`RunStore`] trait for run persistence
//! - [`InMemoryRunStore`] for testing and single-process runs
//! - [`PostgresRunStore`] for production

mod memory;
mod postgres;

pub use memory::InMemoryRunStore;
pub use postgres::PostgresRunStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::run::{Run, RunStatus};

/// Store for runs
///
/// A run whose stored status is terminal is never modified again.
#[async_trait]
pub trait RunStore: Send + Sync + 'static {
    /// Persist a new run; fails if the id is taken
    async fn create_run(&self, run: &Run) -> Result<()>;

    /// Load a run by id
    async fn get_run(&self, run_id: &str) -> Result<Option<Run>>;

    /// Replace the stored snapshot of a run
    ///
    /// Fails with `RunNotFound` for unknown runs and `RunTerminal` when the
    /// stored run already finished.
    async fn save_run(&self, run: &Run) -> Result<()>;

    /// List runs in creation order, optionally filtered by status
    async fn list_runs(&self, status: Option<RunStatus>) -> Result<Vec<Run>>;
}
