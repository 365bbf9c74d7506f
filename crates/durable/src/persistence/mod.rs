//! Persistence layer for step checkpoints
//!
//! This module provides:
//! - [`StepStore`] trait for checkpoint persistence
//! - [`InMemoryStepStore`] for testing and single-process runs
//! - [`PostgresStepStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryStepStore;
pub use postgres::PostgresStepStore;
pub use store::{StepStore, StoreError};
