//! LifeHub server library
//!
//! Background job execution and realtime delivery for the LifeHub backend.
//! This library exposes the internal modules for testing and potential reuse.

pub mod background_jobs;
pub mod config;
pub mod execution_store;
pub mod server;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use execution_store::{ExecutionStore, SqliteExecutionStore};
pub use server::{run_server, RequestsLoggingLevel};
