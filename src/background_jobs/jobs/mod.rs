//! Built-in job implementations.

pub mod execution_history_cleanup;

pub use execution_history_cleanup::ExecutionHistoryCleanupJob;
