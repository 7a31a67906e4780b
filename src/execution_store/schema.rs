//! SQLite schema for job execution history.

use crate::sqlite_column;
use crate::sqlite_persistence::{SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Job executions
// =============================================================================

const JOB_EXECUTIONS_TABLE_V1: Table = Table {
    name: "job_executions",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("job_name", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Text),
        sqlite_column!("completed_at", &SqlType::Text),
        sqlite_column!("error", &SqlType::Text),
        sqlite_column!("result", &SqlType::Text),
        sqlite_column!("duration_ms", &SqlType::Integer),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_job_executions_job_created", "job_name, created_at DESC"),
        ("idx_job_executions_status", "status"),
    ],
};

pub const EXECUTION_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[JOB_EXECUTIONS_TABLE_V1],
    migration: None,
}];
