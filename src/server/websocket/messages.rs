//! WebSocket message types.
//!
//! Every server message uses the same envelope; feature-specific payloads are
//! carried as JSON values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server -> Client message envelope.
///
/// Serialized as `{"type", "payload", "timestamp", "message_id"}`. The target
/// user is routing metadata only and never leaves the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Event name from [`msg_types`] (e.g. "task.created", "job.progress")
    #[serde(rename = "type")]
    pub msg_type: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_id: String,
    #[serde(skip)]
    pub user_id: Option<u64>,
}

impl Message {
    /// Create a message with the given type and payload, stamped now and
    /// carrying a fresh message id clients can deduplicate on.
    pub fn new(msg_type: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
            timestamp: Utc::now(),
            message_id: Uuid::new_v4().to_string(),
            user_id: None,
        }
    }

    /// Same as [`new`](Self::new) with an empty object payload.
    pub fn empty(msg_type: impl Into<String>) -> Self {
        Self::new(msg_type, serde_json::json!({}))
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn for_user(mut self, user_id: u64) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// Client -> Server message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// System-level payloads used by the WebSocket infrastructure itself.
pub mod system {
    use serde::{Deserialize, Serialize};

    /// Sent immediately after the connection is established.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Connected {
        pub user_id: u64,
        pub client_id: String,
        pub server_version: String,
    }

    /// Error message (server -> client).
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Error {
        pub code: String,
        pub message: String,
    }

    impl Error {
        pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
            Self {
                code: code.into(),
                message: message.into(),
            }
        }
    }
}

/// Job lifecycle payloads.
pub mod job {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct JobStarted {
        pub job_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub execution_id: Option<Uuid>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct JobProgress {
        pub job_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub execution_id: Option<Uuid>,
        pub percent: u8,
        pub message: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct JobCompleted {
        pub job_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub execution_id: Option<Uuid>,
        pub duration_ms: u64,
        pub attempts: u32,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct JobFailed {
        pub job_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub execution_id: Option<Uuid>,
        pub error: String,
        pub attempts: u32,
    }
}

/// Event names. These strings are the wire protocol; do not rename them.
pub mod msg_types {
    // Tasks
    pub const TASK_CREATED: &str = "task.created";
    pub const TASK_UPDATED: &str = "task.updated";
    pub const TASK_DELETED: &str = "task.deleted";
    pub const TASK_COMPLETED: &str = "task.completed";

    // Habits
    pub const HABIT_CREATED: &str = "habit.created";
    pub const HABIT_UPDATED: &str = "habit.updated";
    pub const HABIT_DELETED: &str = "habit.deleted";
    pub const HABIT_COMPLETED: &str = "habit.completed";

    // Goals
    pub const GOAL_CREATED: &str = "goal.created";
    pub const GOAL_UPDATED: &str = "goal.updated";
    pub const GOAL_DELETED: &str = "goal.deleted";

    // Notes
    pub const NOTE_CREATED: &str = "note.created";
    pub const NOTE_UPDATED: &str = "note.updated";
    pub const NOTE_DELETED: &str = "note.deleted";

    // Calendar
    pub const CALENDAR_EVENT_CREATED: &str = "calendar.event_created";
    pub const CALENDAR_EVENT_UPDATED: &str = "calendar.event_updated";
    pub const CALENDAR_EVENT_DELETED: &str = "calendar.event_deleted";
    pub const CALENDAR_SYNC_STATUS: &str = "calendar.sync_status";

    // Background jobs
    pub const JOB_STARTED: &str = "job.started";
    pub const JOB_PROGRESS: &str = "job.progress";
    pub const JOB_COMPLETED: &str = "job.completed";
    pub const JOB_FAILED: &str = "job.failed";

    // System
    pub const NOTIFICATION: &str = "notification";
    pub const CONNECTED: &str = "connected";
    pub const ERROR: &str = "error";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
}
