//! Shared constants for end-to-end tests

/// Secret the test server verifies bearer tokens with
pub const TEST_JWT_SECRET: &str = "e2e-test-secret";

/// User the default test client authenticates as
pub const TEST_USER_ID: u64 = 1;

/// A second user, for checking per-user delivery
pub const OTHER_USER_ID: u64 = 2;

/// Fast job registered on every test server; never fires on its own
pub const ECHO_JOB: &str = "echo";

/// Built-in retention job
pub const CLEANUP_JOB: &str = "execution_history_cleanup";

pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;
