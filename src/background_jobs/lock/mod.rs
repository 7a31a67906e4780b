//! Cross-process mutual exclusion for jobs.
//!
//! Every backend arbitrates through the shared datastore, so exclusion holds
//! across all server instances using it, not only inside one process.

mod postgres;
mod sqlite;

pub use postgres::PgAdvisoryLock;
pub use sqlite::SqliteLeaseLock;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Interval between acquisition attempts in [`DistributedLock::lock`].
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(250);

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit key in the datastore's single global advisory-lock namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct LockKey(pub i64);

impl LockKey {
    /// Derive the key for a job operating on a given entity.
    ///
    /// FNV-1a (64 bit) over `"{job_name}:{entity_id}"`, reinterpreted as signed.
    pub fn for_entity(job_name: &str, entity_id: impl fmt::Display) -> Self {
        Self::from_str_hash(&format!("{}:{}", job_name, entity_id))
    }

    fn from_str_hash(input: &str) -> Self {
        let mut hash = FNV_OFFSET_BASIS;
        for byte in input.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        LockKey(hash as i64)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LockError {
    #[error("Lock {0} is already held")]
    AlreadyHeld(LockKey),
    #[error("Lock acquisition was cancelled")]
    Cancelled,
    #[error("Lock backend error: {0}")]
    Backend(String),
}

/// Mutual exclusion backed by the datastore.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Acquire without waiting. `Ok(false)` means someone else holds the key.
    async fn try_lock(&self, key: LockKey) -> Result<bool, LockError>;

    /// Release a key held by this instance.
    async fn unlock(&self, key: LockKey) -> Result<(), LockError>;

    /// Wait until the key is acquired or `cancel` fires.
    async fn lock(&self, key: LockKey, cancel: &CancellationToken) -> Result<(), LockError> {
        loop {
            if self.try_lock(key).await? {
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(LockError::Cancelled),
                _ = tokio::time::sleep(LOCK_RETRY_INTERVAL) => {}
            }
        }
    }
}

/// Run `f` only if `key` can be taken right now.
///
/// Never waits on contention: a held key yields [`LockError::AlreadyHeld`]
/// and `f` is not called. The key is released after `f` finishes whatever
/// its outcome; release failures are logged and otherwise ignored.
pub async fn with_lock<F, Fut, T, E>(lock: &dyn DistributedLock, key: LockKey, f: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<LockError>,
{
    if !lock.try_lock(key).await? {
        return Err(LockError::AlreadyHeld(key).into());
    }
    let result = f().await;
    if let Err(e) = lock.unlock(key).await {
        warn!("Failed to release lock {}: {}", key, e);
    }
    result
}
