use super::{DistributedLock, LockError, LockKey};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CREATE_LOCKS_TABLE: &str = "CREATE TABLE IF NOT EXISTS job_locks (
    lock_key INTEGER PRIMARY KEY,
    holder TEXT NOT NULL,
    acquired_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
)";

const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(5);

/// Lock holder records with a TTL, stored in a SQLite file.
///
/// Every process opening the same database file shares the lock namespace.
/// While a key is held, a background task pushes its expiry forward every
/// third of the TTL, so a lease outlives any run of a live holder. A holder
/// that dies without unlocking stops renewing and the key frees up once the
/// lease expires; the next `try_lock` then takes it over.
pub struct SqliteLeaseLock {
    conn: Arc<Mutex<Connection>>,
    holder: String,
    lease_ttl: Duration,
    renewals: Mutex<HashMap<LockKey, CancellationToken>>,
}

impl SqliteLeaseLock {
    pub fn new<P: AsRef<Path>>(db_path: P, lease_ttl: Duration) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open lock database {:?}", path))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute(CREATE_LOCKS_TABLE, [])
            .context("Failed to create job_locks table")?;

        let holder = Uuid::new_v4().to_string();
        info!("SQLite lease lock ready at {:?} (holder {})", path, holder);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            holder,
            lease_ttl,
            renewals: Mutex::new(HashMap::new()),
        })
    }

    /// Identity written into the lock rows owned by this instance.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    fn try_acquire(&self, key: LockKey) -> rusqlite::Result<bool> {
        let now = Utc::now().timestamp_millis();
        let expires_at = now + self.lease_ttl.as_millis() as i64;

        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let expired = tx.execute(
            "DELETE FROM job_locks WHERE lock_key = ?1 AND expires_at <= ?2",
            params![key.0, now],
        )?;
        if expired > 0 {
            debug!("Taking over expired lease for lock {}", key);
        }
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO job_locks (lock_key, holder, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key.0, self.holder, now, expires_at],
        )?;
        tx.commit()?;
        Ok(inserted == 1)
    }

    fn release(&self, key: LockKey) -> rusqlite::Result<usize> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "DELETE FROM job_locks WHERE lock_key = ?1 AND holder = ?2",
            params![key.0, self.holder],
        )
    }

    fn start_renewal(&self, key: LockKey) {
        let stop = CancellationToken::new();
        let previous = self
            .renewals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, stop.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let conn = self.conn.clone();
        let holder = self.holder.clone();
        let lease_ttl = self.lease_ttl;
        let period = (lease_ttl / 3).max(MIN_RENEW_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match renew_lease(&conn, key, &holder, lease_ttl) {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!("Lease for lock {} was lost, no longer renewing", key);
                        break;
                    }
                    Err(e) => warn!("Failed to renew lease for lock {}: {}", key, e),
                }
            }
        });
    }

    fn stop_renewal(&self, key: LockKey) {
        let stop = self
            .renewals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        if let Some(stop) = stop {
            stop.cancel();
        }
    }
}

fn renew_lease(
    conn: &Mutex<Connection>,
    key: LockKey,
    holder: &str,
    lease_ttl: Duration,
) -> rusqlite::Result<bool> {
    let expires_at = Utc::now().timestamp_millis() + lease_ttl.as_millis() as i64;
    let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
    let updated = conn.execute(
        "UPDATE job_locks SET expires_at = ?3 WHERE lock_key = ?1 AND holder = ?2",
        params![key.0, holder, expires_at],
    )?;
    Ok(updated == 1)
}

impl Drop for SqliteLeaseLock {
    fn drop(&mut self) {
        let renewals = self.renewals.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, stop) in renewals.drain() {
            stop.cancel();
        }
    }
}

#[async_trait]
impl DistributedLock for SqliteLeaseLock {
    async fn try_lock(&self, key: LockKey) -> Result<bool, LockError> {
        let acquired = self
            .try_acquire(key)
            .map_err(|e| LockError::Backend(e.to_string()))?;
        if acquired {
            self.start_renewal(key);
        }
        Ok(acquired)
    }

    async fn unlock(&self, key: LockKey) -> Result<(), LockError> {
        self.stop_renewal(key);
        let removed = self
            .release(key)
            .map_err(|e| LockError::Backend(e.to_string()))?;
        if removed == 0 {
            debug!("Unlock of {} found no lease held by {}", key, self.holder);
        }
        Ok(())
    }
}
