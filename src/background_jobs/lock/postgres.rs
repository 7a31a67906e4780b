use super::{DistributedLock, LockError, LockKey};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgPool, Postgres};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

enum Slot {
    /// A `try_lock` for this key is waiting on the pool or the server.
    Acquiring,
    Held(PoolConnection<Postgres>),
}

/// Native PostgreSQL advisory locks (`pg_try_advisory_lock`).
///
/// Advisory locks belong to the database session that took them. Each held
/// key keeps the pooled connection that acquired it out of the pool until
/// `unlock`, which releases on that same connection. If the release query
/// fails the connection is closed instead of returned, ending the session
/// and with it every advisory lock it held.
///
/// The key map is never locked across a database round trip, so an `unlock`
/// handing a connection back is not stuck behind a `try_lock` waiting for one.
pub struct PgAdvisoryLock {
    pool: PgPool,
    slots: Mutex<HashMap<LockKey, Slot>>,
}

impl PgAdvisoryLock {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::new(pool))
    }

    /// Number of keys currently held by this instance.
    pub fn held_count(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Held(_)))
            .count()
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<LockKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn acquire_session_lock(
        &self,
        key: LockKey,
    ) -> Result<Option<PoolConnection<Postgres>>, LockError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key.value())
            .fetch_one(&mut *conn)
            .await
            .map_err(backend)?;
        Ok(acquired.then_some(conn))
    }
}

fn backend(e: sqlx::Error) -> LockError {
    LockError::Backend(e.to_string())
}

#[async_trait]
impl DistributedLock for PgAdvisoryLock {
    async fn try_lock(&self, key: LockKey) -> Result<bool, LockError> {
        {
            let mut slots = self.slots();
            if slots.contains_key(&key) {
                // Session locks are re-entrant in Postgres; keep a single owner per key here.
                return Ok(false);
            }
            slots.insert(key, Slot::Acquiring);
        }

        let outcome = self.acquire_session_lock(key).await;
        let mut slots = self.slots();
        match outcome {
            Ok(Some(conn)) => {
                slots.insert(key, Slot::Held(conn));
                Ok(true)
            }
            Ok(None) => {
                slots.remove(&key);
                Ok(false)
            }
            Err(e) => {
                slots.remove(&key);
                Err(e)
            }
        }
    }

    async fn unlock(&self, key: LockKey) -> Result<(), LockError> {
        let mut conn = {
            let mut slots = self.slots();
            match slots.remove(&key) {
                Some(Slot::Held(conn)) => conn,
                Some(Slot::Acquiring) => {
                    slots.insert(key, Slot::Acquiring);
                    debug!("Unlock of {} requested while it is still being acquired", key);
                    return Ok(());
                }
                None => {
                    debug!("Unlock of {} requested but it is not held here", key);
                    return Ok(());
                }
            }
        };

        let released: Result<bool, sqlx::Error> =
            sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
                .bind(key.value())
                .fetch_one(&mut *conn)
                .await;

        match released {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!("Advisory lock {} was not held by its session", key);
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Failed to release advisory lock {}: {}; closing its session",
                    key, e
                );
                if let Err(close_err) = conn.detach().close().await {
                    debug!("Closing lock session failed: {}", close_err);
                }
                Err(backend(e))
            }
        }
    }
}
