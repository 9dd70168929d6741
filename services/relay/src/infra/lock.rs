use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context as _;
use rand::RngExt;
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, Statement};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::repository::{LockGuard, LockProvider};
use crate::error::RelayError;

/// Base pause between acquisition attempts; jitter is added on top.
const RETRY_PAUSE: Duration = Duration::from_millis(200);
const RETRY_JITTER_MS: u64 = 100;

async fn pause_or_cancel(cancel: &CancellationToken) -> Result<(), RelayError> {
    let jitter = rand::rng().random_range(0..=RETRY_JITTER_MS);
    tokio::select! {
        _ = cancel.cancelled() => Err(RelayError::Cancelled),
        _ = tokio::time::sleep(RETRY_PAUSE + Duration::from_millis(jitter)) => Ok(()),
    }
}

// ── Postgres lease lock ──────────────────────────────────────────────────────

/// Lease lock stored in `relay_locks`. A lease that has expired, because its
/// holder crashed or stalled, is taken over by the next acquirer.
#[derive(Clone)]
pub struct PgLeaseLock {
    pub db: DatabaseConnection,
}

impl PgLeaseLock {
    async fn try_acquire(&self, name: &str, owner: Uuid, lease: Duration) -> Result<bool, RelayError> {
        let stmt = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            "INSERT INTO relay_locks (name, owner, expires_at) \
             VALUES ($1, $2, now() + make_interval(secs => $3)) \
             ON CONFLICT (name) DO UPDATE \
             SET owner = EXCLUDED.owner, expires_at = EXCLUDED.expires_at \
             WHERE relay_locks.expires_at < now()",
            [name.into(), owner.into(), lease.as_secs_f64().into()],
        );
        let result = self.db.execute(stmt).await.context("acquire lease lock")?;
        Ok(result.rows_affected() == 1)
    }
}

impl LockProvider for PgLeaseLock {
    type Guard = PgLeaseGuard;

    async fn acquire(
        &self,
        name: &str,
        lease: Duration,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<PgLeaseGuard, RelayError> {
        let owner = Uuid::now_v7();
        let deadline = Instant::now() + wait;
        loop {
            if self.try_acquire(name, owner, lease).await? {
                debug!(lock = name, %owner, "lease acquired");
                return Ok(PgLeaseGuard {
                    db: self.db.clone(),
                    name: name.to_owned(),
                    owner,
                    released: false,
                });
            }
            if Instant::now() >= deadline {
                return Err(RelayError::LockTimeout(name.to_owned()));
            }
            pause_or_cancel(cancel).await?;
        }
    }
}

pub struct PgLeaseGuard {
    db: DatabaseConnection,
    name: String,
    owner: Uuid,
    released: bool,
}

fn release_statement(name: &str, owner: Uuid) -> Statement {
    Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        "DELETE FROM relay_locks WHERE name = $1 AND owner = $2",
        [name.into(), owner.into()],
    )
}

impl LockGuard for PgLeaseGuard {
    async fn release(mut self) -> Result<(), RelayError> {
        self.released = true;
        self.db
            .execute(release_statement(&self.name, self.owner))
            .await
            .context("release lease lock")?;
        Ok(())
    }
}

impl Drop for PgLeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Dropped without release, e.g. the holding task was cancelled.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let db = self.db.clone();
        let stmt = release_statement(&self.name, self.owner);
        let name = std::mem::take(&mut self.name);
        handle.spawn(async move {
            if let Err(e) = db.execute(stmt).await {
                warn!(lock = %name, error = %e, "failed to release dropped lease");
            }
        });
    }
}

// ── In-process lock ──────────────────────────────────────────────────────────

/// Lease lock shared by the loops of a single process.
#[derive(Clone, Default)]
pub struct LocalLock {
    leases: Arc<Mutex<HashMap<String, (Uuid, Instant)>>>,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_acquire(&self, name: &str, owner: Uuid, lease: Duration) -> bool {
        let now = Instant::now();
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        match leases.get(name) {
            Some((_, expires_at)) if *expires_at > now => false,
            _ => {
                leases.insert(name.to_owned(), (owner, now + lease));
                true
            }
        }
    }

    fn release(&self, name: &str, owner: Uuid) {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        if leases.get(name).is_some_and(|(holder, _)| *holder == owner) {
            leases.remove(name);
        }
    }
}

impl LockProvider for LocalLock {
    type Guard = LocalLockGuard;

    async fn acquire(
        &self,
        name: &str,
        lease: Duration,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<LocalLockGuard, RelayError> {
        let owner = Uuid::now_v7();
        let deadline = Instant::now() + wait;
        loop {
            if self.try_acquire(name, owner, lease) {
                return Ok(LocalLockGuard {
                    lock: self.clone(),
                    name: name.to_owned(),
                    owner,
                });
            }
            if Instant::now() >= deadline {
                return Err(RelayError::LockTimeout(name.to_owned()));
            }
            pause_or_cancel(cancel).await?;
        }
    }
}

pub struct LocalLockGuard {
    lock: LocalLock,
    name: String,
    owner: Uuid,
}

impl LockGuard for LocalLockGuard {
    async fn release(self) -> Result<(), RelayError> {
        // Drop does the work.
        Ok(())
    }
}

impl Drop for LocalLockGuard {
    fn drop(&mut self) {
        self.lock.release(&self.name, self.owner);
    }
}
