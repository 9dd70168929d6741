use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::repository::{LockGuard, LockProvider};
use crate::domain::types::LockSettings;
use crate::error::RelayError;

/// One iteration of a polling loop. Returns how many items it handled.
pub trait Job: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn run_once(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<usize, RelayError>> + Send;
}

/// Runs `claim` while holding `name`. The lock is released before the claimed
/// work is returned to the caller, so only the claim itself is serialized.
pub async fn claim_under_lock<L, T, F, Fut>(
    locks: &L,
    name: &str,
    settings: LockSettings,
    cancel: &CancellationToken,
    claim: F,
) -> Result<T, RelayError>
where
    L: LockProvider,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
{
    let guard = locks
        .acquire(name, settings.lease, settings.wait, cancel)
        .await?;
    let claimed = claim().await;
    if let Err(e) = guard.release().await {
        warn!(lock = name, error = %e, "failed to release lock");
    }
    claimed
}

/// Poll `job` until `cancel` fires. Errors are logged and the loop sleeps
/// `interval` before the next iteration; nothing but cancellation ends it.
pub async fn run_worker<J: Job>(
    job: Arc<J>,
    worker: usize,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(job = job.name(), worker, "worker started");
    while !cancel.is_cancelled() {
        match job.run_once(&cancel).await {
            Ok(0) => {}
            Ok(count) => debug!(job = job.name(), worker, count, "iteration finished"),
            Err(RelayError::Cancelled) => break,
            Err(e) => error!(job = job.name(), worker, kind = e.kind(), error = %e, "iteration failed"),
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    info!(job = job.name(), worker, "worker stopped");
}
