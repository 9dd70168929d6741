use chrono::Duration;
use relay_core::time::Clock;
use relay_domain::status::EventStatus;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::domain::repository::{EventStore, LockProvider};
use crate::domain::types::{EventTable, LockSettings};
use crate::error::RelayError;
use crate::usecase::scheduler::{Job, claim_under_lock};

/// Deletes succeeded events from both tables once they are older than `retention`.
/// Failed rows are kept for inspection.
pub struct RetentionSweepJob<S: EventStore, L: LockProvider, K: Clock> {
    pub store: S,
    pub locks: L,
    pub clock: K,
    pub lock_name: String,
    pub lock_settings: LockSettings,
    pub retention: Duration,
    pub batch_size: u64,
}

impl<S, L, K> RetentionSweepJob<S, L, K>
where
    S: EventStore,
    L: LockProvider,
    K: Clock,
{
    async fn sweep(&self) -> Result<usize, RelayError> {
        let cutoff = self.clock.now() - self.retention;
        let mut deleted = 0;
        for table in [EventTable::Published, EventTable::Received] {
            let count = self
                .store
                .delete_settled_older_than(table, EventStatus::Succeeded, cutoff, self.batch_size)
                .await?;
            if count > 0 {
                info!(table = table.as_str(), count, "swept settled events");
            }
            deleted += count as usize;
        }
        Ok(deleted)
    }
}

impl<S, L, K> Job for RetentionSweepJob<S, L, K>
where
    S: EventStore + 'static,
    L: LockProvider + 'static,
    K: Clock + 'static,
{
    fn name(&self) -> &'static str {
        "events-sweeper"
    }

    async fn run_once(&self, cancel: &CancellationToken) -> Result<usize, RelayError> {
        claim_under_lock(
            &self.locks,
            &self.lock_name,
            self.lock_settings,
            cancel,
            || self.sweep(),
        )
        .await
    }
}
