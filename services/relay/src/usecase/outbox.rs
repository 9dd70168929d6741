use relay_core::time::Clock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::domain::repository::{EventStore, LockProvider, Transport};
use crate::domain::types::{ClaimPolicy, LockSettings};
use crate::error::RelayError;
use crate::usecase::scheduler::{Job, claim_under_lock};

/// Claim due published events, hand them to the transport and record the outcome.
pub struct PublishOutboxJob<S: EventStore, L: LockProvider, T: Transport, K: Clock> {
    pub store: S,
    pub locks: L,
    pub transport: T,
    pub clock: K,
    pub lock_name: String,
    pub lock_settings: LockSettings,
    pub policy: ClaimPolicy,
}

impl<S, L, T, K> Job for PublishOutboxJob<S, L, T, K>
where
    S: EventStore + 'static,
    L: LockProvider + 'static,
    T: Transport + 'static,
    K: Clock + 'static,
{
    fn name(&self) -> &'static str {
        "events-publisher"
    }

    async fn run_once(&self, cancel: &CancellationToken) -> Result<usize, RelayError> {
        let store = &self.store;
        let claimed = claim_under_lock(
            &self.locks,
            &self.lock_name,
            self.lock_settings,
            cancel,
            || store.claim_for_publishing(&self.policy, self.clock.now()),
        )
        .await?;
        if claimed.is_empty() {
            return Ok(0);
        }

        let report = self.transport.send(&claimed).await;
        if !report.delivered.is_empty() {
            store
                .mark_published(&report.delivered, self.clock.now())
                .await?;
        }
        if !report.failed.is_empty() {
            warn!(failed = report.failed.len(), "some published events were not delivered");
            store
                .mark_publish_failed(&report.failed, self.clock.now())
                .await?;
        }
        Ok(report.delivered.len())
    }
}
