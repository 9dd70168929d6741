use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use relay_core::time::Clock;
use relay_domain::envelope::Envelope;
use relay_domain::id::EventId;
use relay_domain::message::sanitize_error_message;
use relay_domain::status::EventStatus;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::repository::{EventStore, LockProvider};
use crate::domain::types::{ClaimPolicy, LockSettings, ReceivedEvent, Settlement};
use crate::error::RelayError;
use crate::usecase::predecessor::{PredecessorResolver, blocked_message};
use crate::usecase::registry::HandlerRegistry;
use crate::usecase::scheduler::{Job, claim_under_lock};

/// Turns claimed received events into settlements.
pub struct EventProcessor<S: EventStore> {
    pub store: S,
    pub registry: Arc<HandlerRegistry>,
}

impl<S: EventStore> EventProcessor<S> {
    /// Process a claimed batch in claim order. Events that succeed earlier in the
    /// batch count as settled for the predecessor check of later ones.
    pub async fn process_batch(&self, events: &[ReceivedEvent]) -> Vec<Settlement> {
        let mut succeeded = HashSet::new();
        let mut settlements = Vec::with_capacity(events.len());
        for event in events {
            let settlement = self.process_one(event, &succeeded).await;
            if settlement.status == EventStatus::Succeeded {
                succeeded.insert(event.id);
            }
            settlements.push(settlement);
        }
        settlements
    }

    pub async fn process_one(
        &self,
        event: &ReceivedEvent,
        succeeded_in_batch: &HashSet<EventId>,
    ) -> Settlement {
        let envelope = match Envelope::parse(&event.content) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(event_id = %event.id, kind = e.kind(), "malformed event content");
                return Settlement::failed(event.id, sanitize_error_message(&e.to_string()));
            }
        };

        let Some(entry) = self.registry.lookup(&envelope.event_name) else {
            debug!(event_id = %event.id, event_name = %envelope.event_name, "no handler registered");
            return Settlement {
                id: event.id,
                status: EventStatus::Succeeded,
                error_message: Some(sanitize_error_message(&format!(
                    "no handler registered for event {}, nothing to do",
                    envelope.event_name
                ))),
            };
        };

        if entry.check_predecessor {
            let resolver = PredecessorResolver { store: &self.store };
            match resolver.blocking_ids(event, succeeded_in_batch).await {
                Ok(blocking) if blocking.is_empty() => {}
                Ok(blocking) => {
                    debug!(event_id = %event.id, blocking = blocking.len(), "blocked by predecessors");
                    return Settlement::failed(
                        event.id,
                        sanitize_error_message(&blocked_message(&blocking)),
                    );
                }
                Err(e) => {
                    return Settlement::failed(event.id, sanitize_error_message(&e.to_string()));
                }
            }
        }

        match AssertUnwindSafe(entry.dispatch(envelope.body))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Settlement::succeeded(event.id),
            Ok(Err(e)) => {
                warn!(event_id = %event.id, event_name = entry.event_name, error = %e, "handler failed");
                Settlement::failed(event.id, sanitize_error_message(&e.to_string()))
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_owned());
                warn!(event_id = %event.id, event_name = entry.event_name, "handler panicked");
                Settlement::failed(event.id, sanitize_error_message(&message))
            }
        }
    }
}

/// Claim, process and settle received events.
pub struct ProcessReceivedJob<S: EventStore, L: LockProvider, K: Clock> {
    pub processor: EventProcessor<S>,
    pub locks: L,
    pub clock: K,
    pub lock_name: String,
    pub lock_settings: LockSettings,
    pub policy: ClaimPolicy,
}

impl<S, L, K> Job for ProcessReceivedJob<S, L, K>
where
    S: EventStore + 'static,
    L: LockProvider + 'static,
    K: Clock + 'static,
{
    fn name(&self) -> &'static str {
        "events-processor"
    }

    async fn run_once(&self, cancel: &CancellationToken) -> Result<usize, RelayError> {
        let store = &self.processor.store;
        let claimed = claim_under_lock(
            &self.locks,
            &self.lock_name,
            self.lock_settings,
            cancel,
            || store.claim_for_processing(&self.policy, self.clock.now()),
        )
        .await?;
        if claimed.is_empty() {
            return Ok(0);
        }

        let settlements = self.processor.process_batch(&claimed).await;
        store.mark_settled(&settlements, self.clock.now()).await?;
        Ok(settlements.len())
    }
}
