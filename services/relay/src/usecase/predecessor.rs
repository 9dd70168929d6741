use std::collections::HashSet;

use relay_domain::id::EventId;

use crate::domain::repository::EventStore;
use crate::domain::types::ReceivedEvent;
use crate::error::RelayError;

/// Checks causal ordering for events that share an `event_key`.
pub struct PredecessorResolver<'a, S: EventStore> {
    pub store: &'a S,
}

impl<'a, S: EventStore> PredecessorResolver<'a, S> {
    /// Ids of earlier unsettled events with the same key that have not already
    /// succeeded in the current batch. Empty means the event may run.
    pub async fn blocking_ids(
        &self,
        event: &ReceivedEvent,
        succeeded_in_batch: &HashSet<EventId>,
    ) -> Result<Vec<EventId>, RelayError> {
        let predecessors = self
            .store
            .find_predecessor_ids(&event.event_key, event.timestamp)
            .await?;
        Ok(predecessors
            .into_iter()
            .filter(|id| !succeeded_in_batch.contains(id))
            .collect())
    }
}

pub fn blocked_message(blocking: &[EventId]) -> String {
    let ids = blocking
        .iter()
        .map(EventId::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("blocked by unsettled predecessor events: {ids}")
}
