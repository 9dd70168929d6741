use chrono::Duration;
use relay_core::time::Clock;
use relay_domain::status::EventStatus;
use tracing::warn;

use crate::domain::repository::{EventStore, Transport};
use crate::domain::types::{DIRECT_PARTITION, PublishedEvent, ReceivedEvent, SendReport};

/// Relays published events straight into another store's received table,
/// without a broker.
pub struct StorageTransport<S: EventStore, K: Clock> {
    pub target: S,
    pub clock: K,
    /// Consumer group recorded on the received rows.
    pub group: String,
}

impl<S: EventStore, K: Clock> StorageTransport<S, K> {
    /// Received rows for a batch, timestamps staggered one millisecond apart in
    /// batch order.
    pub fn to_received(&self, events: &[PublishedEvent]) -> Vec<ReceivedEvent> {
        let batch_time = self.clock.now();
        events
            .iter()
            .enumerate()
            .map(|(i, event)| ReceivedEvent {
                id: event.id,
                group: self.group.clone(),
                partition: DIRECT_PARTITION.to_owned(),
                topic: event.topic.clone(),
                content: event.content.clone(),
                event_key: event.event_key.clone(),
                retry_count: 0,
                status: EventStatus::None,
                error_message: None,
                sent_at: event.sent_at,
                timestamp: batch_time + Duration::milliseconds(i as i64),
                update_timestamp: None,
            })
            .collect()
    }
}

impl<S: EventStore, K: Clock> Transport for StorageTransport<S, K> {
    async fn send(&self, events: &[PublishedEvent]) -> SendReport {
        let ids = events.iter().map(|e| e.id).collect();
        match self.target.insert_received(&self.to_received(events)).await {
            Ok(_) => SendReport {
                delivered: ids,
                failed: Vec::new(),
            },
            Err(e) => {
                warn!(count = events.len(), error = %e, "failed to relay events to storage");
                SendReport {
                    delivered: Vec::new(),
                    failed: ids,
                }
            }
        }
    }
}
