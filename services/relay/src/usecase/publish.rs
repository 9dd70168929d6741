use chrono::Duration;
use relay_core::time::Clock;
use relay_domain::envelope::Envelope;
use relay_domain::event::PublishableEvent;
use relay_domain::id::EventId;
use relay_domain::message::EVENT_KEY_MAX_LEN;
use relay_domain::status::EventStatus;
use serde_json::Value;

use crate::domain::repository::EventStore;
use crate::domain::types::PublishedEvent;
use crate::error::RelayError;

/// Builds outbound rows for application events.
///
/// Use [`Publisher::prepare`] and insert the row inside the business transaction
/// (see `infra::db::insert_published_in`), or [`Publisher::publish`] when the
/// event store is the only write.
pub struct Publisher<K: Clock> {
    pub clock: K,
}

impl<K: Clock> Publisher<K> {
    /// Row due immediately, ordered after earlier events with the same `event_key`.
    pub fn prepare<E: PublishableEvent>(
        &self,
        event: &E,
        event_key: &str,
        headers: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<PublishedEvent, RelayError> {
        self.build(event, event_key.to_owned(), headers, Duration::zero())
    }

    /// Row due after `delay`. Delayed events get a fresh key and never take part
    /// in predecessor ordering.
    pub fn prepare_delayed<E: PublishableEvent>(
        &self,
        event: &E,
        delay: Duration,
        headers: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<PublishedEvent, RelayError> {
        self.build(event, EventId::new().to_string(), headers, delay)
    }

    pub async fn publish<S: EventStore, E: PublishableEvent>(
        &self,
        store: &S,
        event: &E,
        event_key: &str,
        headers: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<EventId, RelayError> {
        let row = self.prepare(event, event_key, headers)?;
        store.insert_published(std::slice::from_ref(&row)).await?;
        Ok(row.id)
    }

    fn build<E: PublishableEvent>(
        &self,
        event: &E,
        event_key: String,
        headers: impl IntoIterator<Item = (String, Value)>,
        delay: Duration,
    ) -> Result<PublishedEvent, RelayError> {
        if event_key.is_empty() || event_key.chars().count() > EVENT_KEY_MAX_LEN {
            return Err(RelayError::InvalidEvent(format!(
                "event key must be 1..={EVENT_KEY_MAX_LEN} characters"
            )));
        }
        let body = serde_json::to_value(event)
            .map_err(|e| RelayError::InvalidEvent(format!("failed to serialize body: {e}")))?;
        if !body.is_object() {
            return Err(RelayError::InvalidEvent(
                "event must serialize to a json object".to_owned(),
            ));
        }
        let content = Envelope::new(E::EVENT_NAME, body)
            .with_headers(headers)
            .to_content();
        let now = self.clock.now();
        Ok(PublishedEvent {
            id: EventId::new(),
            topic: E::TOPIC.to_owned(),
            content,
            event_key,
            retry_count: 0,
            status: EventStatus::None,
            sent_at: now + delay,
            timestamp: now,
            update_timestamp: None,
        })
    }
}
