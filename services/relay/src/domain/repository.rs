//! Ports the relay pipeline depends on.
//!
//! Methods return `impl Future + Send` rather than `async fn` so worker loops
//! built on them can be spawned onto the multi-threaded runtime.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_domain::id::EventId;
use relay_domain::status::EventStatus;
use tokio_util::sync::CancellationToken;

use crate::domain::types::{
    BrokerMessage, ClaimPolicy, EventTable, Offset, OutgoingMessage, PublishedEvent,
    ReceivedEvent, SendReport, Settlement,
};
use crate::error::RelayError;

/// Durable storage for both event tables.
pub trait EventStore: Send + Sync {
    /// Insert-or-ignore by id. Returns the number of rows actually inserted.
    fn insert_received(
        &self,
        events: &[ReceivedEvent],
    ) -> impl Future<Output = Result<u64, RelayError>> + Send;

    fn insert_published(
        &self,
        events: &[PublishedEvent],
    ) -> impl Future<Output = Result<(), RelayError>> + Send;

    /// Select claimable received rows ordered by `timestamp` and mark exactly that
    /// id set `InProgress` with `retry_count + 1`. Returns the pre-update rows.
    fn claim_for_processing(
        &self,
        policy: &ClaimPolicy,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<ReceivedEvent>, RelayError>> + Send;

    /// Select due published rows ordered by `sent_at` and mark exactly that id set
    /// `InProgress` with `retry_count + 1`. Returns the pre-update rows.
    fn claim_for_publishing(
        &self,
        policy: &ClaimPolicy,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<PublishedEvent>, RelayError>> + Send;

    /// Write every settlement of a processed batch in one statement.
    fn mark_settled(
        &self,
        settlements: &[Settlement],
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), RelayError>> + Send;

    fn mark_published(
        &self,
        ids: &[EventId],
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), RelayError>> + Send;

    /// Return undelivered rows to `None` so a later claim retries them.
    fn mark_publish_failed(
        &self,
        ids: &[EventId],
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), RelayError>> + Send;

    /// Unsettled received rows with the same key and an earlier timestamp.
    fn find_predecessor_ids(
        &self,
        event_key: &str,
        before: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<EventId>, RelayError>> + Send;

    /// Delete up to `limit` rows in `status` last updated before `cutoff`.
    fn delete_settled_older_than(
        &self,
        table: EventTable,
        status: EventStatus,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> impl Future<Output = Result<u64, RelayError>> + Send;
}

/// Named, lease-bounded mutual exclusion shared by every relay process.
pub trait LockProvider: Send + Sync {
    type Guard: LockGuard;

    /// Wait up to `wait` for `name`. The lease bounds how long a crashed holder
    /// can keep others out.
    fn acquire(
        &self,
        name: &str,
        lease: Duration,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Self::Guard, RelayError>> + Send;
}

pub trait LockGuard: Send {
    fn release(self) -> impl Future<Output = Result<(), RelayError>> + Send;
}

/// Delivers a claimed batch of published events somewhere.
pub trait Transport: Send + Sync {
    fn send(&self, events: &[PublishedEvent]) -> impl Future<Output = SendReport> + Send;
}

/// One broker connection. Messages sent through the same producer keep their order.
pub trait BrokerProducer: Send + Sync {
    fn send(
        &self,
        message: OutgoingMessage,
    ) -> impl Future<Output = Result<(), RelayError>> + Send;
}

/// A broker subscription for one consumer group.
pub trait BrokerConsumer: Send {
    /// Wait up to `block` for at most `max` messages.
    fn poll(
        &mut self,
        max: usize,
        block: Duration,
    ) -> impl Future<Output = Result<Vec<BrokerMessage>, RelayError>> + Send;

    /// Acknowledge messages that are now durably stored.
    fn commit(&mut self, offsets: &[Offset]) -> impl Future<Output = Result<(), RelayError>> + Send;
}
