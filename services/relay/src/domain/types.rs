use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use relay_domain::id::EventId;
use relay_domain::message::MAX_RETRY_COUNT;
use relay_domain::status::EventStatus;

/// Transport header carrying the event id.
pub const HEADER_ID: &str = "id";
/// Transport header carrying the `sent_at` time, RFC 3339 with milliseconds.
pub const HEADER_SENT_AT: &str = "sent_at";

/// Partition recorded for events relayed without a broker.
pub const DIRECT_PARTITION: &str = "direct";

/// Default visibility timeout before a failed event may be claimed again.
pub const DEFAULT_RETRY_AFTER_SECS: i64 = 20;
/// Default age after which an `InProgress` row is considered abandoned.
pub const DEFAULT_ABANDON_AFTER_SECS: i64 = 300;
/// Default lease held while claiming.
pub const DEFAULT_LOCK_LEASE_SECS: u64 = 120;

/// Outbound event row.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub id: EventId,
    pub topic: String,
    pub content: String,
    pub event_key: String,
    pub retry_count: i32,
    pub status: EventStatus,
    pub sent_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub update_timestamp: Option<DateTime<Utc>>,
}

/// Inbound event row.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedEvent {
    pub id: EventId,
    pub group: String,
    pub partition: String,
    pub topic: String,
    pub content: String,
    pub event_key: String,
    pub retry_count: i32,
    pub status: EventStatus,
    pub error_message: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub update_timestamp: Option<DateTime<Utc>>,
}

/// Outcome of one processing attempt, written back in bulk.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub id: EventId,
    pub status: EventStatus,
    pub error_message: Option<String>,
}

impl Settlement {
    pub fn succeeded(id: EventId) -> Self {
        Self {
            id,
            status: EventStatus::Succeeded,
            error_message: None,
        }
    }

    pub fn failed(id: EventId, message: impl Into<String>) -> Self {
        Self {
            id,
            status: EventStatus::Failed,
            error_message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTable {
    Published,
    Received,
}

impl EventTable {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Received => "received",
        }
    }
}

/// Claim predicate parameters shared by both tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimPolicy {
    pub max_batch: u64,
    /// `Failed` rows stay invisible for this long after their last update.
    pub retry_after: Duration,
    /// `InProgress` rows older than this are treated as abandoned by a crashed worker.
    pub abandon_after: Duration,
    pub max_retry: i32,
}

impl Default for ClaimPolicy {
    fn default() -> Self {
        Self {
            max_batch: 100,
            retry_after: Duration::seconds(DEFAULT_RETRY_AFTER_SECS),
            abandon_after: Duration::seconds(DEFAULT_ABANDON_AFTER_SECS),
            max_retry: MAX_RETRY_COUNT,
        }
    }
}

/// Lease and wait bounds for the distributed lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    pub lease: std::time::Duration,
    pub wait: std::time::Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lease: std::time::Duration::from_secs(DEFAULT_LOCK_LEASE_SECS),
            wait: std::time::Duration::from_secs(30),
        }
    }
}

/// Position of a consumed message, used to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Offset {
    pub topic: String,
    pub partition: String,
    pub position: String,
}

/// Message read from a broker.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub key: String,
    pub payload: Bytes,
    pub headers: BTreeMap<String, String>,
    pub offset: Offset,
}

/// Message handed to a broker producer.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub topic: String,
    pub key: String,
    pub payload: Bytes,
    pub headers: BTreeMap<String, String>,
}

/// Per-event result of sending a claimed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    pub delivered: Vec<EventId>,
    pub failed: Vec<EventId>,
}
