use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_core::time::{Clock, parse_rfc3339};
use relay_domain::id::EventId;
use relay_domain::status::EventStatus;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::repository::{BrokerConsumer, EventStore};
use crate::domain::types::{BrokerMessage, HEADER_ID, HEADER_SENT_AT, Offset, ReceivedEvent};
use crate::error::RelayError;

/// When buffered broker messages are flushed to storage and acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPolicy {
    /// Flush once this many messages are buffered.
    pub batch_size: usize,
    /// Flush once this much time has passed since the last flush.
    pub interval: Duration,
}

impl Default for CommitPolicy {
    fn default() -> Self {
        Self {
            batch_size: 100,
            interval: Duration::from_secs(1),
        }
    }
}

/// Consumed messages waiting for a durable insert.
#[derive(Debug)]
pub struct IngestBuffer {
    policy: CommitPolicy,
    messages: Vec<BrokerMessage>,
    last_flush: DateTime<Utc>,
}

impl IngestBuffer {
    pub fn new(policy: CommitPolicy, now: DateTime<Utc>) -> Self {
        Self {
            policy,
            messages: Vec::with_capacity(policy.batch_size),
            last_flush: now,
        }
    }

    pub fn push(&mut self, message: BrokerMessage) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Room left before the count threshold.
    pub fn remaining(&self) -> usize {
        self.policy.batch_size.saturating_sub(self.messages.len())
    }

    pub fn should_flush(&self, now: DateTime<Utc>) -> bool {
        if self.messages.is_empty() {
            return false;
        }
        self.messages.len() >= self.policy.batch_size || self.elapsed(now) >= self.policy.interval
    }

    /// Time left before the time threshold fires. An empty buffer has no
    /// deadline, so a full interval is returned.
    pub fn time_to_deadline(&self, now: DateTime<Utc>) -> Duration {
        if self.messages.is_empty() {
            return self.policy.interval;
        }
        self.policy.interval.saturating_sub(self.elapsed(now))
    }

    pub fn messages(&self) -> &[BrokerMessage] {
        &self.messages
    }

    pub fn mark_flushed(&mut self, now: DateTime<Utc>) {
        self.messages.clear();
        self.last_flush = now;
    }

    fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_flush).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Broker messages split into storable rows and poison messages that can only
/// be acknowledged.
#[derive(Debug, Default)]
pub struct Decoded {
    pub events: Vec<ReceivedEvent>,
    pub poison: Vec<Offset>,
}

/// Converts one poll's worth of messages into received rows. Rows get
/// `batch_time + i` milliseconds as timestamp so siblings never tie.
pub fn decode_batch(messages: &[BrokerMessage], group: &str, batch_time: DateTime<Utc>) -> Decoded {
    let mut decoded = Decoded::default();
    for message in messages {
        match decode_message(message, group, batch_time) {
            Ok(mut event) => {
                event.timestamp =
                    batch_time + chrono::Duration::milliseconds(decoded.events.len() as i64);
                decoded.events.push(event);
            }
            Err(reason) => {
                warn!(
                    topic = %message.offset.topic,
                    position = %message.offset.position,
                    reason,
                    "skipping undecodable message"
                );
                decoded.poison.push(message.offset.clone());
            }
        }
    }
    decoded
}

fn decode_message(
    message: &BrokerMessage,
    group: &str,
    batch_time: DateTime<Utc>,
) -> Result<ReceivedEvent, &'static str> {
    let id: EventId = message
        .headers
        .get(HEADER_ID)
        .ok_or("missing id header")?
        .parse()
        .map_err(|_| "malformed id header")?;
    let sent_at = message
        .headers
        .get(HEADER_SENT_AT)
        .and_then(|v| parse_rfc3339(v))
        .unwrap_or(batch_time);
    let content = std::str::from_utf8(&message.payload).map_err(|_| "payload is not utf-8")?;
    Ok(ReceivedEvent {
        id,
        group: group.to_owned(),
        partition: message.offset.partition.clone(),
        topic: message.offset.topic.clone(),
        content: content.to_owned(),
        event_key: message.key.clone(),
        retry_count: 0,
        status: EventStatus::None,
        error_message: None,
        sent_at,
        timestamp: batch_time,
        update_timestamp: None,
    })
}

/// Pulls messages from a broker and persists them before acknowledging.
pub struct Ingestor<C: BrokerConsumer, S: EventStore, K: Clock> {
    pub consumer: C,
    pub store: S,
    pub clock: K,
    pub group: String,
    pub buffer: IngestBuffer,
    /// Pause after a failed flush before trying again.
    pub retry_delay: Duration,
}

impl<C: BrokerConsumer, S: EventStore, K: Clock> Ingestor<C, S, K> {
    pub fn new(consumer: C, store: S, clock: K, group: String, policy: CommitPolicy) -> Self {
        let buffer = IngestBuffer::new(policy, clock.now());
        Self {
            consumer,
            store,
            clock,
            group,
            buffer,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Poll once, blocking at most until the flush deadline. Returns how many
    /// messages were buffered.
    pub async fn poll_once(&mut self) -> Result<usize, RelayError> {
        let max = self.buffer.remaining();
        if max == 0 {
            return Ok(0);
        }
        let block = self.buffer.time_to_deadline(self.clock.now());
        let messages = self.consumer.poll(max, block).await?;
        let count = messages.len();
        for message in messages {
            self.buffer.push(message);
        }
        Ok(count)
    }

    /// Insert every buffered message, then acknowledge them. The buffer is kept
    /// when the insert fails, and nothing is acknowledged.
    pub async fn flush(&mut self) -> Result<usize, RelayError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let now = self.clock.now();
        let decoded = decode_batch(self.buffer.messages(), &self.group, now);
        if !decoded.events.is_empty() {
            let inserted = self.store.insert_received(&decoded.events).await?;
            debug!(
                count = decoded.events.len(),
                inserted,
                "persisted consumed messages"
            );
        }
        let offsets: Vec<Offset> = self
            .buffer
            .messages()
            .iter()
            .map(|m| m.offset.clone())
            .collect();
        self.consumer.commit(&offsets).await?;
        self.buffer.mark_flushed(self.clock.now());
        Ok(decoded.events.len())
    }

    pub async fn flush_if_due(&mut self) -> Result<usize, RelayError> {
        if self.buffer.should_flush(self.clock.now()) {
            self.flush().await
        } else {
            Ok(0)
        }
    }

    /// Run until `cancel` fires, then make a last flush attempt.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(group = %self.group, "ingest started");
        while !cancel.is_cancelled() {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.poll_once() => polled,
            };
            if let Err(e) = polled {
                error!(kind = e.kind(), error = %e, "broker poll failed");
                if sleep_or_cancel(self.retry_delay, &cancel).await {
                    break;
                }
                continue;
            }
            if let Err(e) = self.flush_if_due().await {
                error!(kind = e.kind(), error = %e, buffered = self.buffer.len(), "flush failed");
                if sleep_or_cancel(self.retry_delay, &cancel).await {
                    break;
                }
            }
        }
        if let Err(e) = self.flush().await {
            warn!(error = %e, buffered = self.buffer.len(), "final flush failed, messages will be redelivered");
        }
        info!(group = %self.group, "ingest stopped");
    }
}

/// Returns `true` when cancelled before the delay elapsed.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
