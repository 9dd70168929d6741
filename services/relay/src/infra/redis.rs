use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use bytes::Bytes;
use deadpool_redis::Pool;
use deadpool_redis::redis::{self, RedisError};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::domain::repository::{BrokerConsumer, BrokerProducer};
use crate::domain::types::{BrokerMessage, Offset, OutgoingMessage};
use crate::error::RelayError;

/// Stream entry field holding the event key.
const FIELD_KEY: &str = "key";
/// Stream entry field holding the serialized content.
const FIELD_PAYLOAD: &str = "payload";
/// Prefix for stream entry fields that carry transport headers.
const HEADER_PREFIX: &str = "hdr.";

fn transport_err(e: impl std::fmt::Display) -> RelayError {
    RelayError::Transport(e.to_string())
}

// ── Partitioning ─────────────────────────────────────────────────────────────

/// Partition a key is routed to. Stable across processes and releases, so every
/// message for one key lands on the same stream.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    if partitions <= 1 {
        return 0;
    }
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) % u64::from(partitions)) as u32
}

/// Stream backing one partition of `topic`. An unpartitioned topic is a single
/// stream named after the topic.
pub fn stream_name(topic: &str, partition: u32, partitions: u32) -> String {
    if partitions <= 1 {
        topic.to_owned()
    } else {
        format!("{topic}-{partition}")
    }
}

// ── Producer ─────────────────────────────────────────────────────────────────

/// `XADD`s messages onto the partition stream their key hashes to. Build each
/// producer on its own single-connection pool so messages sent through it stay
/// ordered.
#[derive(Clone)]
pub struct RedisStreamProducer {
    pub pool: Pool,
    /// Partitions per topic; must match every ingest instance.
    pub partitions: u32,
    /// Approximate `MAXLEN` trim applied on every add.
    pub max_len: Option<usize>,
}

pub fn xadd_command(message: &OutgoingMessage, partitions: u32, max_len: Option<usize>) -> redis::Cmd {
    let partition = partition_for(&message.key, partitions);
    let mut cmd = redis::cmd("XADD");
    cmd.arg(stream_name(&message.topic, partition, partitions));
    if let Some(max_len) = max_len {
        cmd.arg("MAXLEN").arg("~").arg(max_len);
    }
    cmd.arg("*")
        .arg(FIELD_KEY)
        .arg(&message.key)
        .arg(FIELD_PAYLOAD)
        .arg(message.payload.as_ref());
    for (name, value) in &message.headers {
        cmd.arg(format!("{HEADER_PREFIX}{name}")).arg(value);
    }
    cmd
}

impl BrokerProducer for RedisStreamProducer {
    async fn send(&self, message: OutgoingMessage) -> Result<(), RelayError> {
        let mut conn = self.pool.get().await.map_err(transport_err)?;
        let _entry_id: String = xadd_command(&message, self.partitions, self.max_len)
            .query_async(&mut conn)
            .await
            .map_err(transport_err)?;
        Ok(())
    }
}

// ── Consumer ─────────────────────────────────────────────────────────────────

type StreamEntry = (String, HashMap<String, Vec<u8>>);
type StreamReply = Option<Vec<(String, Vec<StreamEntry>)>>;

/// One partition stream of a consumed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPartition {
    pub topic: String,
    pub partition: u32,
    pub stream: String,
}

/// Streams for the `owned` partitions of every topic, or all partitions when
/// `owned` is empty.
pub fn owned_streams(topics: &[String], partitions: u32, owned: &[u32]) -> Vec<StreamPartition> {
    let owned: Vec<u32> = if owned.is_empty() {
        (0..partitions.max(1)).collect()
    } else {
        owned.to_vec()
    };
    topics
        .iter()
        .flat_map(|topic| {
            owned.iter().map(move |&partition| StreamPartition {
                topic: topic.clone(),
                partition,
                stream: stream_name(topic, partition, partitions),
            })
        })
        .collect()
}

/// Reads partition streams as a member of a consumer group.
///
/// Per-key order holds only while each partition is read by a single ingest
/// instance; instances scale out by owning disjoint partitions. Entries
/// delivered to this consumer before a restart but never acknowledged are read
/// again first, then new entries.
pub struct RedisStreamConsumer {
    pool: Pool,
    group: String,
    consumer: String,
    streams: Vec<StreamPartition>,
    names: Vec<String>,
    groups_ready: bool,
    /// Per-stream position inside this consumer's pending list while replaying it.
    pending_cursors: Vec<String>,
    pending_drained: bool,
}

impl RedisStreamConsumer {
    pub fn new(pool: Pool, group: String, consumer: String, streams: Vec<StreamPartition>) -> Self {
        let pending_cursors = vec!["0".to_owned(); streams.len()];
        let names = streams.iter().map(|s| s.stream.clone()).collect();
        Self {
            pool,
            group,
            consumer,
            streams,
            names,
            groups_ready: false,
            pending_cursors,
            pending_drained: false,
        }
    }

    async fn ensure_groups(&mut self) -> Result<(), RelayError> {
        if self.groups_ready {
            return Ok(());
        }
        let mut conn = self.pool.get().await.map_err(transport_err)?;
        for stream in &self.names {
            let created: Result<(), RedisError> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(stream)
                .arg(&self.group)
                .arg("0")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;
            match created {
                Ok(()) => info!(stream = %stream, group = %self.group, "consumer group created"),
                Err(e) if e.code() == Some("BUSYGROUP") => {}
                Err(e) => return Err(transport_err(e)),
            }
        }
        self.groups_ready = true;
        Ok(())
    }
}

pub fn decode_entry(
    source: &StreamPartition,
    entry_id: String,
    mut fields: HashMap<String, Vec<u8>>,
) -> BrokerMessage {
    let key = fields
        .remove(FIELD_KEY)
        .map(|v| String::from_utf8_lossy(&v).into_owned())
        .unwrap_or_default();
    let payload = fields.remove(FIELD_PAYLOAD).map(Bytes::from).unwrap_or_default();
    let headers: BTreeMap<String, String> = fields
        .into_iter()
        .filter_map(|(name, value)| {
            name.strip_prefix(HEADER_PREFIX)
                .map(|h| (h.to_owned(), String::from_utf8_lossy(&value).into_owned()))
        })
        .collect();
    BrokerMessage {
        key,
        payload,
        headers,
        offset: Offset {
            topic: source.topic.clone(),
            partition: source.partition.to_string(),
            position: entry_id,
        },
    }
}

impl BrokerConsumer for RedisStreamConsumer {
    async fn poll(&mut self, max: usize, block: Duration) -> Result<Vec<BrokerMessage>, RelayError> {
        if self.streams.is_empty() || max == 0 {
            tokio::time::sleep(block).await;
            return Ok(Vec::new());
        }
        self.ensure_groups().await?;

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(max);
        if self.pending_drained {
            // BLOCK 0 would wait forever.
            cmd.arg("BLOCK").arg(block.as_millis().max(1) as u64);
        }
        cmd.arg("STREAMS").arg(&self.names);
        if self.pending_drained {
            for _ in &self.streams {
                cmd.arg(">");
            }
        } else {
            cmd.arg(&self.pending_cursors);
        }

        let mut conn = self.pool.get().await.map_err(transport_err)?;
        let reply: StreamReply = cmd.query_async(&mut conn).await.map_err(transport_err)?;
        let mut messages = Vec::new();
        for (stream, entries) in reply.unwrap_or_default() {
            let Some(i) = self.names.iter().position(|n| *n == stream) else {
                warn!(stream = %stream, "entries from unrequested stream ignored");
                continue;
            };
            for (id, fields) in entries {
                if !self.pending_drained {
                    self.pending_cursors[i] = id.clone();
                }
                messages.push(decode_entry(&self.streams[i], id, fields));
            }
        }
        if !self.pending_drained && messages.is_empty() {
            self.pending_drained = true;
        }
        Ok(messages)
    }

    async fn commit(&mut self, offsets: &[Offset]) -> Result<(), RelayError> {
        let mut by_stream: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for offset in offsets {
            let Some(source) = self
                .streams
                .iter()
                .find(|s| s.topic == offset.topic && s.partition.to_string() == offset.partition)
            else {
                warn!(topic = %offset.topic, partition = %offset.partition, "offset from unowned partition");
                continue;
            };
            by_stream
                .entry(source.stream.as_str())
                .or_default()
                .push(offset.position.as_str());
        }
        if by_stream.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await.map_err(transport_err)?;
        for (stream, ids) in by_stream {
            let acked: usize = redis::cmd("XACK")
                .arg(stream)
                .arg(&self.group)
                .arg(&ids)
                .query_async(&mut conn)
                .await
                .map_err(transport_err)?;
            if acked < ids.len() {
                warn!(stream, acked, expected = ids.len(), "some entries were already acknowledged");
            }
        }
        Ok(())
    }
}
