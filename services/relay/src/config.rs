use std::time::Duration;

use relay_core::config::{Config, ConfigError};
use serde::Deserialize;

use crate::domain::types::{
    ClaimPolicy, DEFAULT_ABANDON_AFTER_SECS, DEFAULT_LOCK_LEASE_SECS, DEFAULT_RETRY_AFTER_SECS,
    LockSettings,
};
use crate::usecase::ingest::CommitPolicy;

/// Upper bound for claim and commit batches. A received-row insert binds 12
/// parameters per row and Postgres accepts at most 65535 per statement.
pub const MAX_BATCH_SIZE: u64 = 5_000;

/// Relay configuration loaded from `RELAY_`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// PostgreSQL connection URL. Env var: `RELAY_DATABASE_URL`.
    pub database_url: String,
    /// Redis URL; enables the Redis Streams transport when set.
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Consumer/producer group. Lock names are derived from it.
    pub group: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_claim_batch_size")]
    pub claim_batch_size: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: i64,
    #[serde(default = "default_abandon_after_secs")]
    pub abandon_after_secs: i64,
    #[serde(default = "default_max_retry")]
    pub max_retry: i32,
    #[serde(default = "default_lock_lease_secs")]
    pub lock_lease_secs: u64,
    #[serde(default = "default_lock_wait_secs")]
    pub lock_wait_secs: u64,
    #[serde(default = "default_commit_batch_size")]
    pub commit_batch_size: usize,
    #[serde(default = "default_commit_interval_ms")]
    pub commit_interval_ms: u64,
    #[serde(default = "default_producer_count")]
    pub producer_count: usize,
    /// Name of this instance inside the consumer group; keep it stable across
    /// restarts so unacknowledged messages are picked up again.
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,
    /// Partition streams per topic. Producers and every ingest instance must
    /// agree on it.
    #[serde(default = "default_stream_partitions")]
    pub stream_partitions: u32,
    /// Partitions this instance ingests, all when empty. Each partition must be
    /// owned by exactly one running instance or per-key order is lost.
    /// Env var: `RELAY_OWNED_PARTITIONS`, comma separated.
    #[serde(default)]
    pub owned_partitions: Vec<u32>,
    /// Comma separated streams to ingest. Env var: `RELAY_CONSUME_TOPICS`.
    #[serde(default)]
    pub consume_topics: Vec<String>,
    #[serde(default = "default_retention_secs")]
    pub retention_secs: i64,
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_worker_count() -> usize {
    1
}

fn default_claim_batch_size() -> u64 {
    100
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_retry_after_secs() -> i64 {
    DEFAULT_RETRY_AFTER_SECS
}

fn default_abandon_after_secs() -> i64 {
    DEFAULT_ABANDON_AFTER_SECS
}

fn default_max_retry() -> i32 {
    relay_domain::message::MAX_RETRY_COUNT
}

fn default_lock_lease_secs() -> u64 {
    DEFAULT_LOCK_LEASE_SECS
}

fn default_lock_wait_secs() -> u64 {
    30
}

fn default_commit_batch_size() -> usize {
    100
}

fn default_commit_interval_ms() -> u64 {
    1000
}

fn default_producer_count() -> usize {
    1
}

fn default_consumer_name() -> String {
    "relay".to_owned()
}

fn default_stream_partitions() -> u32 {
    1
}

fn default_retention_secs() -> i64 {
    86_400
}

fn default_sweep_batch_size() -> u64 {
    1000
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Config for RelayConfig {
    const PREFIX: &'static str = "RELAY_";

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("worker_count", self.worker_count as u64),
            ("claim_batch_size", self.claim_batch_size),
            ("commit_batch_size", self.commit_batch_size as u64),
            ("producer_count", self.producer_count as u64),
            ("sweep_batch_size", self.sweep_batch_size),
            ("lock_lease_secs", self.lock_lease_secs),
            ("stream_partitions", u64::from(self.stream_partitions)),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be positive")));
        }
        let bounded = [
            ("claim_batch_size", self.claim_batch_size),
            ("commit_batch_size", self.commit_batch_size as u64),
        ];
        if let Some((name, _)) = bounded.iter().find(|(_, v)| *v > MAX_BATCH_SIZE) {
            return Err(ConfigError::Invalid(format!(
                "{name} must not exceed {MAX_BATCH_SIZE}"
            )));
        }
        if let Some(p) = self
            .owned_partitions
            .iter()
            .find(|p| **p >= self.stream_partitions)
        {
            return Err(ConfigError::Invalid(format!(
                "owned partition {p} is outside 0..{}",
                self.stream_partitions
            )));
        }
        if self.max_retry <= 0 {
            return Err(ConfigError::Invalid("max_retry must be positive".to_owned()));
        }
        if self.retry_after_secs < 0 || self.abandon_after_secs <= 0 || self.retention_secs < 0 {
            return Err(ConfigError::Invalid(
                "durations must not be negative".to_owned(),
            ));
        }
        if self.group.is_empty() || self.group.len() > relay_domain::message::TOPIC_MAX_LEN {
            return Err(ConfigError::Invalid(format!(
                "group must be 1..={} characters",
                relay_domain::message::TOPIC_MAX_LEN
            )));
        }
        Ok(())
    }
}

impl RelayConfig {
    pub fn claim_policy(&self) -> ClaimPolicy {
        ClaimPolicy {
            max_batch: self.claim_batch_size,
            retry_after: chrono::Duration::seconds(self.retry_after_secs),
            abandon_after: chrono::Duration::seconds(self.abandon_after_secs),
            max_retry: self.max_retry,
        }
    }

    pub fn lock_settings(&self) -> LockSettings {
        LockSettings {
            lease: Duration::from_secs(self.lock_lease_secs),
            wait: Duration::from_secs(self.lock_wait_secs),
        }
    }

    pub fn commit_policy(&self) -> CommitPolicy {
        CommitPolicy {
            batch_size: self.commit_batch_size,
            interval: Duration::from_millis(self.commit_interval_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_secs)
    }
}
