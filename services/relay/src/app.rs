//! Wiring of the Postgres/Redis adapters into runnable jobs.
//!
//! Services that consume events build a [`HandlerRegistry`] and call
//! [`processor_job`]; the `relay` binary uses the rest.

use std::sync::Arc;

use anyhow::Context as _;
use relay_core::time::SystemClock;
use sea_orm::DatabaseConnection;

use crate::config::RelayConfig;
use crate::infra::db::DbEventStore;
use crate::infra::lock::PgLeaseLock;
use crate::infra::redis::{RedisStreamConsumer, RedisStreamProducer, owned_streams};
use crate::usecase::batcher::BrokerTransport;
use crate::usecase::direct::StorageTransport;
use crate::usecase::ingest::Ingestor;
use crate::usecase::outbox::PublishOutboxJob;
use crate::usecase::processor::{EventProcessor, ProcessReceivedJob};
use crate::usecase::registry::HandlerRegistry;
use crate::usecase::sweeper::RetentionSweepJob;

pub fn lock_name(group: &str, job: &str) -> String {
    format!("{group}-{job}")
}

pub fn processor_job(
    config: &RelayConfig,
    db: DatabaseConnection,
    registry: Arc<HandlerRegistry>,
) -> ProcessReceivedJob<DbEventStore, PgLeaseLock, SystemClock> {
    ProcessReceivedJob {
        processor: EventProcessor {
            store: DbEventStore { db: db.clone() },
            registry,
        },
        locks: PgLeaseLock { db },
        clock: SystemClock,
        lock_name: lock_name(&config.group, "events-processor"),
        lock_settings: config.lock_settings(),
        policy: config.claim_policy(),
    }
}

pub fn broker_publisher_job(
    config: &RelayConfig,
    db: DatabaseConnection,
    redis_url: &str,
) -> anyhow::Result<PublishOutboxJob<DbEventStore, PgLeaseLock, BrokerTransport<RedisStreamProducer>, SystemClock>>
{
    let producers = (0..config.producer_count)
        .map(|_| {
            Ok(RedisStreamProducer {
                pool: single_connection_pool(redis_url)?,
                partitions: config.stream_partitions,
                max_len: None,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(publisher_job(config, db, BrokerTransport { producers }))
}

pub fn direct_publisher_job(
    config: &RelayConfig,
    db: DatabaseConnection,
) -> PublishOutboxJob<DbEventStore, PgLeaseLock, StorageTransport<DbEventStore, SystemClock>, SystemClock>
{
    let transport = StorageTransport {
        target: DbEventStore { db: db.clone() },
        clock: SystemClock,
        group: config.group.clone(),
    };
    publisher_job(config, db, transport)
}

fn publisher_job<T: crate::domain::repository::Transport>(
    config: &RelayConfig,
    db: DatabaseConnection,
    transport: T,
) -> PublishOutboxJob<DbEventStore, PgLeaseLock, T, SystemClock> {
    PublishOutboxJob {
        store: DbEventStore { db: db.clone() },
        locks: PgLeaseLock { db },
        transport,
        clock: SystemClock,
        lock_name: lock_name(&config.group, "events-publisher"),
        lock_settings: config.lock_settings(),
        policy: config.claim_policy(),
    }
}

pub fn sweeper_job(
    config: &RelayConfig,
    db: DatabaseConnection,
) -> RetentionSweepJob<DbEventStore, PgLeaseLock, SystemClock> {
    RetentionSweepJob {
        store: DbEventStore { db: db.clone() },
        locks: PgLeaseLock { db },
        clock: SystemClock,
        lock_name: lock_name(&config.group, "events-sweeper"),
        lock_settings: config.lock_settings(),
        retention: config.retention(),
        batch_size: config.sweep_batch_size,
    }
}

pub fn redis_ingestor(
    config: &RelayConfig,
    db: DatabaseConnection,
    redis_url: &str,
) -> anyhow::Result<Ingestor<RedisStreamConsumer, DbEventStore, SystemClock>> {
    let pool = deadpool_redis::Config::from_url(redis_url)
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .context("create redis pool")?;
    let consumer = RedisStreamConsumer::new(
        pool,
        config.group.clone(),
        config.consumer_name.clone(),
        owned_streams(
            &config.consume_topics,
            config.stream_partitions,
            &config.owned_partitions,
        ),
    );
    let mut ingestor = Ingestor::new(
        consumer,
        DbEventStore { db },
        SystemClock,
        config.group.clone(),
        config.commit_policy(),
    );
    ingestor.retry_delay = config.poll_interval();
    Ok(ingestor)
}

fn single_connection_pool(redis_url: &str) -> anyhow::Result<deadpool_redis::Pool> {
    let mut cfg = deadpool_redis::Config::from_url(redis_url);
    cfg.pool = Some(deadpool_redis::PoolConfig::new(1));
    cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .context("create redis producer pool")
}
