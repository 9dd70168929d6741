use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use relay_core::config::Config;
use relay_migration::Migrator;
use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use tracing::{info, warn};

use relay_service::app;
use relay_service::config::RelayConfig;
use relay_service::runtime::RelayRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    /// Publisher, ingest and sweeper loops.
    All,
    Publisher,
    Ingest,
    Sweeper,
}

/// Relays outbox events to the broker and broker messages into the inbox.
#[derive(Parser)]
#[command(name = "relay")]
struct Args {
    #[arg(long, value_enum, default_value = "all")]
    role: Role,

    /// Apply pending migrations before starting.
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    relay_core::tracing::init_tracing();

    let args = Args::parse();
    let config = RelayConfig::from_env().context("load relay config")?;

    let db = Database::connect(&config.database_url)
        .await
        .context("connect to database")?;
    if args.migrate {
        Migrator::up(&db, None).await.context("apply migrations")?;
    }

    let mut runtime = RelayRuntime::default();
    let interval = config.poll_interval();

    if matches!(args.role, Role::All | Role::Publisher) {
        match config.redis_url.as_deref() {
            Some(url) => runtime.spawn_job(
                app::broker_publisher_job(&config, db.clone(), url)?,
                config.worker_count,
                interval,
            ),
            None => runtime.spawn_job(
                app::direct_publisher_job(&config, db.clone()),
                config.worker_count,
                interval,
            ),
        }
    }

    if matches!(args.role, Role::All | Role::Ingest) {
        match config.redis_url.as_deref() {
            Some(url) if !config.consume_topics.is_empty() => {
                runtime.spawn_ingest(app::redis_ingestor(&config, db.clone(), url)?);
            }
            _ => warn!("ingest needs RELAY_REDIS_URL and RELAY_CONSUME_TOPICS, skipping"),
        }
    }

    if matches!(args.role, Role::All | Role::Sweeper) {
        runtime.spawn_job(
            app::sweeper_job(&config, db.clone()),
            1,
            config.sweep_interval(),
        );
    }

    info!(role = ?args.role, group = %config.group, loops = runtime.len(), "relay started");

    tokio::signal::ctrl_c()
        .await
        .context("listen for shutdown signal")?;
    runtime.shutdown();
    runtime.join().await;
    info!("relay stopped");
    Ok(())
}
