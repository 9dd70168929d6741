use sea_orm_migration::prelude::*;

mod m20261001_000001_create_published_events;
mod m20261001_000002_create_received_events;
mod m20261001_000003_create_relay_locks;
mod m20261001_000004_add_relay_indexes;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_create_published_events::Migration),
            Box::new(m20261001_000002_create_received_events::Migration),
            Box::new(m20261001_000003_create_relay_locks::Migration),
            Box::new(m20261001_000004_add_relay_indexes::Migration),
        ]
    }
}
