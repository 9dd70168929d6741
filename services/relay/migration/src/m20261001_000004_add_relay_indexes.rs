use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Publishing claim: status = 0 AND sent_at < now ORDER BY sent_at.
        manager
            .create_index(
                Index::create()
                    .table(RelayPublishedEvents::Table)
                    .col(RelayPublishedEvents::Status)
                    .col(RelayPublishedEvents::SentAt)
                    .name("idx_relay_published_events_status_sent_at")
                    .to_owned(),
            )
            .await?;
        // Processing claim: status, visibility timeout and retry budget.
        manager
            .create_index(
                Index::create()
                    .table(RelayReceivedEvents::Table)
                    .col(RelayReceivedEvents::Status)
                    .col(RelayReceivedEvents::UpdateTimestamp)
                    .col(RelayReceivedEvents::RetryCount)
                    .name("idx_relay_received_events_claim")
                    .to_owned(),
            )
            .await?;

        // Predecessor lookups only ever look at unsettled rows.
        let db = manager.get_connection();
        db.execute_unprepared(
            "CREATE INDEX IF NOT EXISTS idx_relay_received_events_predecessor \
             ON relay_received_events (event_key, status, timestamp) \
             WHERE status <> 2",
        )
        .await?;
        db.execute_unprepared(
            "CREATE INDEX IF NOT EXISTS idx_relay_received_events_timestamp \
             ON relay_received_events USING BRIN (timestamp)",
        )
        .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_relay_received_events_timestamp",
            "idx_relay_received_events_predecessor",
            "idx_relay_received_events_claim",
            "idx_relay_published_events_status_sent_at",
        ] {
            manager
                .drop_index(Index::drop().name(name).if_exists().to_owned())
                .await?;
        }
        Ok(())
    }
}

#[derive(Iden)]
enum RelayPublishedEvents {
    Table,
    Status,
    SentAt,
}

#[derive(Iden)]
enum RelayReceivedEvents {
    Table,
    Status,
    UpdateTimestamp,
    RetryCount,
}
