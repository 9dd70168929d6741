use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RelayReceivedEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RelayReceivedEvents::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RelayReceivedEvents::ConsumerGroup)
                            .string_len(100)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RelayReceivedEvents::Partition)
                            .string_len(500)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RelayReceivedEvents::Topic)
                            .string_len(100)
                            .not_null(),
                    )
                    .col(ColumnDef::new(RelayReceivedEvents::Content).text().not_null())
                    .col(
                        ColumnDef::new(RelayReceivedEvents::EventKey)
                            .string_len(500)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RelayReceivedEvents::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RelayReceivedEvents::Status)
                            .small_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(RelayReceivedEvents::ErrorMessage).string_len(1000))
                    .col(
                        ColumnDef::new(RelayReceivedEvents::SentAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RelayReceivedEvents::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RelayReceivedEvents::UpdateTimestamp)
                            .timestamp_with_time_zone(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RelayReceivedEvents::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum RelayReceivedEvents {
    Table,
    Id,
    ConsumerGroup,
    Partition,
    Topic,
    Content,
    EventKey,
    RetryCount,
    Status,
    ErrorMessage,
    SentAt,
    Timestamp,
    UpdateTimestamp,
}
