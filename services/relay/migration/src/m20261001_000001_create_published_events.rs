use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RelayPublishedEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RelayPublishedEvents::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RelayPublishedEvents::Topic)
                            .string_len(100)
                            .not_null(),
                    )
                    .col(ColumnDef::new(RelayPublishedEvents::Content).text().not_null())
                    .col(
                        ColumnDef::new(RelayPublishedEvents::EventKey)
                            .string_len(500)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RelayPublishedEvents::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RelayPublishedEvents::Status)
                            .small_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RelayPublishedEvents::SentAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RelayPublishedEvents::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RelayPublishedEvents::UpdateTimestamp)
                            .timestamp_with_time_zone(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RelayPublishedEvents::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum RelayPublishedEvents {
    Table,
    Id,
    Topic,
    Content,
    EventKey,
    RetryCount,
    Status,
    SentAt,
    Timestamp,
    UpdateTimestamp,
}
