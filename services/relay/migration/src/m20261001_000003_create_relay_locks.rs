use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RelayLocks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RelayLocks::Name)
                            .string_len(200)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RelayLocks::Owner).uuid().not_null())
                    .col(
                        ColumnDef::new(RelayLocks::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RelayLocks::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum RelayLocks {
    Table,
    Name,
    Owner,
    ExpiresAt,
}
