use sea_orm::entity::prelude::*;

/// Inbound event persisted before the broker is acknowledged, then handled locally.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "relay_received_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub consumer_group: String,
    pub partition: String,
    pub topic: String,
    #[sea_orm(column_type = "Text")]
    pub content: String,
    pub event_key: String,
    pub retry_count: i32,
    pub status: i16,
    pub error_message: Option<String>,
    pub sent_at: chrono::DateTime<chrono::Utc>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub update_timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
