use anyhow::{Context as _, anyhow};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, LockBehavior, LockType, OnConflict};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, Condition, ConnectionTrait, DatabaseBackend,
    DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, QueryTrait, Select,
    Statement, TransactionTrait, Value,
};
use uuid::Uuid;

use relay_domain::id::EventId;
use relay_domain::message::sanitize_error_message;
use relay_domain::status::EventStatus;
use relay_schema::{published_events, received_events};

use crate::domain::repository::EventStore;
use crate::domain::types::{ClaimPolicy, EventTable, PublishedEvent, ReceivedEvent, Settlement};
use crate::error::RelayError;

// ── Event store ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbEventStore {
    pub db: DatabaseConnection,
}

impl EventStore for DbEventStore {
    async fn insert_received(&self, events: &[ReceivedEvent]) -> Result<u64, RelayError> {
        if events.is_empty() {
            return Ok(0);
        }
        let inserted = received_events::Entity::insert_many(events.iter().map(received_to_model))
            .on_conflict(
                OnConflict::column(received_events::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .context("insert received events")?;
        Ok(inserted)
    }

    async fn insert_published(&self, events: &[PublishedEvent]) -> Result<(), RelayError> {
        insert_published_in(&self.db, events)
            .await
            .context("insert published events")?;
        Ok(())
    }

    async fn claim_for_processing(
        &self,
        policy: &ClaimPolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReceivedEvent>, RelayError> {
        let policy = *policy;
        let models = self
            .db
            .transaction::<_, Vec<received_events::Model>, DbErr>(|txn| {
                Box::pin(async move {
                    let models = processing_claim_query(&policy, now).all(txn).await?;
                    if models.is_empty() {
                        return Ok(models);
                    }

                    let ids: Vec<Uuid> = models.iter().map(|m| m.id).collect();
                    received_events::Entity::update_many()
                        .col_expr(
                            received_events::Column::Status,
                            Expr::value(EventStatus::InProgress.code()),
                        )
                        .col_expr(
                            received_events::Column::RetryCount,
                            Expr::col(received_events::Column::RetryCount).add(1),
                        )
                        .col_expr(received_events::Column::UpdateTimestamp, Expr::value(now))
                        .filter(received_events::Column::Id.is_in(ids))
                        .exec(txn)
                        .await?;
                    Ok(models)
                })
            })
            .await
            .context("claim received events")?;
        models.into_iter().map(received_from_model).collect()
    }

    async fn claim_for_publishing(
        &self,
        policy: &ClaimPolicy,
        now: DateTime<Utc>,
    ) -> Result<Vec<PublishedEvent>, RelayError> {
        let policy = *policy;
        let models = self
            .db
            .transaction::<_, Vec<published_events::Model>, DbErr>(|txn| {
                Box::pin(async move {
                    let models = publishing_claim_query(&policy, now).all(txn).await?;
                    if models.is_empty() {
                        return Ok(models);
                    }

                    let ids: Vec<Uuid> = models.iter().map(|m| m.id).collect();
                    published_events::Entity::update_many()
                        .col_expr(
                            published_events::Column::Status,
                            Expr::value(EventStatus::InProgress.code()),
                        )
                        .col_expr(
                            published_events::Column::RetryCount,
                            Expr::col(published_events::Column::RetryCount).add(1),
                        )
                        .col_expr(published_events::Column::UpdateTimestamp, Expr::value(now))
                        .filter(published_events::Column::Id.is_in(ids))
                        .exec(txn)
                        .await?;
                    Ok(models)
                })
            })
            .await
            .context("claim published events")?;
        models.into_iter().map(published_from_model).collect()
    }

    async fn mark_settled(
        &self,
        settlements: &[Settlement],
        now: DateTime<Utc>,
    ) -> Result<(), RelayError> {
        if settlements.is_empty() {
            return Ok(());
        }
        self.db
            .execute(settle_statement(
                self.db.get_database_backend(),
                settlements,
                now,
            ))
            .await
            .context("mark received events settled")?;
        Ok(())
    }

    async fn mark_published(&self, ids: &[EventId], now: DateTime<Utc>) -> Result<(), RelayError> {
        set_published_status(&self.db, ids, EventStatus::Succeeded, now)
            .await
            .context("mark events published")?;
        Ok(())
    }

    async fn mark_publish_failed(
        &self,
        ids: &[EventId],
        now: DateTime<Utc>,
    ) -> Result<(), RelayError> {
        set_published_status(&self.db, ids, EventStatus::None, now)
            .await
            .context("reset undelivered events")?;
        Ok(())
    }

    async fn find_predecessor_ids(
        &self,
        event_key: &str,
        before: DateTime<Utc>,
    ) -> Result<Vec<EventId>, RelayError> {
        let ids: Vec<Uuid> = received_events::Entity::find()
            .select_only()
            .column(received_events::Column::Id)
            .filter(received_events::Column::EventKey.eq(event_key))
            .filter(received_events::Column::Status.is_in([
                EventStatus::None.code(),
                EventStatus::InProgress.code(),
                EventStatus::Failed.code(),
            ]))
            .filter(received_events::Column::Timestamp.lt(before))
            .order_by_asc(received_events::Column::Timestamp)
            .into_tuple()
            .all(&self.db)
            .await
            .context("find predecessor events")?;
        Ok(ids.into_iter().map(EventId).collect())
    }

    async fn delete_settled_older_than(
        &self,
        table: EventTable,
        status: EventStatus,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<u64, RelayError> {
        let deleted = match table {
            EventTable::Published => {
                let ids: Vec<Uuid> = published_events::Entity::find()
                    .select_only()
                    .column(published_events::Column::Id)
                    .filter(published_events::Column::Status.eq(status.code()))
                    .filter(published_events::Column::UpdateTimestamp.lt(cutoff))
                    .limit(limit)
                    .into_tuple()
                    .all(&self.db)
                    .await
                    .context("select expired published events")?;
                if ids.is_empty() {
                    return Ok(0);
                }
                published_events::Entity::delete_many()
                    .filter(published_events::Column::Id.is_in(ids))
                    .exec(&self.db)
                    .await
                    .context("delete expired published events")?
                    .rows_affected
            }
            EventTable::Received => {
                let ids: Vec<Uuid> = received_events::Entity::find()
                    .select_only()
                    .column(received_events::Column::Id)
                    .filter(received_events::Column::Status.eq(status.code()))
                    .filter(received_events::Column::UpdateTimestamp.lt(cutoff))
                    .limit(limit)
                    .into_tuple()
                    .all(&self.db)
                    .await
                    .context("select expired received events")?;
                if ids.is_empty() {
                    return Ok(0);
                }
                received_events::Entity::delete_many()
                    .filter(received_events::Column::Id.is_in(ids))
                    .exec(&self.db)
                    .await
                    .context("delete expired received events")?
                    .rows_affected
            }
        };
        Ok(deleted)
    }
}

/// Insert published rows on any connection, typically the caller's open
/// business transaction.
pub async fn insert_published_in<C: ConnectionTrait>(
    conn: &C,
    events: &[PublishedEvent],
) -> Result<(), DbErr> {
    if events.is_empty() {
        return Ok(());
    }
    published_events::Entity::insert_many(events.iter().map(published_to_model))
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

/// Oldest claimable received rows, locked and skipping rows held by other
/// claimers. Ties on `timestamp` fall back to the time-ordered id.
fn processing_claim_query(
    policy: &ClaimPolicy,
    now: DateTime<Utc>,
) -> Select<received_events::Entity> {
    let retry_cutoff = now - policy.retry_after;
    let abandon_cutoff = now - policy.abandon_after;
    received_events::Entity::find()
        .filter(received_events::Column::RetryCount.lt(policy.max_retry))
        .filter(
            Condition::any()
                .add(
                    Condition::all()
                        .add(received_events::Column::Status.is_in([
                            EventStatus::None.code(),
                            EventStatus::Failed.code(),
                        ]))
                        .add(
                            Condition::any()
                                .add(received_events::Column::UpdateTimestamp.is_null())
                                .add(received_events::Column::UpdateTimestamp.lt(retry_cutoff)),
                        ),
                )
                .add(abandoned(
                    received_events::Column::Status,
                    received_events::Column::UpdateTimestamp,
                    abandon_cutoff,
                )),
        )
        .order_by_asc(received_events::Column::Timestamp)
        .order_by_asc(received_events::Column::Id)
        .limit(policy.max_batch)
        .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
}

/// Due outbound rows in `sent_at` order, then creation order.
fn publishing_claim_query(
    policy: &ClaimPolicy,
    now: DateTime<Utc>,
) -> Select<published_events::Entity> {
    let abandon_cutoff = now - policy.abandon_after;
    published_events::Entity::find()
        .filter(published_events::Column::RetryCount.lt(policy.max_retry))
        .filter(published_events::Column::SentAt.lt(now))
        .filter(
            Condition::any()
                .add(published_events::Column::Status.eq(EventStatus::None.code()))
                .add(abandoned(
                    published_events::Column::Status,
                    published_events::Column::UpdateTimestamp,
                    abandon_cutoff,
                )),
        )
        .order_by_asc(published_events::Column::SentAt)
        .order_by_asc(published_events::Column::Timestamp)
        .order_by_asc(published_events::Column::Id)
        .limit(policy.max_batch)
        .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
}

fn abandoned<C: ColumnTrait>(status: C, update_timestamp: C, cutoff: DateTime<Utc>) -> Condition {
    Condition::all()
        .add(status.eq(EventStatus::InProgress.code()))
        .add(update_timestamp.lt(cutoff))
}

async fn set_published_status(
    db: &DatabaseConnection,
    ids: &[EventId],
    status: EventStatus,
    now: DateTime<Utc>,
) -> Result<(), DbErr> {
    if ids.is_empty() {
        return Ok(());
    }
    published_events::Entity::update_many()
        .col_expr(published_events::Column::Status, Expr::value(status.code()))
        .col_expr(published_events::Column::UpdateTimestamp, Expr::value(now))
        .filter(published_events::Column::Id.is_in(ids.iter().map(|id| id.0)))
        .exec(db)
        .await?;
    Ok(())
}

/// One `UPDATE` carrying every settlement of a batch:
/// `SET status = CASE id WHEN $1 THEN $2 ... END, error_message = CASE id ... END`.
/// Free text is bound as a parameter and sanitized again on the way in.
pub fn settle_statement(
    backend: DatabaseBackend,
    settlements: &[Settlement],
    now: DateTime<Utc>,
) -> Statement {
    let mut values: Vec<Value> = Vec::with_capacity(settlements.len() * 3 + 1);
    let mut status_arms = String::new();
    let mut message_arms = String::new();
    let mut ids = Vec::with_capacity(settlements.len());
    for settlement in settlements {
        let id = values.len() + 1;
        values.push(settlement.id.0.into());
        values.push(settlement.status.code().into());
        values.push(
            settlement
                .error_message
                .as_deref()
                .map(sanitize_error_message)
                .into(),
        );
        status_arms.push_str(&format!(" WHEN ${id}::uuid THEN ${}::smallint", id + 1));
        message_arms.push_str(&format!(" WHEN ${id}::uuid THEN ${}::text", id + 2));
        ids.push(format!("${id}::uuid"));
    }
    values.push(now.into());
    let sql = format!(
        "UPDATE relay_received_events \
         SET status = CASE id{status_arms} END, \
         error_message = CASE id{message_arms} END, \
         update_timestamp = ${} \
         WHERE id IN ({})",
        values.len(),
        ids.join(", ")
    );
    Statement::from_sql_and_values(backend, sql, values)
}

fn decode_status(code: i16) -> Result<EventStatus, RelayError> {
    EventStatus::from_code(code)
        .ok_or_else(|| RelayError::Internal(anyhow!("unknown event status code {code}")))
}

fn received_from_model(model: received_events::Model) -> Result<ReceivedEvent, RelayError> {
    Ok(ReceivedEvent {
        id: EventId(model.id),
        group: model.consumer_group,
        partition: model.partition,
        topic: model.topic,
        content: model.content,
        event_key: model.event_key,
        retry_count: model.retry_count,
        status: decode_status(model.status)?,
        error_message: model.error_message,
        sent_at: model.sent_at,
        timestamp: model.timestamp,
        update_timestamp: model.update_timestamp,
    })
}

fn received_to_model(event: &ReceivedEvent) -> received_events::ActiveModel {
    received_events::ActiveModel {
        id: Set(event.id.0),
        consumer_group: Set(event.group.clone()),
        partition: Set(event.partition.clone()),
        topic: Set(event.topic.clone()),
        content: Set(event.content.clone()),
        event_key: Set(event.event_key.clone()),
        retry_count: Set(event.retry_count),
        status: Set(event.status.code()),
        error_message: Set(event.error_message.clone()),
        sent_at: Set(event.sent_at),
        timestamp: Set(event.timestamp),
        update_timestamp: Set(event.update_timestamp),
    }
}

fn published_from_model(model: published_events::Model) -> Result<PublishedEvent, RelayError> {
    Ok(PublishedEvent {
        id: EventId(model.id),
        topic: model.topic,
        content: model.content,
        event_key: model.event_key,
        retry_count: model.retry_count,
        status: decode_status(model.status)?,
        sent_at: model.sent_at,
        timestamp: model.timestamp,
        update_timestamp: model.update_timestamp,
    })
}

fn published_to_model(event: &PublishedEvent) -> published_events::ActiveModel {
    published_events::ActiveModel {
        id: Set(event.id.0),
        topic: Set(event.topic.clone()),
        content: Set(event.content.clone()),
        event_key: Set(event.event_key.clone()),
        retry_count: Set(event.retry_count),
        status: Set(event.status.code()),
        sent_at: Set(event.sent_at),
        timestamp: Set(event.timestamp),
        update_timestamp: Set(event.update_timestamp),
    }
}
