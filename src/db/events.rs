//! Event store on the `events` table.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;

use super::Db;
use crate::codec::Record;
use crate::error::Result;
use crate::log::{EventId, EventStore, IndexedFields, Order, StoreQuery, StoredRecord};
use crate::model::EventKind;

const SELECT_RECORDED: &str = "SELECT id, record FROM events
     WHERE ($1::text IS NULL OR kind = $1)
     AND ($2::text IS NULL OR document_id = $2)
     AND ($3::text IS NULL OR channel = $3)
     AND ($4::boolean IS NULL OR allow_retry = $4)
     AND ($5::timestamptz IS NULL OR occurred_at >= $5)
     AND ($6::timestamptz IS NULL OR occurred_at < $6)
     ORDER BY id ASC
     LIMIT $7";

const SELECT_NEWEST: &str = "SELECT id, record FROM events
     WHERE ($1::text IS NULL OR kind = $1)
     AND ($2::text IS NULL OR document_id = $2)
     AND ($3::text IS NULL OR channel = $3)
     AND ($4::boolean IS NULL OR allow_retry = $4)
     AND ($5::timestamptz IS NULL OR occurred_at >= $5)
     AND ($6::timestamptz IS NULL OR occurred_at < $6)
     ORDER BY id DESC
     LIMIT $7";

#[async_trait]
impl EventStore for Db {
    async fn insert(&self, record: Record) -> Result<EventId> {
        let fields = IndexedFields::extract(&record);
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO events (record, kind, document_id, channel, allow_retry, occurred_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
        )
        .bind(Value::Object(record))
        .bind(fields.kind)
        .bind(fields.document_id)
        .bind(fields.channel)
        .bind(fields.allow_retry)
        .bind(fields.occurred_at)
        .fetch_one(self.pool())
        .await?;
        Ok(EventId(row.0))
    }

    fn find(&self, query: StoreQuery) -> BoxStream<'_, Result<StoredRecord>> {
        let sql = match query.order {
            Order::Recorded => SELECT_RECORDED,
            Order::Newest => SELECT_NEWEST,
        };
        let filter = query.filter;
        // LIMIT NULL reads everything.
        let limit = query.limit.map(|n| i64::try_from(n).unwrap_or(i64::MAX));

        sqlx::query_as::<_, (i64, Value)>(sql)
            .bind(filter.kind.map(EventKind::as_str))
            .bind(filter.document_id)
            .bind(filter.channel)
            .bind(filter.allow_retry)
            .bind(filter.since)
            .bind(filter.until)
            .bind(limit)
            .fetch(self.pool())
            .map(|row| {
                let (id, record) = row?;
                Ok(StoredRecord {
                    id: EventId(id),
                    record,
                })
            })
            .boxed()
    }
}
