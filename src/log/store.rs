//! The contract a persistent collection must satisfy to back the log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde_json::Value;

use super::{EventFilter, EventId, Order};
use crate::codec::{self, Record};
use crate::error::Result;

/// A record as the store returns it, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: EventId,
    pub record: Value,
}

/// What to read and in which order.
#[derive(Debug, Clone, Default)]
pub struct StoreQuery {
    pub filter: EventFilter,
    pub order: Order,
    pub limit: Option<usize>,
}

/// Append-only persistent collection of encoded events.
///
/// Implementations hold no state the log relies on beyond the collection
/// itself. Every insert is self-contained; there is no read-modify-write.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist one record and return its identity. Identities increase in
    /// insertion order.
    async fn insert(&self, record: Record) -> Result<EventId>;

    /// Stream the records matching `query`. Nothing is read until the
    /// stream is first polled, and the stream cannot be restarted.
    fn find(&self, query: StoreQuery) -> BoxStream<'_, Result<StoredRecord>>;
}

/// Values a store indexes for filtering, pulled from the encoded record.
///
/// Extraction never fails: a field that is missing or malformed is simply
/// absent, so a corrupt record can still be stored and reported on read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexedFields {
    pub kind: Option<String>,
    pub document_id: Option<String>,
    pub channel: Option<String>,
    pub allow_retry: Option<bool>,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl IndexedFields {
    pub fn extract(record: &Record) -> Self {
        let text = |key: &str| record.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            kind: text("kind"),
            document_id: record
                .get("document")
                .and_then(|d| d.get("id"))
                .and_then(document_id_text),
            channel: text("channel"),
            allow_retry: record.get("allow_retry").and_then(Value::as_bool),
            occurred_at: record
                .get("timestamp")
                .and_then(|ts| codec::parse_timestamp(ts).ok()),
        }
    }
}

/// Document ids are filtered as text; numeric ids match their decimal form.
fn document_id_text(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
