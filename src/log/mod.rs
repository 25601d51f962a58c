//! Append-only event log: the contract consumed by the document catalog,
//! the poster, and presentation views.
//!
//! The log owns nothing but a handle to its store. Appends and queries may be
//! issued concurrently from any number of callers; the store is the single
//! source of truth. Nothing here is retried: the poster makes retries visible
//! by appending further post events.

pub mod memory;
pub mod store;

use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use crate::codec;
use crate::error::{Error, Result};
use crate::model::event::truncate;
use crate::model::{Event, EventKind};
use crate::telemetry::{events as spans, metrics};
use opentelemetry::KeyValue;

pub use memory::MemoryStore;
pub use store::{EventStore, IndexedFields, StoreQuery, StoredRecord};

/// Default upper bound on `EventLog::recent`.
pub const DEFAULT_MAX_RECENT: usize = 100;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Identity assigned by the store. Orders events by recording time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub i64);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded event together with its store identity.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedEvent {
    pub id: EventId,
    pub event: Event,
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Which events a query returns. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub kind: Option<EventKind>,
    pub document_id: Option<String>,
    pub channel: Option<String>,
    pub allow_retry: Option<bool>,
    /// Inclusive lower bound on the event timestamp.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the event timestamp.
    pub until: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn allow_retry(mut self, allow_retry: bool) -> Self {
        self.allow_retry = Some(allow_retry);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Does a stored record with these indexed values pass the filter?
    pub fn matches(&self, fields: &IndexedFields) -> bool {
        fn eq<T: PartialEq + ?Sized>(want: Option<&T>, have: Option<&T>) -> bool {
            want.is_none_or(|w| have == Some(w))
        }

        eq(self.kind.map(EventKind::as_str), fields.kind.as_deref())
            && eq(self.document_id.as_deref(), fields.document_id.as_deref())
            && eq(self.channel.as_deref(), fields.channel.as_deref())
            && eq(self.allow_retry.as_ref(), fields.allow_retry.as_ref())
            // Bounds are compared at microsecond precision, as Postgres does.
            && self.since.map(truncate).is_none_or(|since| {
                fields.occurred_at.is_some_and(|at| truncate(at) >= since)
            })
            && self.until.map(truncate).is_none_or(|until| {
                fields.occurred_at.is_some_and(|at| truncate(at) < until)
            })
    }
}

/// Result ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    /// Oldest first, in recording order.
    #[default]
    Recorded,
    /// Newest first.
    Newest,
}

// ---------------------------------------------------------------------------
// Query results
// ---------------------------------------------------------------------------

/// One-shot stream of decoded events. Records that fail to decode arrive as
/// `Error::Corrupt` items; the stream carries on past them.
pub type EventStream<'a> = BoxStream<'a, Result<LoggedEvent>>;

/// A stored record that could not be decoded.
#[derive(Debug)]
pub struct CorruptRecord {
    pub id: EventId,
    pub error: Error,
}

/// Collected output of a query: everything that decoded, and everything that
/// did not.
#[derive(Debug, Default)]
pub struct QueryResult {
    pub events: Vec<LoggedEvent>,
    pub corrupt: Vec<CorruptRecord>,
}

impl QueryResult {
    /// Drain a stream. Corrupt records are accumulated; any other error
    /// (the store going away mid-read) aborts.
    pub async fn collect(mut stream: EventStream<'_>) -> Result<Self> {
        let mut result = QueryResult::default();
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => result.events.push(event),
                Err(Error::Corrupt { id, source }) => result.corrupt.push(CorruptRecord {
                    id,
                    error: *source,
                }),
                Err(e) => return Err(e),
            }
        }
        Ok(result)
    }

    pub fn is_clean(&self) -> bool {
        self.corrupt.is_empty()
    }

    /// Just the decoded events, dropping identities.
    pub fn into_events(self) -> Vec<Event> {
        self.events.into_iter().map(|e| e.event).collect()
    }
}

// ---------------------------------------------------------------------------
// Log
// ---------------------------------------------------------------------------

pub struct EventLog<S> {
    store: S,
    max_recent: usize,
}

impl<S: EventStore> EventLog<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            max_recent: DEFAULT_MAX_RECENT,
        }
    }

    /// Override the clamp applied to `recent`. Zero is treated as one.
    pub fn with_max_recent(mut self, max_recent: usize) -> Self {
        self.max_recent = max_recent.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Encode and persist an event. Success means the event is recorded.
    pub async fn append(&self, event: &Event) -> Result<EventId> {
        let kind = event.kind();
        let span = spans::append_span(kind);
        let started = Instant::now();
        let record = codec::encode(event);

        let result = self.store.insert(record).instrument(span.clone()).await;
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "log.append")],
        );

        match result {
            Ok(id) => {
                spans::record_appended(&span, id);
                metrics::events_appended().add(1, &[KeyValue::new("kind", kind.as_str())]);
                Ok(id)
            }
            Err(e) => {
                span.in_scope(|| tracing::error!(error = %e, "append failed"));
                Err(e)
            }
        }
    }

    /// Events matching `filter`, in recording order.
    pub fn query(&self, filter: EventFilter, limit: Option<usize>) -> EventStream<'_> {
        self.query_ordered(filter, Order::Recorded, limit)
    }

    pub fn query_ordered(
        &self,
        filter: EventFilter,
        order: Order,
        limit: Option<usize>,
    ) -> EventStream<'_> {
        let span = spans::query_span(&filter, order, limit);
        let query = StoreQuery {
            filter,
            order,
            limit,
        };
        self.store
            .find(query)
            .map(move |item| {
                let stored = item?;
                decode_stored(stored).inspect_err(|e| {
                    spans::record_corrupt(&span, e);
                    metrics::corrupt_records().add(1, &[]);
                })
            })
            .boxed()
    }

    /// The `n` most recently appended events, oldest first. `n` is clamped
    /// to the configured maximum.
    pub async fn recent(&self, n: usize) -> Result<QueryResult> {
        if n == 0 {
            return Ok(QueryResult::default());
        }
        let n = n.min(self.max_recent);
        let stream = self.query_ordered(EventFilter::default(), Order::Newest, Some(n));
        let mut result = QueryResult::collect(stream).await?;
        result.events.reverse();
        result.corrupt.reverse();
        Ok(result)
    }

    /// Everything recorded about one document, for the catalog.
    pub async fn document_history(&self, document_id: &str) -> Result<QueryResult> {
        QueryResult::collect(self.query(EventFilter::default().document(document_id), None)).await
    }

    /// Failed posts on `channel` that may be attempted again.
    pub async fn retry_candidates(&self, channel: &str) -> Result<QueryResult> {
        let filter = EventFilter::default()
            .kind(EventKind::PostFailure)
            .channel(channel)
            .allow_retry(true);
        QueryResult::collect(self.query(filter, None)).await
    }
}

fn decode_stored(stored: StoredRecord) -> Result<LoggedEvent> {
    let id = stored.id;
    let decoded = match stored.record {
        Value::Object(record) => codec::decode(record),
        other => Err(Error::MalformedRecord(format!(
            "expected a key-value record, got {other}"
        ))),
    };
    match decoded {
        Ok(event) => Ok(LoggedEvent { id, event }),
        Err(e) => Err(Error::Corrupt {
            id,
            source: Box::new(e),
        }),
    }
}
