//! Append/query contract, exercised against the in-memory store.

use std::sync::Arc;

use ascmonitor_rs::codec::{self, Record};
use ascmonitor_rs::error::{Error, Result};
use ascmonitor_rs::log::*;
use ascmonitor_rs::model::*;
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde_json::{Map, json};

fn test_log() -> EventLog<MemoryStore> {
    EventLog::new(MemoryStore::new())
}

fn doc(id: &str) -> DocumentRef {
    DocumentRef::new(id, format!("Paper {id}"), format!("paper-{id}"))
}

// ---------------------------------------------------------------------------
// Append and ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn append_returns_increasing_identities() {
    let log = test_log();
    let a = log.append(&Event::new_document(doc("d1"))).await.unwrap();
    let b = log.append(&Event::new_document(doc("d2"))).await.unwrap();
    assert!(a < b);
    assert_eq!(log.store().len(), 2);
}

#[tokio::test]
async fn recent_returns_events_in_append_order() {
    let log = test_log();
    let e1 = Event::new_document(doc("d1"));
    let e2 = Event::post_start(Some(doc("d1")), "twitter");
    let e3 = Event::post_success(Some(doc("d1")), "twitter", Map::new());
    for e in [&e1, &e2, &e3] {
        log.append(e).await.unwrap();
    }

    let result = log.recent(3).await.unwrap();
    assert!(result.is_clean());
    assert_eq!(result.into_events(), vec![e1, e2, e3]);
}

#[tokio::test]
async fn recent_keeps_only_the_newest() {
    let log = test_log();
    for i in 0..5 {
        log.append(&Event::new_document(doc(&format!("d{i}"))))
            .await
            .unwrap();
    }

    let ids: Vec<String> = log
        .recent(2)
        .await
        .unwrap()
        .into_events()
        .iter()
        .map(|e| e.document().unwrap().id().unwrap().to_string())
        .collect();
    assert_eq!(ids, ["d3", "d4"]);
}

#[tokio::test]
async fn recent_is_clamped() {
    let log = test_log().with_max_recent(3);
    for i in 0..10 {
        log.append(&Event::post_start(None, format!("c{i}")))
            .await
            .unwrap();
    }

    let result = log.recent(1_000_000).await.unwrap();
    assert_eq!(result.events.len(), 3);
    assert_eq!(result.events[2].event.channel(), Some("c9"));
    assert!(log.recent(0).await.unwrap().events.is_empty());
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[tokio::test]
async fn query_by_document_returns_its_history() {
    let log = test_log();
    log.append(&Event::new_document(doc("d1"))).await.unwrap();
    log.append(&Event::new_document(doc("d2"))).await.unwrap();
    log.append(&Event::updated_document(doc("d1"))).await.unwrap();
    log.append(&Event::post_start(Some(doc("d1")), "twitter"))
        .await
        .unwrap();

    let kinds: Vec<EventKind> = log
        .document_history("d1")
        .await
        .unwrap()
        .into_events()
        .iter()
        .map(Event::kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::NewDocument,
            EventKind::UpdatedDocument,
            EventKind::PostStart
        ]
    );
}

#[tokio::test]
async fn retry_candidates_are_retryable_failures_on_the_channel() {
    let log = test_log();
    log.append(&Event::post_failure(Some(doc("d1")), "twitter", "timeout", true))
        .await
        .unwrap();
    log.append(&Event::post_failure(Some(doc("d2")), "twitter", "duplicate", false))
        .await
        .unwrap();
    log.append(&Event::post_failure(Some(doc("d3")), "mastodon", "timeout", true))
        .await
        .unwrap();
    log.append(&Event::post_start(Some(doc("d4")), "twitter"))
        .await
        .unwrap();

    let candidates = log.retry_candidates("twitter").await.unwrap().into_events();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].document().unwrap().id(), Some("d1"));
}

#[tokio::test]
async fn query_by_time_range() {
    let log = test_log();
    let base = Utc.with_ymd_and_hms(2020, 3, 1, 0, 0, 0).unwrap();
    for day in 0..4 {
        let event = Event::new_document(doc(&format!("d{day}"))).at(base + Duration::days(day));
        log.append(&event).await.unwrap();
    }

    let filter = EventFilter::default()
        .since(base + Duration::days(1))
        .until(base + Duration::days(3));
    let result = QueryResult::collect(log.query(filter, None)).await.unwrap();
    let ids: Vec<&str> = result
        .events
        .iter()
        .map(|e| e.event.document().unwrap().id().unwrap())
        .collect();
    assert_eq!(ids, ["d1", "d2"]);
}

#[tokio::test]
async fn query_respects_limit_and_kind() {
    let log = test_log();
    for i in 0..3 {
        log.append(&Event::post_start(None, "twitter")).await.unwrap();
        log.append(&Event::deleted_document(doc(&format!("d{i}"))))
            .await
            .unwrap();
    }

    let filter = EventFilter::default().kind(EventKind::DeletedDocument);
    let result = QueryResult::collect(log.query(filter, Some(2))).await.unwrap();
    assert_eq!(result.events.len(), 2);
    assert!(
        result
            .events
            .iter()
            .all(|e| e.event.kind() == EventKind::DeletedDocument)
    );
}

#[tokio::test]
async fn query_is_lazy_and_one_shot() {
    let log = test_log();
    let stream = log.query(EventFilter::default(), None);
    // Appended after the stream was created but before it was polled.
    log.append(&Event::new_document(doc("d1"))).await.unwrap();

    let items: Vec<_> = stream.collect().await;
    assert_eq!(items.len(), 1);
}

// ---------------------------------------------------------------------------
// Corruption isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_corrupt_kind_does_not_fail_the_query() {
    let log = test_log();
    for i in 0..5 {
        log.append(&Event::new_document(doc(&format!("d{i}"))))
            .await
            .unwrap();
    }
    let mut corrupt = codec::encode(&Event::new_document(doc("bad")));
    corrupt.insert("kind".into(), json!("new_documnet"));
    let bad_id = log.store().insert(corrupt).await.unwrap();

    let result = QueryResult::collect(log.query(EventFilter::default(), None))
        .await
        .unwrap();
    assert_eq!(result.events.len(), 5);
    assert_eq!(result.corrupt.len(), 1);
    assert_eq!(result.corrupt[0].id, bad_id);
    assert!(matches!(result.corrupt[0].error, Error::InvalidKind(_)));
}

#[tokio::test]
async fn corrupt_records_arrive_as_stream_items() {
    let log = test_log();
    let mut unknown = codec::encode(&Event::post_start(None, "twitter"));
    unknown.insert("variant_tag".into(), json!("PostRetry"));
    log.store().insert(unknown).await.unwrap();
    log.append(&Event::post_start(None, "twitter")).await.unwrap();

    let items: Vec<_> = log.query(EventFilter::default(), None).collect().await;
    assert_eq!(items.len(), 2);
    assert!(items[0].as_ref().is_err_and(Error::is_corrupt));
    assert!(items[1].is_ok());
}

#[tokio::test]
async fn recent_reports_corrupt_records_too() {
    let log = test_log();
    log.append(&Event::new_document(doc("d1"))).await.unwrap();
    let mut missing = codec::encode(&Event::post_failure(None, "twitter", "boom", true));
    missing.remove("error");
    log.store().insert(missing).await.unwrap();

    let result = log.recent(10).await.unwrap();
    assert_eq!(result.events.len(), 1);
    assert_eq!(result.corrupt.len(), 1);
    assert!(matches!(result.corrupt[0].error, Error::MissingField(ref k) if k == "error"));
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_appends_are_all_recorded() {
    let log = Arc::new(test_log());
    let handles: Vec<_> = (0..16)
        .map(|i| {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                log.append(&Event::post_start(None, format!("c{i}")))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 16);
    assert_eq!(log.store().len(), 16);
}

#[tokio::test]
async fn until_bound_is_compared_at_microsecond_precision() {
    let log = test_log();
    let at = Utc.with_ymd_and_hms(2020, 3, 1, 12, 0, 0).unwrap();
    log.append(&Event::new_document(doc("d1")).at(at)).await.unwrap();

    let filter = EventFilter::default().until(at + Duration::nanoseconds(500));
    let result = QueryResult::collect(log.query(filter, None)).await.unwrap();
    assert!(result.events.is_empty());

    let filter = EventFilter::default().since(at + Duration::nanoseconds(500));
    let result = QueryResult::collect(log.query(filter, None)).await.unwrap();
    assert_eq!(result.events.len(), 1);
}

#[tokio::test]
async fn numeric_document_ids_are_filtered_as_text() {
    let log = test_log();
    let numeric = DocumentRef::new(42, json!(null), "answer");
    log.append(&Event::new_document(numeric)).await.unwrap();
    log.append(&Event::new_document(doc("d1"))).await.unwrap();

    let result = log.document_history("42").await.unwrap();
    assert!(result.is_clean());
    assert_eq!(result.events.len(), 1);
    assert_eq!(result.events[0].event.document().unwrap().raw_id(), &json!(42));
}

// ---------------------------------------------------------------------------
// Store failures
// ---------------------------------------------------------------------------

/// A store whose connection pool is exhausted.
struct UnavailableStore;

#[async_trait]
impl EventStore for UnavailableStore {
    async fn insert(&self, _record: Record) -> Result<EventId> {
        Err(Error::Persistence(sqlx::Error::PoolTimedOut))
    }

    fn find(&self, _query: StoreQuery) -> BoxStream<'_, Result<StoredRecord>> {
        stream::once(async { Err(Error::Persistence(sqlx::Error::PoolTimedOut)) }).boxed()
    }
}

/// A store that yields one good record and then loses its connection.
struct DroppingStore;

#[async_trait]
impl EventStore for DroppingStore {
    async fn insert(&self, _record: Record) -> Result<EventId> {
        Ok(EventId(1))
    }

    fn find(&self, _query: StoreQuery) -> BoxStream<'_, Result<StoredRecord>> {
        let good = StoredRecord {
            id: EventId(1),
            record: serde_json::Value::Object(codec::encode(&Event::new_document(doc("d1")))),
        };
        stream::iter([Ok(good), Err(Error::Persistence(sqlx::Error::PoolTimedOut))]).boxed()
    }
}

#[tokio::test]
async fn append_surfaces_store_errors() {
    let log = EventLog::new(UnavailableStore);
    let err = log
        .append(&Event::new_document(doc("d1")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Persistence(sqlx::Error::PoolTimedOut)));
    assert!(!err.is_corrupt());
}

#[tokio::test]
async fn query_surfaces_store_errors() {
    let log = EventLog::new(UnavailableStore);
    let err = log.recent(10).await.unwrap_err();
    assert!(matches!(err, Error::Persistence(_)));
}

#[tokio::test]
async fn collect_aborts_on_store_error_mid_stream() {
    let log = EventLog::new(DroppingStore);

    let items: Vec<_> = log.query(EventFilter::default(), None).collect().await;
    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    assert!(items[1].as_ref().is_err_and(|e| !e.is_corrupt()));

    let err = QueryResult::collect(log.query(EventFilter::default(), None))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Persistence(sqlx::Error::PoolTimedOut)));
}
