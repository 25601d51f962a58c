//! In-process event store, for tests and database-less runs.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde_json::Value;

use super::store::{EventStore, IndexedFields, StoreQuery, StoredRecord};
use super::{EventId, Order};
use crate::codec::Record;
use crate::error::Result;

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<(IndexedFields, Record)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self, query: &StoreQuery) -> Vec<Result<StoredRecord>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        // Identities are 1-based positions in the vector.
        let matching = records
            .iter()
            .enumerate()
            .filter(|(_, (fields, _))| query.filter.matches(fields))
            .map(|(i, (_, record))| StoredRecord {
                id: EventId(i as i64 + 1),
                record: Value::Object(record.clone()),
            });

        let limit = query.limit.unwrap_or(usize::MAX);
        match query.order {
            Order::Recorded => matching.take(limit).map(Ok).collect(),
            Order::Newest => matching.rev().take(limit).map(Ok).collect(),
        }
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert(&self, record: Record) -> Result<EventId> {
        let fields = IndexedFields::extract(&record);
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.push((fields, record));
        Ok(EventId(records.len() as i64))
    }

    fn find(&self, query: StoreQuery) -> BoxStream<'_, Result<StoredRecord>> {
        stream::once(async move { self.snapshot(&query) })
            .flat_map(stream::iter)
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::EventFilter;
    use serde_json::json;

    fn record(kind: &str, channel: &str) -> Record {
        match json!({"kind": kind, "channel": channel}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn identities_follow_insertion_order() {
        let store = MemoryStore::new();
        let a = store.insert(record("post_start", "x")).await.unwrap();
        let b = store.insert(record("post_start", "y")).await.unwrap();
        assert!(a < b);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn newest_order_with_limit_reads_from_the_end() {
        let store = MemoryStore::new();
        for channel in ["a", "b", "c"] {
            store.insert(record("post_start", channel)).await.unwrap();
        }

        let query = StoreQuery {
            filter: EventFilter::default(),
            order: Order::Newest,
            limit: Some(2),
        };
        let ids: Vec<i64> = store
            .find(query)
            .map(|r| r.unwrap().id.0)
            .collect()
            .await;
        assert_eq!(ids, vec![3, 2]);
    }
}
