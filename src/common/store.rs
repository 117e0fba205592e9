//! Local key/value storage contract and an in-memory implementation of it.

use std::fmt::Debug;
use std::num::NonZeroUsize;

use lru::LruCache;
use serde_json::Value;

use crate::common::Id;

/// Default maximum number of records kept by [MemoryStore].
pub const MAX_VALUES: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
/// A value held locally, with its publishing metadata. Times are Unix seconds.
pub struct StoredRecord {
    pub value: Value,
    /// When this node last stored or re-published the value.
    pub last_published: u64,
    /// When the original publisher first published the value.
    pub originally_published_at: u64,
    pub original_publisher: Id,
    pub market_id: String,
}

/// What the coordinator needs from local storage.
pub trait DataStore: Debug + Send {
    fn contains(&self, key: &str) -> bool;

    fn get(&self, key: &str) -> Option<Value>;

    fn set(&mut self, key: String, record: StoredRecord);

    fn delete(&mut self, key: &str);

    fn keys(&self) -> Vec<String>;

    fn original_publisher_id(&self, key: &str) -> Option<Id>;

    fn original_publish_time(&self, key: &str) -> Option<u64>;

    fn last_published(&self, key: &str) -> Option<u64>;
}

#[derive(Debug)]
/// Bounded in-memory [DataStore], evicting the least recently written key when full.
pub struct MemoryStore {
    records: LruCache<String, StoredRecord>,
}

impl MemoryStore {
    pub fn new(max_values: usize) -> Self {
        Self {
            records: LruCache::new(
                NonZeroUsize::new(max_values)
                    .unwrap_or(NonZeroUsize::new(MAX_VALUES).expect("MAX_VALUES is NonZeroUsize")),
            ),
        }
    }

    pub fn record(&self, key: &str) -> Option<&StoredRecord> {
        self.records.peek(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MAX_VALUES)
    }
}

impl DataStore for MemoryStore {
    fn contains(&self, key: &str) -> bool {
        self.records.contains(key)
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.record(key).map(|record| record.value.clone())
    }

    fn set(&mut self, key: String, record: StoredRecord) {
        self.records.put(key, record);
    }

    fn delete(&mut self, key: &str) {
        self.records.pop(key);
    }

    fn keys(&self) -> Vec<String> {
        self.records.iter().map(|(key, _)| key.clone()).collect()
    }

    fn original_publisher_id(&self, key: &str) -> Option<Id> {
        self.record(key).map(|record| record.original_publisher)
    }

    fn original_publish_time(&self, key: &str) -> Option<u64> {
        self.record(key).map(|record| record.originally_published_at)
    }

    fn last_published(&self, key: &str) -> Option<u64> {
        self.record(key).map(|record| record.last_published)
    }
}
