use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;

use super::{DocumentStore, StoredRecord};
use crate::error::StoreError;
use crate::key::StoreKey;

/// Process-local store backed by a concurrent map.
///
/// Keeps nothing across restarts. Reads and writes can be made to fail, and
/// reads can be slowed down, to exercise the error and race paths of the
/// binding manager.
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<StoreKey, StoredRecord>,
    writes: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    read_delay: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `get` by `delay`.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Seed a record directly, bypassing the write counter.
    pub fn insert(&self, key: StoreKey, content: impl Into<String>) {
        self.records.insert(
            key.clone(),
            StoredRecord {
                key,
                content: content.into(),
                updated_at: Utc::now(),
            },
        );
    }

    pub fn record(&self, key: &StoreKey) -> Option<StoredRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    pub fn content(&self, key: &StoreKey) -> Option<String> {
        self.records.get(key).map(|r| r.content.clone())
    }

    /// Number of successful `put` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl DocumentStore for MemoryStore {
    async fn get(&self, key: &StoreKey) -> Result<String, StoreError> {
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                message: format!("read of {key} rejected"),
            });
        }
        Ok(self.content(key).unwrap_or_default())
    }

    async fn put(&self, key: &StoreKey, content: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                message: format!("write of {key} rejected"),
            });
        }
        self.insert(key.clone(), content);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
