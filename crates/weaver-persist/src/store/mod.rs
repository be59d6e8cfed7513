//! Backing store clients.
//!
//! A store is an opaque key-value API: one record per [`StoreKey`] holding
//! the document's whole text. Neither `get` nor `put` retries.

mod clickhouse;
mod memory;

use std::future::Future;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::StoreError;
use crate::key::StoreKey;

pub use self::clickhouse::{ClickHouseStore, TableLayout};
pub use self::memory::MemoryStore;

/// Fraction of the record ceiling at which writes start warning.
pub const SIZE_WARNING_RATIO: f64 = 0.8;

/// Read/write access to durable document records.
pub trait DocumentStore: Send + Sync + 'static {
    /// Fetch the persisted content for `key`; an empty string when no record
    /// exists.
    fn get(&self, key: &StoreKey) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Upsert the record for `key`, refreshing its timestamp.
    fn put(
        &self,
        key: &StoreKey,
        content: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// A record as it sits in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub key: StoreKey,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

/// How close a payload is to the per-record ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeCheck {
    Ok,
    NearLimit,
    OverLimit,
}

/// Warn when `content` approaches or exceeds `max_record_bytes`.
///
/// Only reports. The write still goes ahead.
pub fn check_record_size(key: &StoreKey, content: &str, max_record_bytes: usize) -> SizeCheck {
    let len = content.len();
    let check = if len > max_record_bytes {
        SizeCheck::OverLimit
    } else if len as f64 >= max_record_bytes as f64 * SIZE_WARNING_RATIO {
        SizeCheck::NearLimit
    } else {
        SizeCheck::Ok
    };

    match check {
        SizeCheck::Ok => {}
        SizeCheck::NearLimit => warn!(
            key = %key,
            size = %humansize::format_size(len, humansize::BINARY),
            limit = %humansize::format_size(max_record_bytes, humansize::BINARY),
            "document is approaching the store record size limit"
        ),
        SizeCheck::OverLimit => warn!(
            key = %key,
            size = %humansize::format_size(len, humansize::BINARY),
            limit = %humansize::format_size(max_record_bytes, humansize::BINARY),
            "document exceeds the store record size limit; the write may be rejected"
        ),
    }
    check
}
