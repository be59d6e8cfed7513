//! Durable persistence for collaboratively edited documents.
//!
//! This crate provides:
//! - `Persistence`: the bind/write lifecycle hooks a collaboration host calls
//! - `BindingManager`: seed-on-first-bind and debounced saves per document
//! - `Debouncer`: per-key trailing-edge scheduler
//! - `DocumentStore`: key-value store client trait, with ClickHouse and
//!   in-memory implementations
//! - `LoroDocument`: Loro-backed implementation of `SharedDocument`

pub mod binding;
pub mod config;
pub mod debounce;
pub mod document;
pub mod error;
pub mod key;
pub mod persistence;
pub mod store;

pub use binding::{BindingManager, Cleanup};
pub use config::{ClickHouseConfig, PersistConfig, PersistMode, StoreConfig};
pub use debounce::Debouncer;
pub use document::{ChangeObserver, LoroDocument, ObserverId, SharedDocument};
pub use error::{ConfigError, DocumentError, KeyError, PersistError, Result, StoreError};
pub use key::StoreKey;
pub use persistence::{BoundState, NoopPersistence, Persistence};
pub use store::{ClickHouseStore, DocumentStore, MemoryStore, StoredRecord, TableLayout};
