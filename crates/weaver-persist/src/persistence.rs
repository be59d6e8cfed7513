//! The two lifecycle hooks a collaboration host calls: bind a document when
//! it is first opened, and write it out unconditionally before exit.

use std::sync::Arc;

use dashmap::DashSet;
use tracing::{debug, error, info};

use crate::binding::{BindingManager, Cleanup};
use crate::config::{ClickHouseConfig, PersistConfig, PersistMode};
use crate::document::SharedDocument;
use crate::error::{ConfigError, PersistError, StoreError};
use crate::key::StoreKey;
use crate::store::{ClickHouseStore, DocumentStore};

/// Result of [`Persistence::bind_state`].
pub struct BoundState<D> {
    pub document: Arc<D>,
    pub cleanup: Cleanup,
}

/// Persistence that accepts every call and stores nothing.
///
/// Used when no durable store is configured; it still validates names and
/// remembers which documents were bound so the host behaves the same way in
/// both modes.
#[derive(Default)]
pub struct NoopPersistence {
    bound: DashSet<StoreKey>,
}

impl NoopPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    fn bind(&self, key: StoreKey) -> Cleanup {
        if self.bound.insert(key.clone()) {
            info!(key = %key, "bound document (not persisted)");
        } else {
            debug!(key = %key, "document already bound");
        }
        Cleanup::noop()
    }

    pub fn is_bound(&self, key: &StoreKey) -> bool {
        self.bound.contains(key)
    }

    pub fn bound_count(&self) -> usize {
        self.bound.len()
    }
}

/// Process-wide persistence, selected once at startup.
pub enum Persistence<S = ClickHouseStore> {
    Durable(BindingManager<S>),
    Disabled(NoopPersistence),
}

impl<S: DocumentStore> Persistence<S> {
    pub fn durable(manager: BindingManager<S>) -> Self {
        Persistence::Durable(manager)
    }

    pub fn disabled() -> Self {
        Persistence::Disabled(NoopPersistence::new())
    }

    pub fn mode(&self) -> PersistMode {
        match self {
            Persistence::Durable(_) => PersistMode::Durable,
            Persistence::Disabled(_) => PersistMode::Disabled,
        }
    }

    /// Wire up persistence for a document the host has just opened.
    ///
    /// Names that cannot be mapped to a store key are rejected here rather
    /// than coerced, since a coerced name could share a record with another
    /// document.
    pub async fn bind_state<D: SharedDocument>(
        &self,
        name: &str,
        document: Arc<D>,
    ) -> Result<BoundState<D>, PersistError> {
        let key = StoreKey::for_document(name)?;
        let cleanup = match self {
            Persistence::Durable(manager) => manager.bind(key, document.clone()).await,
            Persistence::Disabled(noop) => noop.bind(key),
        };
        Ok(BoundState { document, cleanup })
    }

    /// Save a document immediately, ignoring the debounce window.
    ///
    /// Store failures are logged and swallowed; only an unmappable name is
    /// returned as an error.
    pub async fn write_state<D: SharedDocument>(
        &self,
        name: &str,
        document: &D,
    ) -> Result<(), PersistError> {
        let key = StoreKey::for_document(name)?;
        match self {
            Persistence::Durable(manager) => match manager.flush(&key, document).await {
                Ok(()) => info!(key = %key, "wrote document state"),
                Err(e) => error!(key = %key, error = %e, "failed to write document state"),
            },
            Persistence::Disabled(_) => debug!(key = %key, "write skipped, persistence disabled"),
        }
        Ok(())
    }

    pub fn is_bound(&self, name: &str) -> bool {
        let Ok(key) = StoreKey::for_document(name) else {
            return false;
        };
        match self {
            Persistence::Durable(manager) => manager.is_bound(&key),
            Persistence::Disabled(noop) => noop.is_bound(&key),
        }
    }

    pub fn bound_count(&self) -> usize {
        match self {
            Persistence::Durable(manager) => manager.bound_count(),
            Persistence::Disabled(noop) => noop.bound_count(),
        }
    }

    /// Drop every pending debounced save. Call after the final flush.
    pub fn cancel_pending(&self) {
        if let Persistence::Durable(manager) = self {
            let pending = manager.debouncer().pending_count();
            if pending > 0 {
                info!(pending, "cancelling pending saves");
            }
            manager.debouncer().cancel_all();
        }
    }
}

impl Persistence<ClickHouseStore> {
    /// Build the configured implementation. Must run inside a tokio runtime.
    pub fn from_config(config: &PersistConfig) -> Result<Self, PersistError> {
        match config.mode {
            PersistMode::Disabled => {
                info!("persistence disabled, documents will not be saved");
                Ok(Self::disabled())
            }
            PersistMode::Durable => {
                let connection: &ClickHouseConfig =
                    config.clickhouse.as_ref().ok_or(ConfigError::MissingEnv {
                        var: "CLICKHOUSE_URL",
                    })?;
                let store = ClickHouseStore::new(connection, &config.store)?;
                info!(
                    url = %connection.url,
                    database = %connection.database,
                    table = %store.layout().table(),
                    debounce_ms = config.debounce.as_millis() as u64,
                    "persistence enabled"
                );
                Ok(Self::durable(BindingManager::new(store, config.debounce)?))
            }
        }
    }

    /// Create the document table when running durably.
    pub async fn prepare(&self) -> Result<(), StoreError> {
        match self {
            Persistence::Durable(manager) => manager.store().ensure_table().await,
            Persistence::Disabled(_) => Ok(()),
        }
    }

    /// Whether the backing store is reachable. Always true when disabled.
    pub async fn ping(&self) -> Result<(), StoreError> {
        match self {
            Persistence::Durable(manager) => manager.store().ping().await,
            Persistence::Disabled(_) => Ok(()),
        }
    }
}
