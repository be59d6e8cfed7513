//! Wiring documents to the store: seed on first bind, save on change.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info, warn};

use crate::debounce::Debouncer;
use crate::document::{ChangeObserver, SharedDocument};
use crate::error::PersistError;
use crate::key::StoreKey;
use crate::store::DocumentStore;

type Unobserve = Box<dyn FnOnce() + Send + Sync>;

/// Marker that a key's persistence is wired up in this process.
struct Binding {
    id: u64,
    unobserve: Unobserve,
}

type BindingMap = DashMap<StoreKey, Binding>;

/// Handle that removes a binding created by [`BindingManager::bind`].
///
/// Invoking it more than once is harmless, and a handle only ever removes
/// the binding it was issued for. Dropping the handle does not unbind.
#[derive(Clone)]
pub struct Cleanup {
    action: Option<Arc<CleanupAction>>,
}

struct CleanupAction {
    bindings: Weak<BindingMap>,
    key: StoreKey,
    id: u64,
    done: AtomicBool,
}

impl Cleanup {
    /// A handle that does nothing, returned for repeated binds.
    pub fn noop() -> Self {
        Self { action: None }
    }

    pub fn is_noop(&self) -> bool {
        self.action.is_none()
    }

    /// Unsubscribe the change observer and forget the binding.
    pub fn invoke(&self) {
        let Some(action) = &self.action else {
            return;
        };
        if action.done.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(bindings) = action.bindings.upgrade() else {
            return;
        };

        if release(&bindings, &action.key, action.id) {
            debug!(key = %action.key, "binding released");
        }
    }
}

/// Remove the binding for `key` if it is still the one issued as `id`.
fn release(bindings: &BindingMap, key: &StoreKey, id: u64) -> bool {
    let Some((_, binding)) = bindings.remove_if(key, |_, b| b.id == id) else {
        return false;
    };
    (binding.unobserve)();
    metrics::gauge!("collab_bound_documents").set(bindings.len() as f64);
    true
}

/// Releases a binding whose `bind` call was dropped before it finished.
struct UnfinishedBind<'a> {
    bindings: &'a BindingMap,
    key: &'a StoreKey,
    id: u64,
    finished: bool,
}

impl Drop for UnfinishedBind<'_> {
    fn drop(&mut self) {
        if !self.finished && release(self.bindings, self.key, self.id) {
            warn!(key = %self.key, "bind cancelled before seeding finished, binding released");
        }
    }
}

thread_local! {
    /// Binding whose seed content is being inserted on this thread.
    static SEEDING: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Marks the current thread as inserting seed content for one binding, so
/// that binding's observer skips the resulting change notification.
struct SeedInsert;

impl SeedInsert {
    fn enter(id: u64) -> Self {
        SEEDING.with(|seeding| seeding.set(Some(id)));
        SeedInsert
    }

    fn is_active(id: u64) -> bool {
        SEEDING.with(|seeding| seeding.get() == Some(id))
    }
}

impl Drop for SeedInsert {
    fn drop(&mut self) {
        SEEDING.with(|seeding| seeding.set(None));
    }
}

impl std::fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.action {
            Some(action) => f
                .debug_struct("Cleanup")
                .field("key", &action.key)
                .field("done", &action.done.load(Ordering::SeqCst))
                .finish(),
            None => f.write_str("Cleanup(noop)"),
        }
    }
}

/// Tracks which documents are bound in this process and persists their
/// changes through a debounced save.
pub struct BindingManager<S> {
    store: Arc<S>,
    debouncer: Arc<Debouncer>,
    bindings: Arc<BindingMap>,
    next_id: AtomicU64,
}

impl<S: DocumentStore> BindingManager<S> {
    /// Create a manager on the current tokio runtime.
    pub fn new(store: S, debounce: Duration) -> Result<Self, PersistError> {
        Ok(Self::from_parts(Arc::new(store), Debouncer::new(debounce)?))
    }

    pub fn from_parts(store: Arc<S>, debouncer: Debouncer) -> Self {
        Self {
            store,
            debouncer: Arc::new(debouncer),
            bindings: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    pub fn is_bound(&self, key: &StoreKey) -> bool {
        self.bindings.contains_key(key)
    }

    pub fn bound_count(&self) -> usize {
        self.bindings.len()
    }

    /// Bind `document` to `key`: seed it from the store if it is empty, then
    /// save it after every burst of changes.
    ///
    /// Binding a key that is already bound does nothing and returns a no-op
    /// [`Cleanup`]. The change observer is registered before the store read,
    /// so edits made while seeding are saved. Dropping the returned future
    /// before it completes releases the binding again.
    pub async fn bind<D: SharedDocument>(&self, key: StoreKey, document: Arc<D>) -> Cleanup {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        match self.bindings.entry(key.clone()) {
            Entry::Occupied(_) => {
                debug!(key = %key, "document already bound");
                return Cleanup::noop();
            }
            Entry::Vacant(slot) => {
                let observer = self.change_observer(key.clone(), id, &document);
                let observer_id = document.observe(observer);
                let weak = Arc::downgrade(&document);
                slot.insert(Binding {
                    id,
                    unobserve: Box::new(move || {
                        if let Some(document) = weak.upgrade() {
                            document.unobserve(observer_id);
                        }
                    }),
                });
            }
        }
        metrics::gauge!("collab_bound_documents").set(self.bindings.len() as f64);

        let mut unfinished = UnfinishedBind {
            bindings: &self.bindings,
            key: &key,
            id,
            finished: false,
        };
        self.seed(&key, id, document.as_ref()).await;
        unfinished.finished = true;
        drop(unfinished);

        info!(key = %key, "document bound");
        Cleanup {
            action: Some(Arc::new(CleanupAction {
                bindings: Arc::downgrade(&self.bindings),
                key,
                id,
                done: AtomicBool::new(false),
            })),
        }
    }

    /// Seed an empty document with the stored content.
    ///
    /// A document that already has content is left alone, including one that
    /// gained content while the store read was in flight. Those edits were
    /// seen by the change observer and are saved as usual.
    async fn seed<D: SharedDocument>(&self, key: &StoreKey, id: u64, document: &D) {
        if !document.is_empty() {
            debug!(key = %key, "document has content, skipping seed");
            return;
        }

        let stored = match self.store.get(key).await {
            Ok(stored) => stored,
            Err(e) => {
                metrics::counter!("collab_seed_failures_total").increment(1);
                warn!(key = %key, error = %e, "failed to read stored content, continuing unseeded");
                return;
            }
        };

        if stored.is_empty() {
            debug!(key = %key, "no stored content");
            return;
        }

        if !document.is_empty() {
            warn!(
                key = %key,
                stored_bytes = stored.len(),
                "document was edited while the seed was loading, keeping live content"
            );
            return;
        }

        let inserted = {
            let _seeding = SeedInsert::enter(id);
            document.insert(0, &stored)
        };
        match inserted {
            Ok(()) => {
                metrics::counter!("collab_seeds_total").increment(1);
                info!(key = %key, bytes = stored.len(), "seeded document from store");
            }
            Err(e) => {
                metrics::counter!("collab_seed_failures_total").increment(1);
                warn!(key = %key, error = %e, "failed to insert stored content");
            }
        }
    }

    fn change_observer<D: SharedDocument>(
        &self,
        key: StoreKey,
        id: u64,
        document: &Arc<D>,
    ) -> ChangeObserver {
        let debouncer = self.debouncer.clone();
        let store = self.store.clone();
        let document = Arc::downgrade(document);

        Arc::new(move || {
            // The seed itself is not a change worth saving.
            if SeedInsert::is_active(id) {
                return;
            }
            let store = store.clone();
            let document = document.clone();
            let save_key = key.clone();
            debouncer.schedule(key.clone(), async move {
                let Some(document) = document.upgrade() else {
                    debug!(key = %save_key, "document dropped before save");
                    return Ok(());
                };
                save(store.as_ref(), &save_key, document.as_ref()).await
            });
        })
    }

    /// Save `document` now, without waiting for or disturbing any pending
    /// debounced save.
    pub async fn flush<D: SharedDocument>(
        &self,
        key: &StoreKey,
        document: &D,
    ) -> Result<(), PersistError> {
        save(self.store.as_ref(), key, document).await
    }
}

/// Write the document's current content.
async fn save<S: DocumentStore, D: SharedDocument>(
    store: &S,
    key: &StoreKey,
    document: &D,
) -> Result<(), PersistError> {
    let content = document.text();
    match store.put(key, &content).await {
        Ok(()) => {
            metrics::counter!("collab_saves_total").increment(1);
            debug!(key = %key, bytes = content.len(), "saved document");
            Ok(())
        }
        Err(e) => {
            metrics::counter!("collab_save_failures_total").increment(1);
            Err(e.into())
        }
    }
}
