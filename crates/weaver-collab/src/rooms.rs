//! One shared document per room, created on first open.

use std::sync::Arc;

use dashmap::DashMap;
use smol_str::SmolStr;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use weaver_persist::{
    ClickHouseStore, Cleanup, DocumentStore, LoroDocument, PersistError, Persistence, StoreKey,
};

/// A room's document, set once its persistence is bound.
type RoomCell = Arc<OnceCell<Arc<LoroDocument>>>;

/// Open rooms for this process.
///
/// Persistence is bound exactly once per room, when the room's document is
/// created. Opens that arrive while that is in progress wait for it, so no
/// caller sees the document before it has been seeded. If the opening call
/// is dropped part way, the next open starts over with a fresh document.
pub struct RoomRegistry<S = ClickHouseStore> {
    persistence: Arc<Persistence<S>>,
    rooms: DashMap<SmolStr, RoomCell>,
    cleanups: DashMap<SmolStr, Cleanup>,
}

impl<S: DocumentStore> RoomRegistry<S> {
    pub fn new(persistence: Arc<Persistence<S>>) -> Self {
        Self {
            persistence,
            rooms: DashMap::new(),
            cleanups: DashMap::new(),
        }
    }

    pub fn persistence(&self) -> &Persistence<S> {
        &self.persistence
    }

    /// Get or create the document for a room.
    pub async fn open(&self, name: &str) -> Result<Arc<LoroDocument>, PersistError> {
        StoreKey::for_document(name)?;

        let cell = self.rooms.entry(SmolStr::new(name)).or_default().clone();
        let document = cell.get_or_try_init(|| self.create(name)).await?;
        Ok(document.clone())
    }

    async fn create(&self, name: &str) -> Result<Arc<LoroDocument>, PersistError> {
        let document = Arc::new(LoroDocument::new());
        let bound = self.persistence.bind_state(name, document.clone()).await?;
        if !bound.cleanup.is_noop() {
            self.cleanups.insert(SmolStr::new(name), bound.cleanup);
        }
        info!(room = name, "opened room");
        Ok(document)
    }

    /// Write the room out, stop persisting it and forget its document.
    pub async fn close(&self, name: &str) -> Result<bool, PersistError> {
        let Some((_, cell)) = self.rooms.remove(name) else {
            return Ok(false);
        };
        let Some(document) = cell.get().cloned() else {
            return Ok(false);
        };
        if let Some((_, cleanup)) = self.cleanups.remove(name) {
            cleanup.invoke();
        }
        self.persistence.write_state(name, document.as_ref()).await?;
        debug!(room = name, "closed room");
        Ok(true)
    }

    /// Write every open room immediately. Returns how many rooms were written.
    pub async fn flush_all(&self) -> usize {
        let rooms: Vec<_> = self
            .rooms
            .iter()
            .filter_map(|entry| {
                let document = entry.value().get()?.clone();
                Some((entry.key().clone(), document))
            })
            .collect();

        let mut written = 0;
        for (name, document) in rooms {
            match self.persistence.write_state(&name, document.as_ref()).await {
                Ok(()) => written += 1,
                Err(e) => warn!(room = %name, error = %e, "skipped room on flush"),
            }
        }
        written
    }

    /// Number of rooms whose document is open.
    pub fn len(&self) -> usize {
        self.rooms
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use weaver_persist::{BindingManager, Debouncer, MemoryStore, SharedDocument};

    use super::*;

    const DEBOUNCE: Duration = Duration::from_millis(100);

    fn registry(store: Arc<MemoryStore>) -> RoomRegistry<MemoryStore> {
        let manager = BindingManager::from_parts(store, Debouncer::new(DEBOUNCE).unwrap());
        RoomRegistry::new(Arc::new(Persistence::durable(manager)))
    }

    fn key(name: &str) -> StoreKey {
        StoreKey::for_document(name).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_returns_same_document() {
        let rooms = registry(Arc::new(MemoryStore::new()));

        let first = rooms.open("room").await.unwrap();
        let second = rooms.open("room").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(rooms.len(), 1);
        assert_eq!(first.observer_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_open_waits_for_seed() {
        let store = Arc::new(MemoryStore::new().with_read_delay(DEBOUNCE));
        store.insert(key("notes"), "saved yesterday");
        let rooms = Arc::new(registry(store.clone()));

        let first = {
            let rooms = rooms.clone();
            tokio::spawn(async move { rooms.open("notes").await })
        };
        tokio::time::sleep(DEBOUNCE / 2).await;

        let second = rooms.open("notes").await.unwrap();
        assert_eq!(second.text(), "saved yesterday");

        let first = first.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.observer_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_open_can_be_retried() {
        let store = Arc::new(MemoryStore::new().with_read_delay(DEBOUNCE));
        let rooms = Arc::new(registry(store.clone()));

        let opening = {
            let rooms = rooms.clone();
            tokio::spawn(async move { rooms.open("room").await })
        };
        tokio::time::sleep(DEBOUNCE / 2).await;
        opening.abort();
        assert!(opening.await.unwrap_err().is_cancelled());
        assert!(rooms.is_empty());
        assert!(!rooms.persistence().is_bound("room"));

        let doc = rooms.open("room").await.unwrap();
        assert_eq!(doc.observer_count(), 1);
        doc.insert(0, "kept").unwrap();

        tokio::time::sleep(DEBOUNCE * 2).await;
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.content(&key("room")).as_deref(), Some("kept"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_seeds_from_store() {
        let store = Arc::new(MemoryStore::new());
        store.insert(key("notes"), "from last time");
        let rooms = registry(store);

        let doc = rooms.open("notes").await.unwrap();
        assert_eq!(doc.text(), "from last time");
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_invalid_name() {
        let rooms = registry(Arc::new(MemoryStore::new()));
        assert!(matches!(
            rooms.open("a//b").await,
            Err(PersistError::Key(_))
        ));
        assert!(rooms.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_all_writes_every_room() {
        let store = Arc::new(MemoryStore::new());
        let rooms = registry(store.clone());

        rooms.open("one").await.unwrap().insert(0, "first").unwrap();
        rooms.open("two").await.unwrap().insert(0, "second").unwrap();

        assert_eq!(rooms.flush_all().await, 2);
        assert_eq!(store.content(&key("one")).as_deref(), Some("first"));
        assert_eq!(store.content(&key("two")).as_deref(), Some("second"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_writes_and_unbinds() {
        let store = Arc::new(MemoryStore::new());
        let rooms = registry(store.clone());

        let doc = rooms.open("room").await.unwrap();
        doc.insert(0, "closing").unwrap();
        assert!(rooms.close("room").await.unwrap());
        assert!(!rooms.close("room").await.unwrap());

        assert_eq!(doc.observer_count(), 0);
        assert!(!rooms.persistence().is_bound("room"));
        assert_eq!(store.content(&key("room")).as_deref(), Some("closing"));
    }
}
