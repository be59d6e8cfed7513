//! Shared document abstraction and its Loro-backed implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use loro::event::DiffEvent;
use loro::{ExportMode, LoroDoc, LoroText};

use crate::error::DocumentError;

/// Name of the text container holding document content.
pub const CONTENT_CONTAINER: &str = "content";

/// Callback invoked after every content mutation.
pub type ChangeObserver = Arc<dyn Fn() + Send + Sync>;

/// Registration handle returned by [`SharedDocument::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// A mutable text document shared by every connection to one room.
///
/// The host owns the document; persistence only reads its text, inserts the
/// seed, and listens for changes.
pub trait SharedDocument: Send + Sync + 'static {
    /// Current text content.
    fn text(&self) -> String;

    /// Length of the content in characters.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert `text` at character offset `offset`.
    fn insert(&self, offset: usize, text: &str) -> Result<(), DocumentError>;

    /// Register an observer fired after every content change.
    fn observe(&self, observer: ChangeObserver) -> ObserverId;

    /// Remove an observer. Unknown ids are ignored.
    fn unobserve(&self, id: ObserverId);
}

/// Observer registry shared between a document and its change callback.
#[derive(Default)]
pub(crate) struct ObserverSet {
    next_id: AtomicU64,
    observers: DashMap<u64, ChangeObserver>,
}

impl ObserverSet {
    pub(crate) fn add(&self, observer: ChangeObserver) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.insert(id, observer);
        ObserverId(id)
    }

    pub(crate) fn remove(&self, id: ObserverId) {
        self.observers.remove(&id.0);
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }

    pub(crate) fn notify(&self) {
        // Clone out first so an observer may unobserve without deadlocking.
        let observers: Vec<ChangeObserver> = self
            .observers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for observer in observers {
            observer();
        }
    }
}

/// Loro-backed shared document.
///
/// Content lives in the `content` text container. Local inserts commit
/// immediately; remote updates arrive through [`LoroDocument::import`]. Both
/// paths fire registered observers.
pub struct LoroDocument {
    doc: LoroDoc,
    content: LoroText,
    observers: Arc<ObserverSet>,
}

impl LoroDocument {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self::from_doc(LoroDoc::new())
    }

    /// Create a document from an existing Loro snapshot.
    pub fn from_snapshot(snapshot: &[u8]) -> Result<Self, DocumentError> {
        let doc = LoroDoc::new();
        doc.import(snapshot)?;
        Ok(Self::from_doc(doc))
    }

    fn from_doc(doc: LoroDoc) -> Self {
        let content = doc.get_text(CONTENT_CONTAINER);
        let observers = Arc::new(ObserverSet::default());

        // The callback lives as long as the doc; it only holds the registry.
        let registry = observers.clone();
        doc.subscribe_root(Arc::new(move |_event: DiffEvent<'_>| registry.notify()))
            .detach();

        Self {
            doc,
            content,
            observers,
        }
    }

    /// Apply a remote update or snapshot.
    pub fn import(&self, data: &[u8]) -> Result<(), DocumentError> {
        self.doc.import(data)?;
        Ok(())
    }

    /// Export the full CRDT snapshot.
    pub fn export_snapshot(&self) -> Result<Vec<u8>, DocumentError> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| DocumentError::Import(e.to_string()))
    }

    /// Delete `len` characters starting at `offset`.
    pub fn delete(&self, offset: usize, len: usize) -> Result<(), DocumentError> {
        self.content
            .delete(offset, len)
            .map_err(|e| DocumentError::Insert {
                offset,
                message: e.to_string(),
            })?;
        self.doc.commit();
        Ok(())
    }

    /// Number of observers currently registered.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

impl Default for LoroDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LoroDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoroDocument").finish_non_exhaustive()
    }
}

impl SharedDocument for LoroDocument {
    fn text(&self) -> String {
        self.content.to_string()
    }

    fn len(&self) -> usize {
        self.content.len_unicode()
    }

    fn insert(&self, offset: usize, text: &str) -> Result<(), DocumentError> {
        self.content
            .insert(offset, text)
            .map_err(|e| DocumentError::Insert {
                offset,
                message: e.to_string(),
            })?;
        self.doc.commit();
        Ok(())
    }

    fn observe(&self, observer: ChangeObserver) -> ObserverId {
        self.observers.add(observer)
    }

    fn unobserve(&self, id: ObserverId) {
        self.observers.remove(id);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Plain-string document for exercising persistence without a CRDT.
    #[derive(Default)]
    pub(crate) struct PlainDocument {
        text: Mutex<String>,
        observers: ObserverSet,
    }

    impl PlainDocument {
        pub(crate) fn with_text(text: &str) -> Self {
            Self {
                text: Mutex::new(text.to_string()),
                observers: ObserverSet::default(),
            }
        }

        /// Append text and notify observers, like a local edit.
        pub(crate) fn edit(&self, text: &str) {
            self.text.lock().unwrap().push_str(text);
            self.observers.notify();
        }

        /// Replace content without notifying observers.
        pub(crate) fn set_silently(&self, text: &str) {
            *self.text.lock().unwrap() = text.to_string();
        }

        pub(crate) fn observer_count(&self) -> usize {
            self.observers.len()
        }
    }

    impl SharedDocument for PlainDocument {
        fn text(&self) -> String {
            self.text.lock().unwrap().clone()
        }

        fn len(&self) -> usize {
            self.text.lock().unwrap().chars().count()
        }

        fn insert(&self, offset: usize, text: &str) -> Result<(), DocumentError> {
            let mut current = self.text.lock().unwrap();
            let byte = current
                .char_indices()
                .nth(offset)
                .map(|(i, _)| i)
                .unwrap_or(current.len());
            current.insert_str(byte, text);
            drop(current);
            self.observers.notify();
            Ok(())
        }

        fn observe(&self, observer: ChangeObserver) -> ObserverId {
            self.observers.add(observer)
        }

        fn unobserve(&self, id: ObserverId) {
            self.observers.remove(id);
        }
    }
}
