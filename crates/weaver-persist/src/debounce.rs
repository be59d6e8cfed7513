//! Per-key trailing-edge debouncing.
//!
//! Bursts of change notifications for one document coalesce into a single
//! deferred action that runs once the burst has been quiet for the configured
//! delay.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::PersistError;
use crate::key::StoreKey;

/// The single pending timer slot for a key.
struct PendingTimer {
    generation: u64,
    handle: AbortHandle,
}

/// Delayed-execution scheduler with one pending slot per key.
///
/// Scheduling a key that already has a pending timer aborts that timer and
/// installs the new one while holding the key's map entry, so there is never
/// a moment where both could fire.
pub struct Debouncer {
    delay: Duration,
    runtime: Handle,
    pending: Arc<DashMap<StoreKey, PendingTimer>>,
    next_generation: AtomicU64,
}

impl Debouncer {
    /// Create a debouncer on the current tokio runtime.
    pub fn new(delay: Duration) -> Result<Self, PersistError> {
        let runtime = Handle::try_current().map_err(|_| PersistError::Runtime)?;
        Ok(Self::with_handle(delay, runtime))
    }

    /// Create a debouncer spawning its timers on `runtime`.
    pub fn with_handle(delay: Duration, runtime: Handle) -> Self {
        Self {
            delay,
            runtime,
            pending: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Run `action` once `delay` has passed without another `schedule` for
    /// `key`. A failing action is logged and dropped; it is not re-armed.
    pub fn schedule<F>(&self, key: StoreKey, action: F)
    where
        F: Future<Output = Result<(), PersistError>> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        match self.pending.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                slot.get().handle.abort();
                metrics::counter!("collab_debounce_superseded_total").increment(1);
                let handle = self.spawn_timer(key, generation, action);
                slot.insert(PendingTimer { generation, handle });
            }
            Entry::Vacant(slot) => {
                let handle = self.spawn_timer(key, generation, action);
                slot.insert(PendingTimer { generation, handle });
            }
        }
    }

    fn spawn_timer<F>(&self, key: StoreKey, generation: u64, action: F) -> AbortHandle
    where
        F: Future<Output = Result<(), PersistError>> + Send + 'static,
    {
        let pending = self.pending.clone();
        let delay = self.delay;

        self.runtime
            .spawn(async move {
                tokio::time::sleep(delay).await;

                // Consume the slot before running so a later change starts a
                // fresh timer instead of aborting this action mid-write.
                let still_current = pending
                    .remove_if(&key, |_, timer| timer.generation == generation)
                    .is_some();
                if !still_current {
                    return;
                }

                debug!(key = %key, "debounce window elapsed");
                if let Err(e) = action.await {
                    warn!(key = %key, error = %e, "debounced action failed");
                }
            })
            .abort_handle()
    }

    /// Whether `key` has a timer waiting to fire.
    pub fn pending(&self, key: &StoreKey) -> bool {
        self.pending.contains_key(key)
    }

    /// Number of keys with a pending timer.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Abort every pending timer without running its action.
    pub fn cancel_all(&self) {
        self.pending.retain(|key, timer| {
            debug!(key = %key, "cancelling pending timer");
            timer.handle.abort();
            false
        });
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    const DELAY: Duration = Duration::from_millis(100);

    fn key(name: &str) -> StoreKey {
        StoreKey::for_document(name).unwrap()
    }

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn record(
        log: &Arc<Mutex<Vec<&'static str>>>,
        label: &'static str,
    ) -> impl Future<Output = Result<(), PersistError>> + Send + 'static {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(label);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_runs_after_quiet_period() {
        let debouncer = Debouncer::new(DELAY).unwrap();
        let log = recorder();

        debouncer.schedule(key("doc"), record(&log, "save"));
        assert!(debouncer.pending(&key("doc")));

        tokio::time::sleep(DELAY / 2).await;
        assert!(log.lock().unwrap().is_empty());

        tokio::time::sleep(DELAY).await;
        assert_eq!(*log.lock().unwrap(), vec!["save"]);
        assert!(!debouncer.pending(&key("doc")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_runs_only_last_action() {
        let debouncer = Debouncer::new(DELAY).unwrap();
        let log = recorder();

        for label in ["first", "second", "third"] {
            debouncer.schedule(key("doc"), record(&log, label));
            tokio::time::sleep(DELAY / 4).await;
        }
        assert_eq!(debouncer.pending_count(), 1);

        tokio::time::sleep(DELAY * 2).await;
        assert_eq!(*log.lock().unwrap(), vec!["third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_call_restarts_the_window() {
        let debouncer = Debouncer::new(DELAY).unwrap();
        let log = recorder();

        // Total elapsed exceeds DELAY but no single gap does.
        for _ in 0..5 {
            debouncer.schedule(key("doc"), record(&log, "save"));
            tokio::time::sleep(DELAY * 3 / 4).await;
        }
        assert!(log.lock().unwrap().is_empty());

        tokio::time::sleep(DELAY).await;
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_calls_run_separately() {
        let debouncer = Debouncer::new(DELAY).unwrap();
        let log = recorder();

        debouncer.schedule(key("doc"), record(&log, "one"));
        tokio::time::sleep(DELAY * 2).await;
        debouncer.schedule(key("doc"), record(&log, "two"));
        tokio::time::sleep(DELAY * 2).await;

        assert_eq!(*log.lock().unwrap(), vec!["one", "two"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let debouncer = Debouncer::new(DELAY).unwrap();
        let log = recorder();

        debouncer.schedule(key("a"), record(&log, "a"));
        debouncer.schedule(key("b"), record(&log, "b"));
        assert_eq!(debouncer.pending_count(), 2);

        tokio::time::sleep(DELAY * 2).await;
        let mut ran = log.lock().unwrap().clone();
        ran.sort();
        assert_eq!(ran, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_action_is_not_rearmed() {
        let debouncer = Debouncer::new(DELAY).unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        debouncer.schedule(key("doc"), async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(PersistError::Runtime)
        });

        tokio::time::sleep(DELAY * 5).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_drops_pending_actions() {
        let debouncer = Debouncer::new(DELAY).unwrap();
        let log = recorder();

        debouncer.schedule(key("a"), record(&log, "a"));
        debouncer.schedule(key("b"), record(&log, "b"));
        debouncer.cancel_all();
        assert_eq!(debouncer.pending_count(), 0);

        tokio::time::sleep(DELAY * 2).await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_new_requires_runtime() {
        assert!(matches!(
            Debouncer::new(DELAY),
            Err(PersistError::Runtime)
        ));
    }
}
