//! Observer registration for phase changes.
//!
//! Engines publish every phase transition to their registered callbacks.
//! Callbacks run in registration order on the task that caused the
//! transition, after any internal lock has been released, so a callback may
//! call back into the engine.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Registry<T> = Mutex<BTreeMap<u64, Callback<T>>>;

fn lock<T>(registry: &Registry<T>) -> MutexGuard<'_, BTreeMap<u64, Callback<T>>> {
    registry.lock().unwrap_or_else(|p| p.into_inner())
}

/// A set of change callbacks, keyed by increasing subscription id.
pub struct Observers<T> {
    callbacks: Arc<Registry<T>>,
    next_id: AtomicU64,
}

impl<T: 'static> Observers<T> {
    pub fn new() -> Self {
        Self {
            callbacks: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register `on_change`. It stays registered until the returned
    /// [`Subscription`] is dropped or explicitly unsubscribed.
    #[must_use = "dropping the subscription unregisters the callback"]
    pub fn subscribe(&self, on_change: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.callbacks).insert(id, Arc::new(on_change));

        let callbacks = Arc::downgrade(&self.callbacks);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(callbacks) = callbacks.upgrade() {
                    lock(&callbacks).remove(&id);
                }
            })),
        }
    }

    /// Invoke every registered callback with `value`, oldest subscription first.
    pub fn notify(&self, value: &T) {
        // Snapshot first: a callback may subscribe or unsubscribe.
        let snapshot: Vec<Callback<T>> = lock(&self.callbacks).values().cloned().collect();
        for callback in snapshot {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.callbacks).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.callbacks).is_empty()
    }
}

impl<T: 'static> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a registered callback. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
