//! Callback registries with drop-to-unsubscribe handles.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: AtomicU64,
    callbacks: Mutex<BTreeMap<u64, Callback<T>>>,
}

impl<T> Registry<T> {
    fn callbacks(&self) -> MutexGuard<'_, BTreeMap<u64, Callback<T>>> {
        // A panicking callback never runs under this lock, so the map is intact
        self.callbacks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Set of callbacks interested in one kind of event.
///
/// Cheap to clone; clones share the same registry.
pub struct Subscribers<T> {
    registry: Arc<Registry<T>>,
}

impl<T> Clone for Subscribers<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(0),
                callbacks: Mutex::new(BTreeMap::new()),
            }),
        }
    }
}

impl<T: 'static> Subscribers<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`; it stays registered until the returned handle is
    /// dropped or unsubscribed.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.callbacks().insert(id, Arc::new(callback));

        let registry: Weak<Registry<T>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.callbacks().remove(&id);
            }
        })
    }

    /// Invoke every registered callback in subscription order.
    ///
    /// Callbacks run outside the registry lock, so they may subscribe or
    /// unsubscribe freely.
    pub fn emit(&self, event: &T) {
        let callbacks: Vec<Callback<T>> = self.registry.callbacks().values().cloned().collect();
        for callback in callbacks {
            callback(event);
        }
    }

    /// Drop every registered callback.
    pub fn clear(&self) {
        self.registry.callbacks().clear();
    }

    pub fn len(&self) -> usize {
        self.registry.callbacks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle for a registered callback; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Remove the callback now.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    /// Keep the callback registered for the lifetime of its registry.
    pub fn detach(mut self) {
        self.cancel = None;
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
