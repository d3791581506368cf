//! Observer lists with explicit unsubscription.
//!
//! A panicking observer is logged and skipped; the remaining observers
//! still receive the notification.

use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: AtomicU64,
    observers: RwLock<Vec<(u64, Callback<T>)>>,
}

impl<T> Registry<T> {
    fn remove(&self, id: u64) {
        self.observers.write().retain(|(observer_id, _)| *observer_id != id);
    }
}

/// An ordered list of observers of `T`.
pub struct ObserverList<T> {
    registry: Arc<Registry<T>>,
}

impl<T: 'static> ObserverList<T> {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Registers an observer. It stays registered until the handle's
    /// `unsubscribe` is called or the list is cleared.
    pub fn register(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> ObserverHandle {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .observers
            .write()
            .push((id, Arc::new(observer)));

        let registry: Weak<Registry<T>> = Arc::downgrade(&self.registry);
        ObserverHandle::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        })
    }

    /// Delivers `value` to every registered observer, in registration order.
    ///
    /// Returns the number of observers that completed without panicking.
    pub fn notify(&self, value: &T) -> usize {
        // Snapshot so observers may unsubscribe from inside the callback.
        let observers: Vec<Callback<T>> = self
            .registry
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        let mut delivered = 0;
        for observer in observers {
            match catch_unwind(AssertUnwindSafe(|| observer(value))) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::error!("observer panicked; continuing with the rest"),
            }
        }
        delivered
    }

    /// Removes every observer.
    pub fn clear(&self) {
        self.registry.observers.write().clear();
    }

    /// Returns the number of registered observers.
    pub fn len(&self) -> usize {
        self.registry.observers.read().len()
    }

    /// Returns true if no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for ObserverList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ObserverList<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T> std::fmt::Debug for ObserverList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("observers", &self.registry.observers.read().len())
            .finish()
    }
}

/// Handle returned by a registration. Dropping it does not unsubscribe.
pub struct ObserverHandle {
    remove: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ObserverHandle {
    fn new(remove: impl FnOnce() + Send + 'static) -> Self {
        Self {
            remove: Mutex::new(Some(Box::new(remove))),
        }
    }

    /// Stops delivery to the observer. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        let remove = self.remove.lock().take();
        if let Some(remove) = remove {
            remove();
        }
    }

    /// Returns true until `unsubscribe` has been called.
    pub fn is_active(&self) -> bool {
        self.remove.lock().is_some()
    }
}

impl std::fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("active", &self.is_active())
            .finish()
    }
}
