//! Ordered callback registrations.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

/// Callback invoked with each emitted value.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Identifier of a single registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

struct Inner<T> {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener<T>)>,
}

/// A set of listeners invoked in registration order.
///
/// Registering the same closure twice yields two independent entries.
/// Emission snapshots the current listeners and calls them without holding
/// the lock, so a listener may register or remove listeners re-entrantly.
pub struct ListenerRegistry<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for ListenerRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ListenerRegistry<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a listener; it stays registered until removed by id.
    pub fn add(&self, listener: Listener<T>) -> ListenerId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        inner.listeners.push((id, listener));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut inner = self.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(lid, _)| *lid != id);
        inner.listeners.len() != before
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().listeners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every listener with `value`.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self
            .lock()
            .listeners
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            listener(value);
        }
    }
}

impl<T: Send + 'static> ListenerRegistry<T> {
    /// Add a listener and return a handle that removes it on drop.
    pub fn subscribe(&self, listener: Listener<T>) -> ListenerHandle {
        let id = self.add(listener);
        let weak: Weak<Mutex<Inner<T>>> = Arc::downgrade(&self.inner);
        ListenerHandle {
            id,
            remove: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let registry = ListenerRegistry { inner };
                    registry.remove(id);
                }
            })),
        }
    }
}

/// Unsubscribe handle returned by [`ListenerRegistry::subscribe`].
///
/// Dropping the handle removes the listener.
#[must_use = "dropping the handle unsubscribes the listener immediately"]
pub struct ListenerHandle {
    id: ListenerId,
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerHandle {
    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener now.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, Listener<u32>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        (hits, Arc::new(move |_: &u32| {
            h.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_emit_in_registration_order() {
        let registry = ListenerRegistry::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            registry.add(Arc::new(move |v: &u32| {
                seen.lock().unwrap().push(format!("{tag}{v}"));
            }));
        }
        registry.emit(&7);
        assert_eq!(*seen.lock().unwrap(), vec!["a7", "b7", "c7"]);
    }

    #[test]
    fn test_duplicate_registrations_are_independent() {
        let registry = ListenerRegistry::<u32>::new();
        let (hits, listener) = counter();
        let first = registry.add(Arc::clone(&listener));
        let _second = registry.add(listener);

        registry.emit(&1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert!(registry.remove(first));
        assert!(!registry.remove(first));
        registry.emit(&1);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_handle_unsubscribes_on_drop() {
        let registry = ListenerRegistry::<u32>::new();
        let (hits, listener) = counter();
        let handle = registry.subscribe(listener);
        registry.emit(&1);
        drop(handle);
        registry.emit(&1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handle_outliving_registry() {
        let registry = ListenerRegistry::<u32>::new();
        let (_hits, listener) = counter();
        let handle = registry.subscribe(listener);
        drop(registry);
        handle.unsubscribe();
    }

    #[test]
    fn test_reentrant_remove_during_emit() {
        let registry = ListenerRegistry::<u32>::new();
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let (r, s) = (registry.clone(), Arc::clone(&slot));
        let id = registry.add(Arc::new(move |_: &u32| {
            if let Some(id) = *s.lock().unwrap() {
                r.remove(id);
            }
        }));
        *slot.lock().unwrap() = Some(id);

        registry.emit(&0);
        assert!(registry.is_empty());
    }
}
