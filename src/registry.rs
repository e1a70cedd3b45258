//! The set of active listeners.
//!
//! All mutation happens under one exclusive lock. Readers take a snapshot (a copy
//! made while holding the lock) and deliver after releasing it, so a slow consumer
//! can never stall registration and the set is never iterated while mutated.
//! A listener whose timeout expires is closed and removed by its timer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tracing::debug;

use crate::error::StreamResult;
use crate::event::FieldSet;
use crate::listener::{Listener, ListenerId};

type ListenerMap = Mutex<HashMap<ListenerId, Arc<Listener>>>;

fn lock_map(map: &ListenerMap) -> MutexGuard<'_, HashMap<ListenerId, Arc<Listener>>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of listeners keyed by id.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    listeners: Arc<ListenerMap>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for every trade field.
    pub fn add_listener(&self, timeout: Option<Duration>) -> StreamResult<Arc<Listener>> {
        self.add_listener_for(FieldSet::all(), timeout)
    }

    /// Registers a listener that only receives events from `fields`.
    pub fn add_listener_for(
        &self,
        fields: FieldSet,
        timeout: Option<Duration>,
    ) -> StreamResult<Arc<Listener>> {
        let map: Weak<ListenerMap> = Arc::downgrade(&self.listeners);
        let listener = Listener::with_expiry(fields, timeout, move |expired: &Listener| {
            match map.upgrade() {
                Some(map) => {
                    let mut listeners = lock_map(&map);
                    expired.close();
                    listeners.remove(&expired.id());
                    debug!(
                        listener = %expired.id(),
                        active = listeners.len(),
                        "expired listener removed"
                    );
                }
                None => {
                    expired.close();
                }
            }
        })?;

        let mut listeners = self.lock();
        // Expiry closes under this lock: an open listener here will be removed by its timer.
        if listener.is_open() {
            listeners.insert(listener.id(), Arc::clone(&listener));
        }
        debug!(listener = %listener.id(), ?timeout, active = listeners.len(), "listener added");
        Ok(listener)
    }

    /// Closes `listener` and removes it. Removing an absent listener is a no-op.
    ///
    /// Returns true if the listener was registered.
    pub fn del_listener(&self, listener: &Listener) -> bool {
        let mut listeners = self.lock();
        listener.close();
        let removed = listeners.remove(&listener.id()).is_some();
        if removed {
            debug!(listener = %listener.id(), active = listeners.len(), "listener removed");
        }
        removed
    }

    /// Closes every listener and empties the registry. Returns how many were removed.
    pub fn close_all_listeners(&self) -> usize {
        let mut listeners = self.lock();
        let count = listeners.len();
        for listener in listeners.values() {
            listener.close();
        }
        listeners.clear();
        debug!(count, "all listeners closed");
        count
    }

    /// Drops listeners that were closed directly rather than through the registry.
    pub fn prune_closed(&self) -> usize {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|_, listener| listener.is_open());
        before - listeners.len()
    }

    /// Copy of the current listener set.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Listener>> {
        self.lock().values().cloned().collect()
    }

    /// Returns true if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ListenerId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ListenerId, Arc<Listener>>> {
        lock_map(&self.listeners)
    }
}
