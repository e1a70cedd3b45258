//! Fan-out from raw push updates to every registered listener.
//!
//! The push collaborator calls [`Dispatcher::dispatch`] once per inbound update,
//! from one delivery thread at a time. Each present field is decoded into an
//! [`Event`]; a malformed field is logged and skipped without affecting the others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{trace, warn};

use crate::event::{Event, RawUpdate};
use crate::registry::ListenerRegistry;

/// Running dispatch counters.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub updates: u64,
    pub events: u64,
    pub deliveries: u64,
    pub malformed: u64,
}

/// Broadcasts decoded events to the listeners of a registry.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<ListenerRegistry>,
    updates: AtomicU64,
    events: AtomicU64,
    deliveries: AtomicU64,
    malformed: AtomicU64,
}

impl Dispatcher {
    /// Creates a dispatcher broadcasting to `registry`.
    #[must_use]
    pub fn new(registry: Arc<ListenerRegistry>) -> Self {
        Self {
            registry,
            updates: AtomicU64::new(0),
            events: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
        }
    }

    /// Registry this dispatcher broadcasts to.
    #[must_use]
    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    /// Decodes `update` and sends each event to every listener.
    ///
    /// Returns the number of events decoded.
    pub fn dispatch(&self, update: &RawUpdate) -> usize {
        self.updates.fetch_add(1, Ordering::Relaxed);
        let mut decoded = 0;

        for result in update.decode() {
            match result {
                Ok(event) => {
                    decoded += 1;
                    self.broadcast(&event);
                }
                Err(err) => {
                    self.malformed.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %err, item = ?update.item, "skipping malformed field");
                }
            }
        }

        decoded
    }

    /// Parses a raw update from JSON and dispatches it.
    ///
    /// A malformed envelope is logged and counted; nothing is delivered.
    pub fn dispatch_json(&self, raw: &str) -> usize {
        match RawUpdate::from_json_str(raw) {
            Ok(update) => self.dispatch(&update),
            Err(err) => {
                self.updates.fetch_add(1, Ordering::Relaxed);
                self.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "skipping malformed update");
                0
            }
        }
    }

    /// Sends one event to a snapshot of the registry, taken per event.
    fn broadcast(&self, event: &Event) {
        self.events.fetch_add(1, Ordering::Relaxed);

        let listeners = self.registry.snapshot();
        let delivered = listeners.iter().filter(|l| l.send(event)).count() as u64;

        self.deliveries.fetch_add(delivered, Ordering::Relaxed);
        trace!(field = %event.field(), listeners = listeners.len(), delivered, "event broadcast");
    }

    /// Snapshot of the dispatch counters.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            updates: self.updates.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}
