//! Per-consumer mailbox with a blocking, predicate-based read path.
//!
//! A [`Listener`] is written to by the dispatcher (shared writer) and read by the
//! one consumer that owns it. Its queue is an unbounded crossbeam channel, so a
//! send never blocks the delivery thread. Closing enqueues a single sentinel that
//! wakes the waiting consumer.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StreamError, StreamResult};
use crate::event::{Event, FieldSet};
use crate::timer::CloseTimer;

/// Unique identifier for a listener.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Create a new random listener id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Lifecycle of a listener. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Accepting events.
    Open,
    /// Close in progress: sends are already dropped, sentinel not yet queued.
    Closing,
    /// Sentinel queued; no further events are accepted.
    Closed,
}

#[derive(Debug)]
enum Item {
    Event(Event),
    Closed,
}

/// A per-consumer event mailbox.
pub struct Listener {
    id: ListenerId,
    created_at: DateTime<Utc>,
    timeout: Option<Duration>,
    fields: FieldSet,
    state: Mutex<ListenerState>,
    tx: Sender<Item>,
    rx: Receiver<Item>,
    timer: Mutex<Option<CloseTimer>>,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("timeout", &self.timeout)
            .field("fields", &self.fields)
            .field("state", &self.state())
            .field("pending", &self.rx.len())
            .finish()
    }
}

impl Listener {
    /// Creates an open listener. A non-zero `timeout` arms the auto-close timer.
    pub(crate) fn new(fields: FieldSet, timeout: Option<Duration>) -> StreamResult<Arc<Self>> {
        Self::with_expiry(fields, timeout, |listener: &Self| {
            listener.close();
        })
    }

    /// Like [`new`](Self::new), but on timeout runs `on_expire` instead of a bare close.
    ///
    /// `on_expire` is responsible for closing the listener.
    pub(crate) fn with_expiry<F>(
        fields: FieldSet,
        timeout: Option<Duration>,
        on_expire: F,
    ) -> StreamResult<Arc<Self>>
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        let (tx, rx) = unbounded::<Item>();
        let timeout = timeout.filter(|t| !t.is_zero());

        let listener = Arc::new(Self {
            id: ListenerId::new(),
            created_at: Utc::now(),
            timeout,
            fields,
            state: Mutex::new(ListenerState::Open),
            tx,
            rx,
            timer: Mutex::new(None),
        });

        if let Some(delay) = timeout {
            let weak: Weak<Self> = Arc::downgrade(&listener);
            let timer = CloseTimer::schedule("igstream-listener-timeout", delay, move || {
                if let Some(listener) = weak.upgrade() {
                    debug!(listener = %listener.id, ?delay, "listener timeout expired");
                    on_expire(&listener);
                }
            })?;
            *listener.lock_timer() = Some(timer);
        }

        Ok(listener)
    }

    /// Unique id of this listener.
    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }

    /// Creation time; the auto-close timeout counts from here.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Auto-close delay counted from creation, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Fields this listener accepts.
    #[must_use]
    pub const fn fields(&self) -> FieldSet {
        self.fields
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ListenerState {
        *self.lock_state()
    }

    /// Returns true while events are still accepted.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ListenerState::Open
    }

    /// Number of queued items, including the close sentinel once closed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Enqueues a copy of `event` if the listener is open and accepts its field.
    ///
    /// Never blocks. A send after close is dropped silently. Returns true if queued.
    pub fn send(&self, event: &Event) -> bool {
        if !self.fields.contains(event.field()) {
            return false;
        }

        let state = self.lock_state();
        if *state != ListenerState::Open {
            return false;
        }
        // Unbounded and we hold the receiver: cannot fail.
        self.tx.send(Item::Event(event.clone())).is_ok()
    }

    /// Closes the listener. Idempotent; returns true for the call that closed it.
    ///
    /// Safe to call concurrently from the consumer, the registry and the timer.
    pub fn close(&self) -> bool {
        {
            let mut state = self.lock_state();
            if *state != ListenerState::Open {
                return false;
            }
            *state = ListenerState::Closing;
        }

        if let Some(timer) = self.lock_timer().take() {
            timer.cancel();
        }

        let mut state = self.lock_state();
        let _ = self.tx.send(Item::Closed);
        *state = ListenerState::Closed;
        debug!(listener = %self.id, "listener closed");
        true
    }

    /// Blocks until an event satisfying `predicate` is dequeued or the listener closes.
    ///
    /// Events that do not match are consumed and discarded.
    pub fn wait<P>(&self, mut predicate: P) -> StreamResult<Event>
    where
        P: FnMut(&Event) -> bool,
    {
        loop {
            match self.rx.recv() {
                Ok(Item::Event(event)) => {
                    if predicate(&event) {
                        return Ok(event);
                    }
                }
                Ok(Item::Closed) | Err(_) => return Err(self.observed_close()),
            }
        }
    }

    /// Waits for the first event with `event[key] == value`.
    ///
    /// Returns `None` once the listener is closed or its timeout expired.
    pub fn wait_key_equals(&self, key: &str, value: impl Into<Value>) -> Option<Event> {
        let value = value.into();
        self.wait(|event| event.key_equals(key, &value)).ok()
    }

    /// Like [`wait`](Self::wait) but gives up after `duration`.
    ///
    /// Elapsing yields [`StreamError::Timeout`] and leaves the listener open.
    pub fn wait_timeout<P>(&self, mut predicate: P, duration: Duration) -> StreamResult<Event>
    where
        P: FnMut(&Event) -> bool,
    {
        let Some(deadline) = Instant::now().checked_add(duration) else {
            return self.wait(predicate);
        };
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(Item::Event(event)) => {
                    if predicate(&event) {
                        return Ok(event);
                    }
                }
                Ok(Item::Closed) | Err(RecvTimeoutError::Disconnected) => {
                    return Err(self.observed_close());
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(StreamError::Timeout {
                        duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                    });
                }
            }
        }
    }

    /// Bounded variant of [`wait_key_equals`](Self::wait_key_equals).
    pub fn wait_key_equals_timeout(
        &self,
        key: &str,
        value: impl Into<Value>,
        duration: Duration,
    ) -> StreamResult<Event> {
        let value = value.into();
        self.wait_timeout(|event| event.key_equals(key, &value), duration)
    }

    /// Takes the next queued event without blocking.
    ///
    /// `Ok(None)` means the queue is empty and the listener still open.
    pub fn try_recv(&self) -> StreamResult<Option<Event>> {
        match self.rx.try_recv() {
            Ok(Item::Event(event)) => Ok(Some(event)),
            Ok(Item::Closed) | Err(TryRecvError::Disconnected) => Err(self.observed_close()),
            Err(TryRecvError::Empty) => Ok(None),
        }
    }

    /// Puts the sentinel back so every later read also sees the close.
    fn observed_close(&self) -> StreamError {
        let _ = self.tx.send(Item::Closed);
        StreamError::ChannelClosed { listener: self.id }
    }

    fn lock_state(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_timer(&self) -> MutexGuard<'_, Option<CloseTimer>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
