//! # igstream - trade notification fan-out
//!
//! igstream relays trade push notifications (deal confirmations, open position
//! updates, working order updates) arriving on a single streaming subscription to
//! any number of short-lived consumers. Each consumer owns a [`Listener`] and
//! blocks until an event matching its predicate arrives, the listener is removed,
//! or its timeout expires.
//!
//! ## Core Concepts
//!
//! - **Event**: one decoded field of a raw push update
//! - **Listener**: per-consumer FIFO mailbox with an optional auto-close timeout
//! - **ListenerRegistry**: the set of active listeners, mutated under one lock
//! - **Dispatcher**: decodes raw updates and broadcasts to a registry snapshot
//! - **TradeStream**: session object wiring a [`PushClient`] to the dispatcher
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use igstream::{StreamConfig, TradeStream};
//!
//! let stream = TradeStream::new(client, StreamConfig::default())?;
//! stream.connect(&credentials)?;
//!
//! let listener = stream.add_listener(Some(Duration::from_secs(10)))?;
//! // ... place an order over REST, obtain its deal reference ...
//! let confirm = listener.wait_key_equals("dealReference", deal_reference);
//! stream.del_listener(&listener);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod listener;
pub mod registry;
pub mod session;
pub mod timer;

// Re-export primary types at crate root for convenience
pub use config::{StreamConfig, DEFAULT_LISTENER_TIMEOUT};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use error::{StreamError, StreamResult};
pub use event::{Event, FieldSet, RawUpdate, TradeField};
pub use listener::{Listener, ListenerId, ListenerState};
pub use registry::ListenerRegistry;
pub use session::{
    PushClient, StreamCredentials, Subscription, SubscriptionKey, SubscriptionMode, TradeStream,
    UpdateCallback,
};
