//! Trade stream session.
//!
//! [`TradeStream`] owns the listener registry and dispatcher for one push session
//! and wires them to an external [`PushClient`]. The client delivers raw updates
//! through the callback registered at subscription time. Tearing the session down
//! closes every listener so no consumer stays blocked past disconnect.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::config::StreamConfig;
use crate::dispatcher::{DispatchStats, Dispatcher};
use crate::error::{StreamError, StreamResult};
use crate::event::{FieldSet, RawUpdate, TradeField};
use crate::listener::Listener;
use crate::registry::ListenerRegistry;

/// Push subscription mode.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionMode {
    Merge,
    Distinct,
    Command,
    Raw,
}

/// A subscription request handed to the push client.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub mode: SubscriptionMode,
    pub items: Vec<String>,
    pub fields: Vec<TradeField>,
}

/// Opaque key the push client assigns to a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionKey(pub u64);

/// Callback invoked once per inbound raw update.
pub type UpdateCallback = Box<dyn Fn(&RawUpdate) + Send + Sync + 'static>;

/// Session credentials obtained from the REST session.
#[allow(missing_docs)]
#[derive(Clone, Deserialize)]
pub struct StreamCredentials {
    pub account_id: String,
    pub client_token: String,
    pub security_token: String,
    pub endpoint: String,
}

impl StreamCredentials {
    /// Push server password built from the session tokens.
    #[must_use]
    pub fn password(&self) -> String {
        format!("CST-{}|XST-{}", self.client_token, self.security_token)
    }
}

impl fmt::Debug for StreamCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCredentials")
            .field("account_id", &self.account_id)
            .field("client_token", &"<redacted>")
            .field("security_token", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// The push-protocol client this crate sits on top of.
///
/// Implementations own session creation, subscription bookkeeping and
/// reconnection. `on_update` must be invoked from one delivery thread at a time.
pub trait PushClient: Send {
    /// Opens the push session.
    fn connect(&mut self, credentials: &StreamCredentials) -> StreamResult<()>;

    /// Registers `subscription`; `on_update` receives every raw update for it.
    fn subscribe(
        &mut self,
        subscription: Subscription,
        on_update: UpdateCallback,
    ) -> StreamResult<SubscriptionKey>;

    /// Removes a subscription previously returned by `subscribe`.
    fn unsubscribe(&mut self, key: SubscriptionKey) -> StreamResult<()>;

    /// Closes the push session.
    fn disconnect(&mut self) -> StreamResult<()>;
}

fn lock_err(context: &'static str) -> StreamError {
    StreamError::internal(format!("poisoned lock: {context}"))
}

/// A trade notification session fanning out to listeners.
pub struct TradeStream<C: PushClient> {
    config: StreamConfig,
    client: Mutex<C>,
    subscriptions: Mutex<Vec<SubscriptionKey>>,
    registry: Arc<ListenerRegistry>,
    dispatcher: Arc<Dispatcher>,
}

impl<C: PushClient> fmt::Debug for TradeStream<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TradeStream")
            .field("config", &self.config)
            .field("listeners", &self.registry.len())
            .field("stats", &self.dispatcher.stats())
            .finish_non_exhaustive()
    }
}

impl<C: PushClient> TradeStream<C> {
    /// Creates a disconnected session.
    pub fn new(client: C, config: StreamConfig) -> StreamResult<Self> {
        config.validate()?;
        let registry = Arc::new(ListenerRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry)));

        Ok(Self {
            config,
            client: Mutex::new(client),
            subscriptions: Mutex::new(Vec::new()),
            registry,
            dispatcher,
        })
    }

    /// Session configuration.
    #[must_use]
    pub const fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Listener registry shared with the dispatcher.
    #[must_use]
    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    /// Dispatcher wired to the push subscription.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Dispatch counters for this session.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Connects the push client and subscribes to the account's trade item.
    #[instrument(
        skip(self, credentials),
        fields(account = %credentials.account_id, endpoint = %credentials.endpoint)
    )]
    pub fn connect(&self, credentials: &StreamCredentials) -> StreamResult<SubscriptionKey> {
        let mut client = self.client.lock().map_err(|_| lock_err("push client"))?;

        info!("connecting to push server");
        if let Err(err) = client.connect(credentials) {
            error!(error = %err, "unable to connect to push server");
            return Err(match err {
                StreamError::ConnectFailed { .. } => err,
                other => StreamError::ConnectFailed {
                    message: other.to_string(),
                },
            });
        }

        let subscription = Subscription {
            mode: self.config.subscription_mode,
            items: vec![self.config.item_for(&credentials.account_id)],
            fields: self.config.fields.clone(),
        };

        let dispatcher = Arc::clone(&self.dispatcher);
        let subscribed = client.subscribe(
            subscription,
            Box::new(move |update: &RawUpdate| {
                dispatcher.dispatch(update);
            }),
        );
        let key = match subscribed {
            Ok(key) => key,
            Err(err) => {
                error!(error = %err, "unable to subscribe to trade updates");
                if let Err(disconnect_err) = client.disconnect() {
                    warn!(error = %disconnect_err, "disconnect after failed subscribe failed");
                }
                return Err(match err {
                    StreamError::Subscription { .. } => err,
                    other => StreamError::Subscription {
                        message: other.to_string(),
                    },
                });
            }
        };

        self.lock_subscriptions()?.push(key);
        info!(?key, "subscribed to trade updates");
        Ok(key)
    }

    /// Closes every listener, drops all subscriptions and disconnects.
    #[instrument(skip(self))]
    pub fn disconnect(&self) -> StreamResult<()> {
        let closed = self.registry.close_all_listeners();

        let keys: Vec<SubscriptionKey> = std::mem::take(&mut *self.lock_subscriptions()?);
        let mut client = self.client.lock().map_err(|_| lock_err("push client"))?;
        for key in keys {
            if let Err(err) = client.unsubscribe(key) {
                warn!(?key, error = %err, "unsubscribe failed");
            }
        }

        client.disconnect()?;
        info!(closed, "disconnected from push server");
        Ok(())
    }

    /// Entry point for raw updates; same path the subscription callback uses.
    pub fn on_item_update(&self, update: &RawUpdate) -> usize {
        self.dispatcher.dispatch(update)
    }

    /// Adds a listener for every trade field.
    pub fn add_listener(&self, timeout: Option<Duration>) -> StreamResult<Arc<Listener>> {
        self.registry.add_listener(timeout)
    }

    /// Adds a listener using the configured default timeout.
    pub fn add_listener_default(&self) -> StreamResult<Arc<Listener>> {
        self.registry.add_listener(self.config.default_listener_timeout())
    }

    /// Adds a listener restricted to `fields`.
    pub fn add_listener_for(
        &self,
        fields: FieldSet,
        timeout: Option<Duration>,
    ) -> StreamResult<Arc<Listener>> {
        self.registry.add_listener_for(fields, timeout)
    }

    /// Closes and removes a listener; see [`ListenerRegistry::del_listener`].
    pub fn del_listener(&self, listener: &Listener) -> bool {
        self.registry.del_listener(listener)
    }

    /// Closes and removes every listener.
    pub fn close_all_listeners(&self) -> usize {
        self.registry.close_all_listeners()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }

    fn lock_subscriptions(&self) -> StreamResult<MutexGuard<'_, Vec<SubscriptionKey>>> {
        self.subscriptions.lock().map_err(|_| lock_err("subscriptions"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type SharedCallback = Arc<Mutex<Option<UpdateCallback>>>;

    #[derive(Default)]
    struct FakeClient {
        fail_connect: bool,
        fail_subscribe: bool,
        callback: SharedCallback,
        subscriptions: Arc<Mutex<Vec<Subscription>>>,
        unsubscribed: Arc<Mutex<Vec<SubscriptionKey>>>,
        disconnected: Arc<Mutex<bool>>,
    }

    impl PushClient for FakeClient {
        fn connect(&mut self, _credentials: &StreamCredentials) -> StreamResult<()> {
            if self.fail_connect {
                return Err(StreamError::internal("socket refused"));
            }
            Ok(())
        }

        fn subscribe(
            &mut self,
            subscription: Subscription,
            on_update: UpdateCallback,
        ) -> StreamResult<SubscriptionKey> {
            if self.fail_subscribe {
                return Err(StreamError::internal("item rejected"));
            }
            let mut subs = self.subscriptions.lock().unwrap();
            subs.push(subscription);
            *self.callback.lock().unwrap() = Some(on_update);
            Ok(SubscriptionKey(subs.len() as u64))
        }

        fn unsubscribe(&mut self, key: SubscriptionKey) -> StreamResult<()> {
            self.unsubscribed.lock().unwrap().push(key);
            Ok(())
        }

        fn disconnect(&mut self) -> StreamResult<()> {
            *self.disconnected.lock().unwrap() = true;
            Ok(())
        }
    }

    fn credentials() -> StreamCredentials {
        StreamCredentials {
            account_id: "ABC123".to_string(),
            client_token: "cst".to_string(),
            security_token: "xst".to_string(),
            endpoint: "https://push.example.test".to_string(),
        }
    }

    #[test]
    fn test_password_and_redaction() {
        let creds = credentials();
        assert_eq!(creds.password(), "CST-cst|XST-xst");
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("cst\""));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn test_connect_subscribes_trade_item() {
        let client = FakeClient::default();
        let subs = Arc::clone(&client.subscriptions);
        let callback = Arc::clone(&client.callback);
        let stream = TradeStream::new(client, StreamConfig::default()).unwrap();

        let listener = stream.add_listener(None).unwrap();
        stream.connect(&credentials()).unwrap();

        let subs = subs.lock().unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].mode, SubscriptionMode::Distinct);
        assert_eq!(subs[0].items, vec!["TRADE:ABC123".to_string()]);
        assert_eq!(subs[0].fields, TradeField::ALL.to_vec());

        let update = RawUpdate::default()
            .with_value(TradeField::Confirms, Some(r#"{"dealReference": 9}"#));
        (callback.lock().unwrap().as_ref().unwrap())(&update);
        assert!(listener.wait_key_equals("dealReference", 9).is_some());
    }

    #[test]
    fn test_connect_failure_is_propagated() {
        let client = FakeClient {
            fail_connect: true,
            ..FakeClient::default()
        };
        let subs = Arc::clone(&client.subscriptions);
        let stream = TradeStream::new(client, StreamConfig::default()).unwrap();
        let listener = stream.add_listener(None).unwrap();

        let err = stream.connect(&credentials()).unwrap_err();
        assert!(matches!(err, StreamError::ConnectFailed { .. }));
        assert!(subs.lock().unwrap().is_empty());
        assert!(listener.is_open());
        assert_eq!(stream.listener_count(), 1);
    }

    #[test]
    fn test_subscribe_failure_disconnects() {
        let client = FakeClient {
            fail_subscribe: true,
            ..FakeClient::default()
        };
        let disconnected = Arc::clone(&client.disconnected);
        let stream = TradeStream::new(client, StreamConfig::default()).unwrap();
        let listener = stream.add_listener(None).unwrap();

        let err = stream.connect(&credentials()).unwrap_err();
        assert!(matches!(
            err,
            StreamError::Subscription { ref message } if message.contains("item rejected")
        ));
        assert!(err.is_retryable());
        assert!(*disconnected.lock().unwrap());
        assert!(listener.is_open());
    }

    #[test]
    fn test_disconnect_closes_listeners() {
        let client = FakeClient::default();
        let unsubscribed = Arc::clone(&client.unsubscribed);
        let disconnected = Arc::clone(&client.disconnected);
        let stream = TradeStream::new(client, StreamConfig::default()).unwrap();

        let key = stream.connect(&credentials()).unwrap();
        let a = stream.add_listener(None).unwrap();
        let b = stream.add_listener_default().unwrap();

        stream.disconnect().unwrap();
        assert_eq!(stream.listener_count(), 0);
        assert!(a.wait(|_| true).unwrap_err().is_closed());
        assert!(b.wait(|_| true).unwrap_err().is_closed());
        assert_eq!(*unsubscribed.lock().unwrap(), vec![key]);
        assert!(*disconnected.lock().unwrap());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cfg = StreamConfig {
            fields: Vec::new(),
            ..StreamConfig::default()
        };
        assert!(TradeStream::new(FakeClient::default(), cfg).is_err());
    }
}
