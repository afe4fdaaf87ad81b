//! Client orchestrator.
//!
//! [`NostrClient`] owns one connection supervisor per relay URL plus the
//! shared client state: the subscription registry, the pending-ack map for
//! published events, and the offline queue. All supervisor callbacks arrive
//! through the [`ConnectionDelegate`] seam; the orchestrator never hands
//! supervisors a reference back to itself, only a weak one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::ClientOptions;
use crate::error::ClientError;
use crate::keys::Keys;
use crate::relays::connection::RelayConnection;
use crate::relays::types::{
    ClientMessage, ConnectionDelegate, ConnectionEvent, ConnectionStatus, RelayMessage,
};
use crate::transport::{Transport, WebSocketTransport};
use crate::types::filter::Filter;
use crate::types::nostr::{Event, Template, CLIENT_AUTH};
use crate::util::{normalize_relay_url, validate_relay_url};

mod messaging;
mod resolver;
mod subscription;


pub use subscription::{listener_fn, SubscriptionListener};
use subscription::Subscription;

/// Delay before re-sending subscriptions after answering a relay AUTH
/// challenge, so subscriptions the relay ignored pre-auth come back.
const AUTH_RESUBSCRIBE_DELAY_MS: u64 = 100;

type AckSender = oneshot::Sender<Result<String, ClientError>>;

struct PendingAck {
    tx: AckSender,
    timer: JoinHandle<()>,
}

struct QueuedPublish {
    event: Event,
    tx: AckSender,
}

type ConnectionListener = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

/// Multi-relay Nostr client. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct NostrClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    weak_self: Weak<ClientInner>,
    keys: Arc<Keys>,
    options: ClientOptions,
    transport: Arc<dyn Transport>,

    relays: RwLock<FxHashMap<String, Arc<RelayConnection>>>,
    subscriptions: RwLock<FxHashMap<String, Subscription>>,
    pending_acks: Mutex<FxHashMap<String, PendingAck>>,
    offline_queue: Mutex<VecDeque<QueuedPublish>>,
    subscription_counter: AtomicU64,
    closed: AtomicBool,
    connection_listener: RwLock<Option<ConnectionListener>>,
}

impl NostrClient {
    /// Client over the default WebSocket transport with default options.
    pub fn new(keys: Keys) -> Self {
        Self::with_options(keys, ClientOptions::default())
    }

    pub fn with_options(keys: Keys, options: ClientOptions) -> Self {
        Self::with_transport(keys, options, Arc::new(WebSocketTransport))
    }

    /// Client over an injected transport. This is the seam tests and
    /// embedders with their own socket stack use.
    pub fn with_transport(
        keys: Keys,
        options: ClientOptions,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak| ClientInner {
            weak_self: weak.clone(),
            keys: Arc::new(keys),
            options,
            transport,
            relays: RwLock::new(FxHashMap::default()),
            subscriptions: RwLock::new(FxHashMap::default()),
            pending_acks: Mutex::new(FxHashMap::default()),
            offline_queue: Mutex::new(VecDeque::new()),
            subscription_counter: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            connection_listener: RwLock::new(None),
        });
        Self { inner }
    }

    pub fn keys(&self) -> &Keys {
        &self.inner.keys
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Install the optional connection-lifecycle listener.
    pub fn set_connection_listener(
        &self,
        listener: impl Fn(ConnectionEvent) + Send + Sync + 'static,
    ) {
        *self.inner.connection_listener.write() = Some(Arc::new(listener));
    }

    /// Socket state of one relay, if it is known at all.
    pub fn relay_status(&self, url: &str) -> Option<ConnectionStatus> {
        let normalized = normalize_relay_url(url);
        self.inner
            .relays
            .read()
            .get(&normalized)
            .map(|conn| conn.status())
    }

    /// Connect to a relay, creating its supervisor on first use. At most
    /// one supervisor (and one live socket) exists per URL.
    pub async fn connect(&self, url: &str) -> Result<(), ClientError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }

        let normalized = normalize_relay_url(url);
        validate_relay_url(&normalized)?;

        let conn = {
            let mut relays = inner.relays.write();
            match relays.get(&normalized) {
                Some(existing) => existing.clone(),
                None => {
                    let delegate: Weak<dyn ConnectionDelegate> = inner.weak_self.clone();
                    let conn = RelayConnection::new(
                        normalized.clone(),
                        inner.options.clone(),
                        inner.transport.clone(),
                        delegate,
                    );
                    relays.insert(normalized, conn.clone());
                    conn
                }
            }
        };

        let result = conn.connect().await;
        // A close that landed while the connect was in flight wins.
        if inner.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        result.map_err(Into::into)
    }

    /// Publish a signed event to every open relay.
    ///
    /// With no open socket the event is queued and sent once some relay
    /// connects. Resolution is best-effort: the first relay `OK` settles it,
    /// and an ack timeout settles it optimistically with the event id.
    pub async fn publish(&self, event: Event) -> Result<String, ClientError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }

        let (tx, rx) = oneshot::channel();
        let any_open = inner.relays.read().values().any(|c| c.is_open());
        if any_open {
            inner.broadcast_event(event, tx).await;
        } else {
            let mut queue = inner.offline_queue.lock();
            if inner.closed.load(Ordering::SeqCst) {
                return Err(ClientError::Closed);
            }
            queue.push_back(QueuedPublish { event, tx });
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Closed),
        }
    }

    /// Sign a template with the client's keys and publish it.
    pub async fn sign_and_publish(&self, template: &Template) -> Result<String, ClientError> {
        let event = template.sign(&self.inner.keys)?;
        self.publish(event).await
    }

    /// Register a subscription under a generated `sub_<n>` id and send the
    /// `REQ` to every open relay. Returns the id.
    pub async fn subscribe<L>(&self, filter: Filter, listener: L) -> Result<String, ClientError>
    where
        L: SubscriptionListener + 'static,
    {
        let n = self
            .inner
            .subscription_counter
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        let id = format!("sub_{n}");
        self.subscribe_with_id(&id, filter, listener).await?;
        Ok(id)
    }

    /// Register a subscription under a caller-chosen id. The subscription
    /// survives socket drops: it is re-sent on every reconnect until
    /// [`NostrClient::unsubscribe`].
    pub async fn subscribe_with_id<L>(
        &self,
        id: &str,
        filter: Filter,
        listener: L,
    ) -> Result<(), ClientError>
    where
        L: SubscriptionListener + 'static,
    {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }

        inner.subscriptions.write().insert(
            id.to_string(),
            Subscription {
                filter: filter.clone(),
                listener: Arc::new(listener),
            },
        );

        let frame = ClientMessage::Req {
            subscription_id: id,
            filter: &filter,
        }
        .to_json();
        for conn in inner.open_connections() {
            let _ = conn.send(&frame).await;
        }
        Ok(())
    }

    /// Remove a subscription and tell every open relay. No-op for ids that
    /// are not registered.
    pub async fn unsubscribe(&self, id: &str) {
        let inner = &self.inner;
        if inner.subscriptions.write().remove(id).is_none() {
            return;
        }
        let frame = ClientMessage::Close {
            subscription_id: id,
        }
        .to_json();
        for conn in inner.open_connections() {
            let _ = conn.send(&frame).await;
        }
    }

    /// Shut the client down: fail all outstanding work with `Closed`, close
    /// every socket and drop all state. Idempotent.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let pending: Vec<PendingAck> = {
            let mut acks = inner.pending_acks.lock();
            acks.drain().map(|(_, ack)| ack).collect()
        };
        for ack in pending {
            ack.timer.abort();
            let _ = ack.tx.send(Err(ClientError::Closed));
        }

        let queued: Vec<QueuedPublish> = inner.offline_queue.lock().drain(..).collect();
        for publish in queued {
            let _ = publish.tx.send(Err(ClientError::Closed));
        }

        let connections: Vec<(String, Arc<RelayConnection>)> =
            inner.relays.write().drain().collect();
        for (url, conn) in connections {
            conn.shutdown(1000, "Client disconnected").await;
            inner.emit(ConnectionEvent::Disconnect {
                url,
                reason: "Client disconnected".to_string(),
            });
        }

        inner.subscriptions.write().clear();
        tracing::info!("client closed");
    }
}

impl ClientInner {
    fn open_connections(&self) -> Vec<Arc<RelayConnection>> {
        self.relays
            .read()
            .values()
            .filter(|c| c.is_open())
            .cloned()
            .collect()
    }

    fn emit(&self, event: ConnectionEvent) {
        let listener = self.connection_listener.read().clone();
        if let Some(listener) = listener {
            guard_listener("connection", move || listener(event));
        }
    }

    /// Fan an event out to every open relay and register its pending ack.
    /// The ack is registered first so an instant `OK` cannot race it.
    async fn broadcast_event(self: &Arc<Self>, event: Event, tx: AckSender) {
        let event_id = event.id().to_hex();
        self.register_pending(event_id.clone(), tx);

        let frame = ClientMessage::Event(&event).to_json();
        let mut sent = 0usize;
        for conn in self.open_connections() {
            if conn.send(&frame).await.is_ok() {
                sent += 1;
            }
        }
        if sent == 0 {
            self.complete_pending(&event_id, Err(ClientError::NoConnectedRelay));
        }
    }

    fn register_pending(self: &Arc<Self>, event_id: String, tx: AckSender) {
        let weak = Arc::downgrade(self);
        let timeout_ms = self.options.publish_ack_timeout_ms;
        let timer_id = event_id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            if let Some(inner) = weak.upgrade() {
                // Some relays never ack; resolve optimistically.
                inner.complete_pending(&timer_id, Ok(timer_id.clone()));
            }
        });
        self.pending_acks
            .lock()
            .insert(event_id, PendingAck { tx, timer });
    }

    /// Settle a pending ack. Exactly one settlement wins; later `OK`s for
    /// the same event id find no entry and are ignored.
    fn complete_pending(&self, event_id: &str, result: Result<String, ClientError>) {
        let entry = self.pending_acks.lock().remove(event_id);
        if let Some(ack) = entry {
            ack.timer.abort();
            let _ = ack.tx.send(result);
        }
    }

    /// Re-send every registered subscription on one connection.
    async fn resend_subscriptions(&self, conn: &Arc<RelayConnection>) {
        let subs: Vec<(String, Filter)> = self
            .subscriptions
            .read()
            .iter()
            .map(|(id, sub)| (id.clone(), sub.filter.clone()))
            .collect();
        for (id, filter) in subs {
            let frame = ClientMessage::Req {
                subscription_id: &id,
                filter: &filter,
            }
            .to_json();
            let _ = conn.send(&frame).await;
        }
    }

    /// Drain the offline queue in insertion order onto the now-open relays.
    async fn drain_offline_queue(self: &Arc<Self>) {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            let next = self.offline_queue.lock().pop_front();
            let Some(queued) = next else { return };
            self.broadcast_event(queued.event, queued.tx).await;
        }
    }

    /// Inbound frame dispatcher: decode the tagged union, act, and drop
    /// anything that does not decode.
    fn dispatch(self: &Arc<Self>, url: &str, raw: &str) {
        let Some(message) = RelayMessage::from_json(raw) else {
            tracing::debug!(relay = %url, "dropping malformed frame");
            return;
        };

        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                let listener = self
                    .subscriptions
                    .read()
                    .get(&subscription_id)
                    .map(|sub| sub.listener.clone());
                if let Some(listener) = listener {
                    guard_listener("on_event", || listener.on_event(&subscription_id, &event));
                }
            }
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => {
                let result = if accepted {
                    Ok(event_id.clone())
                } else {
                    Err(ClientError::EventRejected(message))
                };
                self.complete_pending(&event_id, result);
            }
            RelayMessage::Eose { subscription_id } => {
                let listener = self
                    .subscriptions
                    .read()
                    .get(&subscription_id)
                    .map(|sub| sub.listener.clone());
                if let Some(listener) = listener {
                    guard_listener("on_end_of_stored_events", || {
                        listener.on_end_of_stored_events(&subscription_id)
                    });
                }
            }
            RelayMessage::Notice { message } => {
                tracing::warn!(relay = %url, notice = %message, "relay notice");
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                let listener = self
                    .subscriptions
                    .read()
                    .get(&subscription_id)
                    .map(|sub| sub.listener.clone());
                if let Some(listener) = listener {
                    guard_listener("on_error", || {
                        listener.on_error(
                            &subscription_id,
                            &format!("Subscription closed: {message}"),
                        )
                    });
                }
            }
            RelayMessage::Auth { challenge } => {
                self.handle_auth(url, challenge);
            }
        }
    }

    /// Answer a NIP-42 challenge, then re-establish subscriptions the relay
    /// may have ignored before authentication.
    fn handle_auth(self: &Arc<Self>, url: &str, challenge: String) {
        let inner = Arc::clone(self);
        let url = url.to_string();
        tokio::spawn(async move {
            let conn = inner.relays.read().get(&url).cloned();
            let Some(conn) = conn else { return };

            let template = Template::new(
                CLIENT_AUTH,
                "",
                vec![
                    vec!["relay".to_string(), url.clone()],
                    vec!["challenge".to_string(), challenge],
                ],
            );
            let auth_event = match template.sign(&inner.keys) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(relay = %url, error = %e, "auth signing failed");
                    return;
                }
            };
            let frame = ClientMessage::Auth(&auth_event).to_json();
            if conn.send(&frame).await.is_err() {
                return;
            }

            tokio::time::sleep(Duration::from_millis(AUTH_RESUBSCRIBE_DELAY_MS)).await;
            inner.resend_subscriptions(&conn).await;
        });
    }
}

impl ConnectionDelegate for ClientInner {
    fn on_open(&self, url: &str, reconnected: bool) {
        let Some(inner) = self.weak_self.upgrade() else {
            return;
        };
        inner.emit(if reconnected {
            ConnectionEvent::Reconnected {
                url: url.to_string(),
            }
        } else {
            ConnectionEvent::Connect {
                url: url.to_string(),
            }
        });

        let url = url.to_string();
        tokio::spawn(async move {
            let conn = inner.relays.read().get(&url).cloned();
            let Some(conn) = conn else { return };
            inner.resend_subscriptions(&conn).await;
            inner.drain_offline_queue().await;
        });
    }

    fn on_frame(&self, url: &str, raw: &str) {
        let Some(inner) = self.weak_self.upgrade() else {
            return;
        };
        inner.dispatch(url, raw);
    }

    fn on_disconnect(&self, url: &str, reason: &str) {
        let Some(inner) = self.weak_self.upgrade() else {
            return;
        };
        inner.emit(ConnectionEvent::Disconnect {
            url: url.to_string(),
            reason: reason.to_string(),
        });
    }

    fn on_reconnecting(&self, url: &str, attempt: u32) {
        let Some(inner) = self.weak_self.upgrade() else {
            return;
        };
        inner.emit(ConnectionEvent::Reconnecting {
            url: url.to_string(),
            attempt,
        });
    }
}

/// Listener callbacks never take the client down: panics are caught and
/// logged at debug.
fn guard_listener(what: &str, f: impl FnOnce()) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
        tracing::debug!(callback = what, "listener panicked, ignoring");
    }
}
