// ── Connection session ──
//
// Per-device connection state machine:
//
//   Unresolved → Resolving → Connecting → Subscribing → Connected
//                    │            │             │            │
//                    ▼            └──────┬──────┘            ▼
//                 Aborted           Disconnected ◄───── (link drop)
//
// Resolution goes through the discovery cache only; transport
// establishment goes through the injected `ReliableConnector`.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures_core::Stream;
use futures_util::{StreamExt, future};
use serde::Serialize;
use strum::{AsRefStr, Display};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classify::classify_failure;
use crate::config::MADOKA_NOTIFY_CHARACTERISTIC;
use crate::error::CoreError;
use crate::model::{DeviceAddress, DeviceIdentity, Notification};
use crate::resolver::AddressResolver;
use crate::transport::{
    Connection, DisconnectCallback, NotificationStream, ReliableConnector, TransportError,
};

const NOTIFICATION_CHANNEL_SIZE: usize = 64;

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Unresolved,
    Resolving,
    Connecting,
    Subscribing,
    Connected,
    Disconnected,
    /// Terminal: the device is not in the discovery cache.
    Aborted,
}

impl ConnectionState {
    /// An attempt is currently running.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Resolving | Self::Connecting | Self::Subscribing)
    }
}

// ── Handle slot ──────────────────────────────────────────────────

/// What the session currently holds for its peripheral.
enum HandleSlot {
    /// Nothing resolved yet.
    Empty,
    /// Identity resolved from the cache, no transport link.
    Pending(Arc<DeviceIdentity>),
    /// Transport link established.
    Live {
        identity: Arc<DeviceIdentity>,
        connection: Arc<dyn Connection>,
    },
}

impl HandleSlot {
    fn identity(&self) -> Option<&Arc<DeviceIdentity>> {
        match self {
            Self::Empty => None,
            Self::Pending(identity) | Self::Live { identity, .. } => Some(identity),
        }
    }
}

// ── SessionOptions ───────────────────────────────────────────────

/// Per-session settings, usually derived from
/// [`FleetConfig::session_options`](crate::FleetConfig::session_options).
///
/// The adapter is not repeated here: a session only connects identities the
/// fleet's scan found, and those carry the adapter that saw them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub reconnect: bool,
    pub notify_characteristic: Uuid,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reconnect: true,
            notify_characteristic: MADOKA_NOTIFY_CHARACTERISTIC,
        }
    }
}

// ── ConnectionSession ────────────────────────────────────────────

/// Owns one peripheral's connection lifecycle.
///
/// Cheaply cloneable via `Arc<SessionInner>`; clones share state.
#[derive(Clone)]
pub struct ConnectionSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    address: DeviceAddress,
    options: SessionOptions,
    resolver: AddressResolver,
    connector: Arc<dyn ReliableConnector>,
    state: watch::Sender<ConnectionState>,
    slot: Mutex<HandleSlot>,
    last_failure: watch::Sender<Option<String>>,
    notify_tx: broadcast::Sender<Notification>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
    closed: CancellationToken,
}

impl ConnectionSession {
    /// Create a session in the `Unresolved` state. Does NOT connect.
    pub fn new(
        address: DeviceAddress,
        options: SessionOptions,
        resolver: AddressResolver,
        connector: Arc<dyn ReliableConnector>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Unresolved);
        let (last_failure, _) = watch::channel(None);
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_CHANNEL_SIZE);

        Self {
            inner: Arc::new(SessionInner {
                address,
                options,
                resolver,
                connector,
                state,
                slot: Mutex::new(HandleSlot::Empty),
                last_failure,
                notify_tx,
                forwarders: Mutex::new(Vec::new()),
                closed: CancellationToken::new(),
            }),
        }
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.inner.address
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    pub fn reconnect_enabled(&self) -> bool {
        self.inner.options.reconnect
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to values pushed by the peripheral.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.inner.notify_tx.subscribe()
    }

    /// Notifications as a stream; lagged values are skipped.
    pub fn notification_stream(&self) -> impl Stream<Item = Notification> + Send + 'static {
        BroadcastStream::new(self.notifications()).filter_map(|item| future::ready(item.ok()))
    }

    /// Message of the most recent connect/subscribe failure, cleared on success.
    pub fn last_failure(&self) -> Option<String> {
        self.inner.last_failure.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// The live transport handle, if connected.
    pub async fn connection(&self) -> Option<Arc<dyn Connection>> {
        match &*self.inner.slot.lock().await {
            HandleSlot::Live { connection, .. } => Some(Arc::clone(connection)),
            HandleSlot::Empty | HandleSlot::Pending(_) => None,
        }
    }

    /// The resolved identity, if resolution has happened.
    pub async fn identity(&self) -> Option<Arc<DeviceIdentity>> {
        self.inner.slot.lock().await.identity().cloned()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Resolve the device through the discovery cache without connecting.
    ///
    /// A miss moves the session to [`Aborted`](ConnectionState::Aborted).
    pub async fn resolve(&self) -> Result<Arc<DeviceIdentity>, CoreError> {
        self.ensure_usable()?;
        let mut slot = self.inner.slot.lock().await;
        if let Some(identity) = slot.identity() {
            return Ok(Arc::clone(identity));
        }
        let identity = self.resolve_identity()?;
        *slot = HandleSlot::Pending(Arc::clone(&identity));
        self.inner.state.send_replace(ConnectionState::Disconnected);
        Ok(identity)
    }

    /// Connect and subscribe to notifications.
    ///
    /// No-op when already connected with a live handle. Failures are
    /// logged; with reconnect enabled they are swallowed and the session
    /// rests in `Disconnected`, otherwise they are returned.
    #[tracing::instrument(level = "debug", skip(self), fields(address = %self.inner.address))]
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.ensure_usable()?;
        let mut slot = self.inner.slot.lock().await;

        if let HandleSlot::Live { connection, .. } = &*slot {
            if self.state() == ConnectionState::Connected && connection.is_connected().await {
                debug!("already connected");
                return Ok(());
            }
        }

        let identity = if let Some(identity) = slot.identity() {
            Arc::clone(identity)
        } else {
            let identity = self.resolve_identity()?;
            *slot = HandleSlot::Pending(Arc::clone(&identity));
            identity
        };

        // Drop any stale link before asking for a fresh one.
        if let HandleSlot::Live { connection, .. } =
            std::mem::replace(&mut *slot, HandleSlot::Pending(Arc::clone(&identity)))
        {
            self.stop_forwarders().await;
            release(&connection, "stale").await;
        }

        let connection = match self.establish(&identity).await {
            Ok(connection) => connection,
            Err(err) => return self.fail(&err),
        };
        *slot = HandleSlot::Live {
            identity: Arc::clone(&identity),
            connection: Arc::clone(&connection),
        };

        if let Err(err) = self.subscribe(connection.as_ref()).await {
            *slot = HandleSlot::Pending(identity);
            release(&connection, "unsubscribed").await;
            return self.fail(&err);
        }

        if self.is_closed() {
            *slot = HandleSlot::Pending(identity);
            self.stop_forwarders().await;
            release(&connection, "closed").await;
            return Err(self.closed_error());
        }

        // A drop reported while subscribing has already moved the state on.
        let link_up = connection.is_connected().await;
        if !(link_up && self.promote_to_connected()) {
            *slot = HandleSlot::Pending(identity);
            self.stop_forwarders().await;
            release(&connection, "dropped").await;
            return self.fail(&TransportError::new(format!(
                "{} disconnected while subscribing",
                self.inner.address
            )));
        }

        self.inner.last_failure.send_replace(None);
        info!(name = %identity.display_name, "connected");
        Ok(())
    }

    /// [`connect()`](Self::connect) bounded by `limit`.
    ///
    /// On timeout the in-flight attempt is dropped and the session falls
    /// back to a resting state, eligible for a later retry.
    pub async fn connect_within(&self, limit: Duration) -> Result<(), CoreError> {
        if let Ok(result) = tokio::time::timeout(limit, self.connect()).await {
            return result;
        }
        self.abandon_attempt();
        Err(CoreError::Timeout {
            address: self.inner.address.clone(),
            timeout: limit,
        })
    }

    /// Release the transport handle and refuse further connects.
    ///
    /// Safe to call while an attempt is in flight: the attempt is
    /// cancelled and returns [`CoreError::SessionClosed`].
    #[tracing::instrument(level = "debug", skip(self), fields(address = %self.inner.address))]
    pub async fn close(&self) {
        self.inner.closed.cancel();
        self.stop_forwarders().await;

        let mut slot = self.inner.slot.lock().await;
        if let HandleSlot::Live {
            identity,
            connection,
        } = &*slot
        {
            let (identity, connection) = (Arc::clone(identity), Arc::clone(connection));
            if let Err(e) = connection.disconnect().await {
                warn!(error = %e, "disconnect failed (non-fatal)");
            }
            *slot = HandleSlot::Pending(identity);
        }
        drop(slot);

        self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected || state.is_in_flight() {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        debug!("session closed");
    }

    // ── Internals ────────────────────────────────────────────────

    fn ensure_usable(&self) -> Result<(), CoreError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        if self.state() == ConnectionState::Aborted {
            return Err(CoreError::SessionAborted {
                address: self.inner.address.clone(),
            });
        }
        Ok(())
    }

    fn closed_error(&self) -> CoreError {
        CoreError::SessionClosed {
            address: self.inner.address.clone(),
        }
    }

    fn resolve_identity(&self) -> Result<Arc<DeviceIdentity>, CoreError> {
        let inner = &self.inner;
        inner.state.send_replace(ConnectionState::Resolving);

        match inner.resolver.resolve(&inner.address) {
            Ok(identity) => {
                debug!(name = %identity.display_name, "resolved from discovery cache");
                Ok(identity)
            }
            Err(err) => {
                inner.state.send_replace(ConnectionState::Aborted);
                warn!(address = %inner.address, "device not in discovery cache; aborting session");
                Err(err)
            }
        }
    }

    async fn establish(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        let inner = &self.inner;
        inner.state.send_replace(ConnectionState::Connecting);

        let on_disconnect = disconnect_callback(Arc::downgrade(inner));
        let connection = tokio::select! {
            biased;
            () = inner.closed.cancelled() => {
                return Err(TransportError::new("session closed while connecting"));
            }
            result = inner.connector.establish(identity, on_disconnect) => result?,
        };

        if !connection.is_connected().await {
            return Err(TransportError::new(format!(
                "Failed to connect to {}",
                inner.address
            )));
        }
        Ok(connection)
    }

    async fn subscribe(&self, connection: &dyn Connection) -> Result<(), TransportError> {
        let inner = &self.inner;
        inner.state.send_replace(ConnectionState::Subscribing);

        let stream = tokio::select! {
            biased;
            () = inner.closed.cancelled() => {
                return Err(TransportError::new("session closed while subscribing"));
            }
            result = connection.subscribe(inner.options.notify_characteristic) => result?,
        };
        self.spawn_forwarder(stream).await;
        Ok(())
    }

    /// `Subscribing -> Connected`, unless something else moved the state.
    fn promote_to_connected(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Subscribing {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        })
    }

    /// Record a failed attempt and apply the reconnect policy.
    fn fail(&self, err: &TransportError) -> Result<(), CoreError> {
        let inner = &self.inner;
        inner.state.send_replace(ConnectionState::Disconnected);

        if self.is_closed() {
            return Err(self.closed_error());
        }

        let message = err.message().to_owned();
        inner.last_failure.send_replace(Some(message.clone()));

        // Without reconnect the caller owns the failure and reports it.
        if !inner.options.reconnect {
            debug!(error = %message, "connection failed; propagating");
            return Err(CoreError::Transport {
                address: inner.address.clone(),
                message,
            });
        }

        if classify_failure(&message).is_transient() {
            debug!(error = %message, "transient connection failure; awaiting retry");
        } else {
            error!(error = %message, "connection failed; awaiting retry");
        }
        Ok(())
    }

    /// Move an abandoned attempt's state back to rest.
    fn abandon_attempt(&self) {
        self.inner.state.send_if_modified(|state| match *state {
            ConnectionState::Resolving => {
                *state = ConnectionState::Unresolved;
                true
            }
            ConnectionState::Connecting | ConnectionState::Subscribing => {
                *state = ConnectionState::Disconnected;
                true
            }
            _ => false,
        });
    }

    async fn spawn_forwarder(&self, mut stream: NotificationStream) {
        let tx = self.inner.notify_tx.clone();
        let address = self.inner.address.clone();
        let cancel = self.inner.closed.clone();

        // Lock first: a cancelled caller must not leave an untracked task.
        let mut forwarders = self.inner.forwarders.lock().await;
        forwarders.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    next = stream.next() => {
                        let Some(value) = next else { break };
                        // No subscribers is fine.
                        let _ = tx.send(Notification {
                            address: address.clone(),
                            value,
                            received_at: Utc::now(),
                        });
                    }
                }
            }
        }));
    }

    async fn stop_forwarders(&self) {
        let mut forwarders = self.inner.forwarders.lock().await;
        for handle in forwarders.drain(..) {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("address", &self.inner.address)
            .field("state", &self.state())
            .field("reconnect", &self.inner.options.reconnect)
            .finish_non_exhaustive()
    }
}

// ── Helpers ──────────────────────────────────────────────────────

/// Callback handed to the connector; marks the session disconnected.
fn disconnect_callback(inner: Weak<SessionInner>) -> DisconnectCallback {
    Arc::new(move || {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let changed = inner.state.send_if_modified(|state| {
            if matches!(
                *state,
                ConnectionState::Connected | ConnectionState::Subscribing
            ) {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        if changed {
            info!(address = %inner.address, "peripheral disconnected");
        }
    })
}

async fn release(connection: &Arc<dyn Connection>, why: &str) {
    if let Err(e) = connection.disconnect().await {
        debug!(error = %e, why, "releasing connection failed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::cache::DeviceCache;
    use crate::model::PeripheralHandle;

    const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

    /// How a [`TestLink`] answers `subscribe`.
    #[derive(Clone)]
    enum OnSubscribe {
        Stream,
        Fail(String),
        /// The link drops mid-subscribe; the call itself still succeeds.
        DropLink,
        Hang,
    }

    struct TestLink {
        connected: AtomicBool,
        disconnects: AtomicUsize,
        on_subscribe: OnSubscribe,
        on_disconnect: DisconnectCallback,
        values: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    }

    #[async_trait]
    impl Connection for TestLink {
        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn subscribe(&self, _characteristic: Uuid) -> Result<NotificationStream, TransportError> {
            match &self.on_subscribe {
                OnSubscribe::Stream => {}
                OnSubscribe::Fail(message) => return Err(TransportError::new(message.clone())),
                OnSubscribe::DropLink => {
                    self.connected.store(false, Ordering::SeqCst);
                    (self.on_disconnect)();
                }
                OnSubscribe::Hang => std::future::pending::<()>().await,
            }
            let rx = self.values.lock().unwrap().take().unwrap();
            Ok(Box::pin(UnboundedReceiverStream::new(rx)))
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            self.connected.store(false, Ordering::SeqCst);
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct TestConnector {
        calls: AtomicUsize,
        error: Option<String>,
        on_subscribe: OnSubscribe,
        link: std::sync::Mutex<Option<Arc<TestLink>>>,
        values_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
        on_disconnect: std::sync::Mutex<Option<DisconnectCallback>>,
    }

    impl TestConnector {
        fn ok() -> Arc<Self> {
            Arc::new(Self::with(None, OnSubscribe::Stream))
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self::with(Some(message.into()), OnSubscribe::Stream))
        }

        fn subscribing(on_subscribe: OnSubscribe) -> Arc<Self> {
            Arc::new(Self::with(None, on_subscribe))
        }

        fn with(error: Option<String>, on_subscribe: OnSubscribe) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                error,
                on_subscribe,
                link: std::sync::Mutex::new(None),
                values_tx: std::sync::Mutex::new(None),
                on_disconnect: std::sync::Mutex::new(None),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn link(&self) -> Arc<TestLink> {
            self.link.lock().unwrap().clone().unwrap()
        }

        fn push(&self, value: &'static [u8]) {
            assert!(self.try_push(value), "notification stream was dropped");
        }

        /// `false` once nothing holds the link's notification stream.
        fn try_push(&self, value: &'static [u8]) -> bool {
            let guard = self.values_tx.lock().unwrap();
            guard.as_ref().unwrap().send(Bytes::from_static(value)).is_ok()
        }

        fn drop_link(&self) {
            self.link().connected.store(false, Ordering::SeqCst);
            let callback = self.on_disconnect.lock().unwrap().clone().unwrap();
            callback();
        }
    }

    #[async_trait]
    impl ReliableConnector for TestConnector {
        async fn establish(
            &self,
            _identity: &DeviceIdentity,
            on_disconnect: DisconnectCallback,
        ) -> Result<Arc<dyn Connection>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.error {
                return Err(TransportError::new(message.clone()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            let link = Arc::new(TestLink {
                connected: AtomicBool::new(true),
                disconnects: AtomicUsize::new(0),
                on_subscribe: self.on_subscribe.clone(),
                on_disconnect: Arc::clone(&on_disconnect),
                values: std::sync::Mutex::new(Some(rx)),
            });
            *self.link.lock().unwrap() = Some(Arc::clone(&link));
            *self.values_tx.lock().unwrap() = Some(tx);
            *self.on_disconnect.lock().unwrap() = Some(on_disconnect);
            Ok(link)
        }
    }

    fn session(connector: Arc<TestConnector>, cached: bool, reconnect: bool) -> ConnectionSession {
        let cache = Arc::new(DeviceCache::new());
        if cached {
            cache.apply_scan([DeviceIdentity::new(ADDRESS, "BRC1H", PeripheralHandle::empty())]);
        }
        let options = SessionOptions {
            reconnect,
            ..SessionOptions::default()
        };
        ConnectionSession::new(
            DeviceAddress::new(ADDRESS.to_lowercase()),
            options,
            AddressResolver::new(cache),
            connector,
        )
    }

    #[tokio::test]
    async fn connect_reaches_connected_and_is_idempotent() {
        let connector = TestConnector::ok();
        let session = session(Arc::clone(&connector), true, true);
        assert_eq!(session.state(), ConnectionState::Unresolved);

        assert_ok!(session.connect().await);
        assert_eq!(session.state(), ConnectionState::Connected);
        let first = session.connection().await.unwrap();

        assert_ok!(session.connect().await);
        let second = session.connection().await.unwrap();

        assert_eq!(connector.calls(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn missing_device_aborts_without_connecting() {
        let connector = TestConnector::ok();
        let session = session(Arc::clone(&connector), false, true);

        let err = assert_err!(session.connect().await);
        assert!(matches!(err, CoreError::DeviceNotFound { .. }));
        assert_eq!(session.state(), ConnectionState::Aborted);
        assert_eq!(connector.calls(), 0);

        // Aborted is terminal.
        let err = assert_err!(session.connect().await);
        assert!(matches!(err, CoreError::SessionAborted { .. }));
    }

    #[tokio::test]
    async fn resolve_binds_identity_without_connecting() {
        let connector = TestConnector::ok();
        let session = session(Arc::clone(&connector), true, true);

        let identity = session.resolve().await.unwrap();
        assert_eq!(identity.display_name, "BRC1H");
        assert_eq!(connector.calls(), 0);
        assert!(session.connection().await.is_none());
        assert!(session.identity().await.is_some());
    }

    #[tokio::test]
    async fn failure_with_reconnect_is_swallowed() {
        let connector = TestConnector::failing("Software caused connection abort");
        let session = session(Arc::clone(&connector), true, true);

        session.connect().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(
            session.last_failure().as_deref(),
            Some("Software caused connection abort")
        );
        assert!(session.identity().await.is_some());
    }

    #[tokio::test]
    async fn failure_without_reconnect_is_raised() {
        let connector = TestConnector::failing("le-connection-abort-by-local");
        let session = session(Arc::clone(&connector), true, false);

        let err = session.connect().await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Transport { ref message, .. } if message == "le-connection-abort-by-local"
        ));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn subscribe_failure_counts_as_connect_failure_and_releases_link() {
        let connector =
            TestConnector::subscribing(OnSubscribe::Fail("characteristic not found".into()));
        let session = session(Arc::clone(&connector), true, false);

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, CoreError::Transport { .. }));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.connection().await.is_none());
        assert_eq!(connector.link().disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn link_drop_while_subscribing_is_not_reported_connected() {
        let connector = TestConnector::subscribing(OnSubscribe::DropLink);
        let session = session(Arc::clone(&connector), true, false);

        let err = assert_err!(session.connect().await);

        assert!(matches!(err, CoreError::Transport { .. }));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.connection().await.is_none());
        assert_eq!(connector.link().disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn link_drop_while_subscribing_stays_retryable_with_reconnect() {
        let connector = TestConnector::subscribing(OnSubscribe::DropLink);
        let session = session(Arc::clone(&connector), true, true);

        assert_ok!(session.connect().await);

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(
            session
                .last_failure()
                .is_some_and(|m| m.contains("disconnected while subscribing"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_interrupts_a_hung_subscribe() {
        let connector = TestConnector::subscribing(OnSubscribe::Hang);
        let session = session(Arc::clone(&connector), true, true);

        let attempt = tokio::spawn({
            let session = session.clone();
            async move { session.connect().await }
        });
        let mut states = session.state_changes();
        states
            .wait_for(|s| *s == ConnectionState::Subscribing)
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), session.close())
            .await
            .expect("close blocked behind subscribe");

        let err = attempt.await.unwrap().unwrap_err();
        assert!(matches!(err, CoreError::SessionClosed { .. }));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(connector.link().disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_dropped_before_forwarding_leaves_no_stray_task() {
        let connector = TestConnector::ok();
        let session = session(Arc::clone(&connector), true, true);

        let forwarders = session.inner.forwarders.lock().await;
        let err = session
            .connect_within(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout { .. }));
        drop(forwarders);
        tokio::task::yield_now().await;

        assert!(session.inner.forwarders.lock().await.is_empty());
        assert!(!connector.try_push(b"\x01"));
    }

    #[tokio::test]
    async fn notifications_are_forwarded() {
        let connector = TestConnector::ok();
        let session = session(Arc::clone(&connector), true, true);
        let mut rx = session.notifications();

        session.connect().await.unwrap();
        connector.push(b"\x00\x01\x02");

        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.address.as_str(), ADDRESS);
        assert_eq!(&notification.value[..], b"\x00\x01\x02");
    }

    #[tokio::test]
    async fn link_drop_then_reconnect_establishes_again() {
        let connector = TestConnector::ok();
        let session = session(Arc::clone(&connector), true, true);

        session.connect().await.unwrap();
        let first_link = connector.link();
        connector.drop_link();
        assert_eq!(session.state(), ConnectionState::Disconnected);

        session.connect().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(connector.calls(), 2);
        // The stale handle was released before the new one was requested.
        assert_eq!(first_link.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_releases_handle_and_refuses_connect() {
        let connector = TestConnector::ok();
        let session = session(Arc::clone(&connector), true, true);
        session.connect().await.unwrap();

        session.close().await;

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.connection().await.is_none());
        assert_eq!(connector.link().disconnects.load(Ordering::SeqCst), 1);
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, CoreError::SessionClosed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_within_times_out_and_resets_state() {
        struct Hang;

        #[async_trait]
        impl ReliableConnector for Hang {
            async fn establish(
                &self,
                _identity: &DeviceIdentity,
                _on_disconnect: DisconnectCallback,
            ) -> Result<Arc<dyn Connection>, TransportError> {
                std::future::pending().await
            }
        }

        let cache = Arc::new(DeviceCache::new());
        cache.apply_scan([DeviceIdentity::new(ADDRESS, "BRC1H", PeripheralHandle::empty())]);
        let session = ConnectionSession::new(
            DeviceAddress::new(ADDRESS),
            SessionOptions::default(),
            AddressResolver::new(cache),
            Arc::new(Hang),
        );

        let err = session
            .connect_within(Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Timeout { timeout, .. } if timeout == Duration::from_secs(5)));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
}
