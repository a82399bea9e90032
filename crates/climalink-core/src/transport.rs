// ── Transport strategies ──
//
// The seams to the BLE stack. The core never talks to the radio itself:
// discovery, connection establishment and force-disconnect are injected
// behind these traits and chosen at construction time.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{DeviceAddress, DeviceIdentity};

/// Invoked by the transport when an established link drops.
pub type DisconnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Values pushed on a subscribed characteristic.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Failure reported by a transport strategy.
///
/// Carries the stack's message verbatim: failure classification matches on
/// it, see [`classify_failure`](crate::classify::classify_failure).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for TransportError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for TransportError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

// ── Strategy traits ──────────────────────────────────────────────────

/// Populates the discovery cache.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Scan on `adapter` for at most `timeout` and return every peripheral seen.
    async fn scan(
        &self,
        adapter: &str,
        timeout: Duration,
    ) -> Result<Vec<DeviceIdentity>, TransportError>;
}

/// Retrying, service-cache-aware connection establishment.
///
/// Implementations own their backoff policy; callers only see the final
/// handle or the final failure.
#[async_trait]
pub trait ReliableConnector: Send + Sync {
    async fn establish(
        &self,
        identity: &DeviceIdentity,
        on_disconnect: DisconnectCallback,
    ) -> Result<Arc<dyn Connection>, TransportError>;
}

/// A live link to one peripheral.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn is_connected(&self) -> bool;

    /// Enable notifications on `characteristic` and return the value stream.
    async fn subscribe(&self, characteristic: Uuid) -> Result<NotificationStream, TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Tears down a connection some other process left open.
#[async_trait]
pub trait ForceDisconnect: Send + Sync {
    async fn force_disconnect(
        &self,
        adapter: &str,
        address: &DeviceAddress,
    ) -> Result<(), TransportError>;
}

// ── BleStack ─────────────────────────────────────────────────────────

/// The set of strategies a [`FleetOrchestrator`](crate::FleetOrchestrator)
/// is built with.
#[derive(Clone)]
pub struct BleStack {
    pub discovery: Arc<dyn Discovery>,
    pub connector: Arc<dyn ReliableConnector>,
    pub force_disconnect: Option<Arc<dyn ForceDisconnect>>,
}

impl BleStack {
    pub fn new(discovery: Arc<dyn Discovery>, connector: Arc<dyn ReliableConnector>) -> Self {
        Self {
            discovery,
            connector,
            force_disconnect: None,
        }
    }

    pub fn with_force_disconnect(mut self, force_disconnect: Arc<dyn ForceDisconnect>) -> Self {
        self.force_disconnect = Some(force_disconnect);
        self
    }
}

impl std::fmt::Debug for BleStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleStack")
            .field("force_disconnect", &self.force_disconnect.is_some())
            .finish_non_exhaustive()
    }
}
