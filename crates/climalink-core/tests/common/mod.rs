//! Scripted fakes for the transport strategy traits.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use climalink_core::{
    BleStack, Connection, DeviceAddress, DeviceIdentity, DisconnectCallback, Discovery,
    ForceDisconnect, NotificationStream, PeripheralHandle, ReliableConnector, TransportError,
};

pub fn identity(address: &str) -> DeviceIdentity {
    DeviceIdentity::new(address, format!("BRC1H {address}"), PeripheralHandle::empty())
}

// ── Discovery ────────────────────────────────────────────────────

/// Returns a fixed device list, or an error.
pub struct FakeDiscovery {
    found: Vec<&'static str>,
    error: Option<String>,
    pub scans: AtomicUsize,
}

impl FakeDiscovery {
    pub fn finding(found: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            found: found.to_vec(),
            error: None,
            scans: AtomicUsize::new(0),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            found: Vec::new(),
            error: Some(message.into()),
            scans: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Discovery for FakeDiscovery {
    async fn scan(
        &self,
        _adapter: &str,
        _timeout: Duration,
    ) -> Result<Vec<DeviceIdentity>, TransportError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.error {
            return Err(TransportError::new(message.clone()));
        }
        Ok(self.found.iter().map(|a| identity(a)).collect())
    }
}

// ── Connector ────────────────────────────────────────────────────

/// How the fake connector answers for one device.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    Fail(&'static str),
    FailSubscribe(&'static str),
    Hang,
}

/// A link handed out by [`FakeConnector`].
pub struct FakeLink {
    pub connected: AtomicBool,
    pub disconnects: AtomicUsize,
    subscribe_error: Option<&'static str>,
    values: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    sender: mpsc::UnboundedSender<Bytes>,
    on_disconnect: DisconnectCallback,
}

impl FakeLink {
    /// Push a notification value from the peripheral.
    pub fn notify(&self, value: &'static [u8]) {
        let _ = self.sender.send(Bytes::from_static(value));
    }

    /// Simulate the peripheral going out of range.
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        (self.on_disconnect)();
    }
}

#[async_trait]
impl Connection for FakeLink {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn subscribe(&self, _characteristic: Uuid) -> Result<NotificationStream, TransportError> {
        if let Some(message) = self.subscribe_error {
            return Err(TransportError::new(message));
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

/// Scripted per address; unscripted addresses succeed.
#[derive(Default)]
pub struct FakeConnector {
    scripts: Mutex<HashMap<DeviceAddress, Script>>,
    calls: Mutex<HashMap<DeviceAddress, usize>>,
    links: Mutex<HashMap<DeviceAddress, Arc<FakeLink>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, address: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(DeviceAddress::new(address), script);
    }

    pub fn calls(&self, address: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&DeviceAddress::new(address))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Most recent link handed out for `address`.
    pub fn link(&self, address: &str) -> Arc<FakeLink> {
        Arc::clone(&self.links.lock().unwrap()[&DeviceAddress::new(address)])
    }
}

#[async_trait]
impl ReliableConnector for FakeConnector {
    async fn establish(
        &self,
        identity: &DeviceIdentity,
        on_disconnect: DisconnectCallback,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(identity.address.clone())
            .or_default() += 1;

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&identity.address)
            .cloned()
            .unwrap_or(Script::Succeed);

        let subscribe_error = match script {
            Script::Succeed => None,
            Script::FailSubscribe(message) => Some(message),
            Script::Fail(message) => return Err(TransportError::new(message)),
            Script::Hang => std::future::pending().await,
        };

        let (sender, rx) = mpsc::unbounded_channel();
        let link = Arc::new(FakeLink {
            connected: AtomicBool::new(true),
            disconnects: AtomicUsize::new(0),
            subscribe_error,
            values: Mutex::new(Some(rx)),
            sender,
            on_disconnect,
        });
        self.links
            .lock()
            .unwrap()
            .insert(identity.address.clone(), Arc::clone(&link));
        Ok(link)
    }
}

// ── Force disconnect ─────────────────────────────────────────────

#[derive(Default)]
pub struct FakeForceDisconnect {
    pub calls: Mutex<Vec<DeviceAddress>>,
    pub fail: bool,
}

#[async_trait]
impl ForceDisconnect for FakeForceDisconnect {
    async fn force_disconnect(
        &self,
        _adapter: &str,
        address: &DeviceAddress,
    ) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(address.clone());
        if self.fail {
            return Err(TransportError::new("org.bluez.Error.NotConnected"));
        }
        Ok(())
    }
}

pub fn stack(discovery: Arc<FakeDiscovery>, connector: Arc<FakeConnector>) -> BleStack {
    BleStack::new(discovery, connector)
}

// ── Log capture ──────────────────────────────────────────────────

/// Collects formatted `tracing` output for assertions on log levels.
#[derive(Clone, Default)]
pub struct LogCapture {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Route every event on this thread, down to TRACE, into the capture.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(self.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// Captured lines at `level` (`"ERROR"`, `"DEBUG"`, ...) that mention `needle`.
    pub fn lines_at(&self, level: &str, needle: &str) -> Vec<String> {
        let bytes = self.bytes.lock().unwrap();
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|line| line.split_whitespace().any(|word| word == level))
            .filter(|line| line.contains(needle))
            .map(str::to_owned)
            .collect()
    }
}

pub struct LogCaptureWriter {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for LogCaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = LogCaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogCaptureWriter {
            bytes: Arc::clone(&self.bytes),
        }
    }
}
