// ── btleplug backend ──
//
// Discovery, reliable connect and force-disconnect on top of the OS
// Bluetooth stack (BlueZ, CoreBluetooth, WinRT) via `btleplug`.

use std::sync::Arc;
use std::time::Duration;

use ::btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
};
use ::btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, future};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{DeviceAddress, DeviceIdentity, PeripheralHandle};
use crate::transport::{
    BleStack, Connection, DisconnectCallback, Discovery, ForceDisconnect, NotificationStream,
    ReliableConnector, TransportError,
};

const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

impl From<::btleplug::Error> for TransportError {
    fn from(err: ::btleplug::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// What a scan stores in [`DeviceIdentity::handle`].
#[derive(Debug, Clone)]
pub struct BtlePeripheral {
    pub adapter: Adapter,
    pub peripheral: Peripheral,
}

// ── BtleplugStack ────────────────────────────────────────────────

/// All three transport strategies backed by one `btleplug` manager.
#[derive(Clone)]
pub struct BtleplugStack {
    manager: Arc<Manager>,
    attempts: u32,
    backoff: Duration,
}

impl BtleplugStack {
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        Ok(Self {
            manager: Arc::new(manager),
            attempts: DEFAULT_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        })
    }

    /// Connect attempts per `establish` call and the base delay between them.
    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    /// Wrap into a [`BleStack`] with force-disconnect enabled.
    pub fn into_stack(self) -> BleStack {
        let shared = Arc::new(self);
        BleStack::new(shared.clone(), shared.clone()).with_force_disconnect(shared)
    }

    /// The adapter whose info string starts with `name` (e.g. `hci0`).
    ///
    /// Falls back to the first adapter when none matches; some platforms
    /// do not expose BlueZ-style names.
    async fn adapter(&self, name: &str) -> Result<Adapter, TransportError> {
        let adapters = self.manager.adapters().await?;
        let mut first = None;

        for adapter in adapters {
            let info = adapter.adapter_info().await?;
            if info.starts_with(name) {
                return Ok(adapter);
            }
            first.get_or_insert(adapter);
        }

        match first {
            Some(adapter) => {
                warn!(adapter = name, "adapter not found; using the first available one");
                Ok(adapter)
            }
            None => Err(TransportError::new("No Bluetooth adapters found")),
        }
    }

    async fn find_peripheral(
        adapter: &Adapter,
        address: &DeviceAddress,
    ) -> Result<Option<Peripheral>, TransportError> {
        for peripheral in adapter.peripherals().await? {
            if same_address(peripheral.address(), address) {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }

    async fn connect_once(peripheral: &Peripheral) -> Result<(), TransportError> {
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        // Populates the service cache `subscribe` looks characteristics up in.
        peripheral.discover_services().await?;
        Ok(())
    }
}

impl std::fmt::Debug for BtleplugStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleplugStack")
            .field("attempts", &self.attempts)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Discovery for BtleplugStack {
    async fn scan(
        &self,
        adapter: &str,
        timeout: Duration,
    ) -> Result<Vec<DeviceIdentity>, TransportError> {
        let central = self.adapter(adapter).await?;
        central.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(timeout).await;
        if let Err(e) = central.stop_scan().await {
            debug!(error = %e, "failed to stop scan cleanly");
        }

        let mut found = Vec::new();
        for peripheral in central.peripherals().await? {
            let Some(properties) = peripheral.properties().await? else {
                continue;
            };
            let address = properties.address.to_string();
            let name = properties.local_name.unwrap_or_else(|| address.clone());
            let handle = PeripheralHandle::new(BtlePeripheral {
                adapter: central.clone(),
                peripheral,
            });

            let mut identity = DeviceIdentity::new(address, name, handle);
            if let Some(rssi) = properties.rssi {
                identity = identity.with_rssi(rssi);
            }
            found.push(identity);
        }

        info!(adapter, devices = found.len(), "scan finished");
        Ok(found)
    }
}

#[async_trait]
impl ReliableConnector for BtleplugStack {
    async fn establish(
        &self,
        identity: &DeviceIdentity,
        on_disconnect: DisconnectCallback,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        let Some(handle) = identity.handle.downcast_ref::<BtlePeripheral>() else {
            return Err(TransportError::new(format!(
                "{} was not discovered by the btleplug backend",
                identity.address
            )));
        };
        let peripheral = handle.peripheral.clone();

        let mut last_error = TransportError::new("no connection attempt made");
        for attempt in 1..=self.attempts {
            match Self::connect_once(&peripheral).await {
                Ok(()) => {
                    let watcher = watch_disconnect(&handle.adapter, peripheral.id(), on_disconnect)
                        .await?;
                    return Ok(Arc::new(BtleConnection {
                        peripheral,
                        watcher,
                    }));
                }
                Err(e) => {
                    debug!(
                        address = %identity.address,
                        attempt,
                        error = %e,
                        "connect attempt failed"
                    );
                    last_error = e;
                }
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.backoff * attempt).await;
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl ForceDisconnect for BtleplugStack {
    async fn force_disconnect(
        &self,
        adapter: &str,
        address: &DeviceAddress,
    ) -> Result<(), TransportError> {
        let central = self.adapter(adapter).await?;
        let Some(peripheral) = Self::find_peripheral(&central, address).await? else {
            debug!(%address, "not known to the adapter; nothing to disconnect");
            return Ok(());
        };
        if peripheral.is_connected().await? {
            peripheral.disconnect().await?;
            info!(%address, "closed stale connection");
        }
        Ok(())
    }
}

// ── BtleConnection ───────────────────────────────────────────────

struct BtleConnection {
    peripheral: Peripheral,
    watcher: JoinHandle<()>,
}

impl BtleConnection {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| TransportError::new(format!("Characteristic {uuid} not found")))
    }
}

#[async_trait]
impl Connection for BtleConnection {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<NotificationStream, TransportError> {
        let target = self.characteristic(characteristic)?;
        self.peripheral.subscribe(&target).await?;

        let stream = self
            .peripheral
            .notifications()
            .await?
            .filter(move |n| future::ready(n.uuid == characteristic))
            .map(|n| Bytes::from(n.value));
        Ok(Box::pin(stream))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.watcher.abort();
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

impl Drop for BtleConnection {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

// ── Helpers ──────────────────────────────────────────────────────

/// Fires `on_disconnect` once the adapter reports `id` gone.
async fn watch_disconnect(
    adapter: &Adapter,
    id: PeripheralId,
    on_disconnect: DisconnectCallback,
) -> Result<JoinHandle<()>, TransportError> {
    let mut events = adapter.events().await?;
    Ok(tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if let CentralEvent::DeviceDisconnected(gone) = event {
                if gone == id {
                    on_disconnect();
                    break;
                }
            }
        }
    }))
}

fn same_address(found: BDAddr, wanted: &DeviceAddress) -> bool {
    DeviceAddress::new(found.to_string()) == *wanted
}
