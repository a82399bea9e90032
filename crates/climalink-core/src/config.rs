// ── Runtime fleet configuration ──
//
// Describes *which* devices to manage and *how* patiently. Never touches
// disk: the CLI (via climalink-config) builds a `FleetConfig` and hands it in.

use std::time::Duration;

use uuid::Uuid;

use crate::model::DeviceAddress;
use crate::session::SessionOptions;

/// Adapter used when none is configured.
pub const DEFAULT_ADAPTER: &str = "hci0";

/// How long the startup discovery scan listens for advertisements.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on a single device's resolve + connect + subscribe.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Notification characteristic of the Madoka (BRC1H) thermostat service.
pub const MADOKA_NOTIFY_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x2141_e112_213a_11e6_b67b_9e71_128c_ae77);

/// Configuration for one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetConfig {
    /// Bluetooth adapter identifier (e.g. `hci0`).
    pub adapter: String,
    /// Devices to connect, one session each.
    pub devices: Vec<DeviceAddress>,
    /// Duration of the startup discovery scan.
    pub scan_timeout: Duration,
    /// Per-device bound on a connection attempt.
    pub connect_timeout: Duration,
    /// Close stale connections to each device before the first attempt.
    pub force_disconnect: bool,
    /// Swallow connect failures and stay eligible for retry.
    pub reconnect: bool,
    /// Background retry cadence for disconnected sessions. Zero disables it.
    pub reconnect_interval: Duration,
    /// Characteristic subscribed to after connecting.
    pub notify_characteristic: Uuid,
}

impl FleetConfig {
    pub fn new(adapter: impl Into<String>, devices: Vec<DeviceAddress>) -> Self {
        Self {
            adapter: adapter.into(),
            devices,
            ..Self::default()
        }
    }

    /// Options every session in this fleet is created with.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            reconnect: self.reconnect,
            notify_characteristic: self.notify_characteristic,
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            adapter: DEFAULT_ADAPTER.into(),
            devices: Vec::new(),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            force_disconnect: true,
            reconnect: true,
            reconnect_interval: Duration::ZERO,
            notify_characteristic: MADOKA_NOTIFY_CHARACTERISTIC,
        }
    }
}
