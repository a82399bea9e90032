// ── Domain model ──
//
// Addresses, cached peripheral identities, and notification payloads.
// Identities are produced by discovery and immutable once cached.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── DeviceAddress ───────────────────────────────────────────────────

/// A Bluetooth device address, normalized to upper case.
///
/// Equality, hashing and ordering all use the normalized form, so
/// `"aa:bb:cc:dd:ee:ff"` and `"AA:BB:CC:DD:EE:FF"` are the same address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a colon-separated 48-bit MAC (`AA:BB:CC:DD:EE:FF`).
    pub fn is_mac(&self) -> bool {
        let mut groups = 0;
        for group in self.0.split(':') {
            if group.len() != 2 || !group.chars().all(|c| c.is_ascii_hexdigit()) {
                return false;
            }
            groups += 1;
        }
        groups == 6
    }
}

impl From<String> for DeviceAddress {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for DeviceAddress {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<DeviceAddress> for String {
    fn from(address: DeviceAddress) -> Self {
        address.0
    }
}

impl AsRef<str> for DeviceAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── PeripheralHandle ────────────────────────────────────────────────

/// Opaque transport object attached to a discovered peripheral.
///
/// The core never looks inside; the transport that produced the identity
/// downcasts it back to its own type when establishing a connection.
#[derive(Clone)]
pub struct PeripheralHandle(Arc<dyn Any + Send + Sync>);

impl PeripheralHandle {
    pub fn new<T: Any + Send + Sync>(inner: T) -> Self {
        Self(Arc::new(inner))
    }

    /// A handle carrying no transport object.
    pub fn empty() -> Self {
        Self::new(())
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.0).downcast_ref::<T>()
    }
}

impl fmt::Debug for PeripheralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PeripheralHandle(..)")
    }
}

// ── DeviceIdentity ──────────────────────────────────────────────────

/// A peripheral seen by a discovery scan.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub address: DeviceAddress,
    /// Advertised local name, or the address when the device sent none.
    pub display_name: String,
    /// Signal strength at scan time, if the stack reported one.
    pub rssi: Option<i16>,
    pub handle: PeripheralHandle,
}

impl DeviceIdentity {
    pub fn new(
        address: impl Into<DeviceAddress>,
        display_name: impl Into<String>,
        handle: PeripheralHandle,
    ) -> Self {
        Self {
            address: address.into(),
            display_name: display_name.into(),
            rssi: None,
            handle,
        }
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }
}

// ── Notification ────────────────────────────────────────────────────

/// One value pushed by a peripheral on its notification characteristic.
#[derive(Debug, Clone)]
pub struct Notification {
    pub address: DeviceAddress,
    pub value: Bytes,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn addresses_compare_case_insensitively() {
        assert_eq!(
            DeviceAddress::new("aa:bb:cc:dd:ee:ff"),
            DeviceAddress::new("AA:BB:CC:DD:EE:FF")
        );
        assert_eq!(DeviceAddress::new(" aa:bb:cc:dd:ee:ff\n").as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn mac_validation() {
        assert!(DeviceAddress::new("00:1a:2B:3c:4D:5e").is_mac());
        assert!(!DeviceAddress::new("00:1A:2B:3C:4D").is_mac());
        assert!(!DeviceAddress::new("00:1A:2B:3C:4D:5E:6F").is_mac());
        assert!(!DeviceAddress::new("00-1A-2B-3C-4D-5E").is_mac());
        assert!(!DeviceAddress::new("GG:1A:2B:3C:4D:5E").is_mac());
        assert!(!DeviceAddress::new("").is_mac());
    }

    #[test]
    fn address_serializes_normalized() {
        let json = serde_json::to_string(&DeviceAddress::new("ab:cd:ef:01:23:45")).unwrap();
        assert_eq!(json, "\"AB:CD:EF:01:23:45\"");

        let parsed: DeviceAddress = serde_json::from_str("\"ab:cd:ef:01:23:45\"").unwrap();
        assert_eq!(parsed.as_str(), "AB:CD:EF:01:23:45");
    }

    #[test]
    fn handle_downcasts_to_its_own_type() {
        let handle = PeripheralHandle::new(42_u32);
        assert_eq!(handle.downcast_ref::<u32>(), Some(&42));
        assert!(handle.downcast_ref::<String>().is_none());
        assert!(PeripheralHandle::empty().downcast_ref::<()>().is_some());
    }
}
