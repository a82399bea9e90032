// ── Core error types ──
//
// Errors surfaced by sessions and the fleet orchestrator. Transport
// strategies report `TransportError`; sessions wrap those into
// `CoreError::Transport` together with the device address.

use std::time::Duration;

use thiserror::Error;

use crate::model::DeviceAddress;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Resolution ───────────────────────────────────────────────────
    #[error(
        "Could not find bluetooth device for the address {address}. \
         Please follow the instructions on device pairing and rescan."
    )]
    DeviceNotFound { address: DeviceAddress },

    #[error("Session for {address} was aborted; rescan before connecting again")]
    SessionAborted { address: DeviceAddress },

    #[error("Session for {address} is closed")]
    SessionClosed { address: DeviceAddress },

    // ── Transport ────────────────────────────────────────────────────
    #[error("Cannot connect to {address}: {message}")]
    Transport {
        address: DeviceAddress,
        message: String,
    },

    #[error("Connection to {address} timed out after {timeout:?}")]
    Timeout {
        address: DeviceAddress,
        timeout: Duration,
    },

    #[error("Discovery scan failed: {message}")]
    Discovery { message: String },
}

impl CoreError {
    /// Text the failure classifier should match against.
    ///
    /// For transport failures this is the raw stack message, without the
    /// address prefix the `Display` impl adds.
    pub fn failure_reason(&self) -> String {
        match self {
            Self::Transport { message, .. } | Self::Discovery { message } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether this error ends the session for good (re-discovery needed).
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound { .. } | Self::SessionAborted { .. } | Self::SessionClosed { .. }
        )
    }
}
