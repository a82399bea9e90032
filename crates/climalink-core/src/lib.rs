//! Connection orchestration for fleets of BLE climate-control peripherals.
//!
//! This crate owns the protocol and state-machine logic that sits between a
//! BLE stack and whatever presents thermostat data to a user:
//!
//! - **[`DeviceCache`]**: Shared table of discovered peripherals, keyed by
//!   normalized address. Written once per discovery scan, read by resolution.
//!
//! - **[`AddressResolver`]**: Maps a configured address to a cached
//!   [`DeviceIdentity`]. Never scans and never touches the radio.
//!
//! - **[`ConnectionSession`]**: Per-device state machine
//!   (resolve → connect → subscribe → connected) built on an injected
//!   [`ReliableConnector`] strategy, with caller-driven reconnect.
//!
//! - **[`FleetOrchestrator`]**: Runs one discovery scan, then starts every
//!   session concurrently under its own timeout and classifies each outcome
//!   into a [`FleetReport`]. Never fails as a whole.
//!
//! The BLE transport itself is external: see [`transport`] for the strategy
//! traits, and the `btleplug` feature for an implementation backed by the OS
//! Bluetooth stack.

pub mod backend;
pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod fleet;
pub mod model;
pub mod resolver;
pub mod session;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cache::DeviceCache;
pub use classify::{FailureClass, classify_failure};
pub use config::FleetConfig;
pub use error::CoreError;
pub use fleet::{FleetOrchestrator, FleetReport, FleetResult, Outcome};
pub use model::{DeviceAddress, DeviceIdentity, Notification, PeripheralHandle};
pub use resolver::AddressResolver;
pub use session::{ConnectionSession, ConnectionState, SessionOptions};
pub use transport::{
    BleStack, Connection, DisconnectCallback, Discovery, ForceDisconnect, NotificationStream,
    ReliableConnector, TransportError,
};
