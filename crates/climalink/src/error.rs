//! CLI error types with miette diagnostics.
//!
//! User-facing errors with actionable help text and stable exit codes.
//! Core failures arrive per device in the fleet report; only the
//! aggregate verdict becomes a `CliError`.

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use climalink_config::ConfigError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    pub const NO_BACKEND: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("None of the {total} configured devices connected")]
    #[diagnostic(
        code(climalink::none_connected),
        help("Run with -vv to see why each attempt failed, or rescan with: climalink scan")
    )]
    NoneConnected { total: usize },

    #[error("Discovery scan failed: {message}")]
    #[diagnostic(
        code(climalink::discovery_failed),
        help("Check that the Bluetooth adapter is up (bluetoothctl show).")
    )]
    Discovery { message: String },

    #[error("Every device timed out after {timeout:?}")]
    #[diagnostic(
        code(climalink::timeout),
        help("Increase the timeout with --timeout or move closer to the devices.")
    )]
    Timeout { timeout: Duration },

    #[error("This build has no Bluetooth backend")]
    #[diagnostic(
        code(climalink::no_backend),
        help("Rebuild with: cargo install climalink --features btleplug")
    )]
    NoBackend,

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(climalink::validation))]
    Validation { field: String, reason: String },

    #[error("No devices configured for profile '{profile}'")]
    #[diagnostic(
        code(climalink::no_devices),
        help(
            "Add one with: climalink config add-device AA:BB:CC:DD:EE:FF\n\
             Or pass --device on the command line."
        )
    )]
    NoDevices { profile: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(climalink::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: climalink config add-device --profile {name} <ADDRESS>"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error(transparent)]
    #[diagnostic(code(climalink::config))]
    Config(Box<ConfigError>),

    // ── IO ───────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoneConnected { .. } | Self::Discovery { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::NoBackend => exit_code::NO_BACKEND,
            Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::NoDevices { .. } => exit_code::USAGE,
            Self::Config(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Io(e) => Self::Io(e),
            other => Self::Config(Box::new(other)),
        }
    }
}
