//! Shared configuration for climalink.
//!
//! TOML profiles (one fleet per profile), layered loading via figment,
//! and translation to `climalink_core::FleetConfig`. The core never reads
//! files itself: it receives a pre-built `FleetConfig`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use climalink_core::DeviceAddress;
use climalink_core::FleetConfig;
use climalink_core::config::{DEFAULT_ADAPTER, DEFAULT_CONNECT_TIMEOUT, DEFAULT_SCAN_TIMEOUT};

/// Prefix of environment variables layered over the config file.
/// Nested keys use `__`, e.g. `CLIMALINK_DEFAULTS__ADAPTER=hci1`.
pub const ENV_PREFIX: &str = "CLIMALINK_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when `--profile` is not given.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named fleet profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default = "default_adapter")]
    pub adapter: String,

    /// Discovery scan duration in seconds.
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout: u64,

    /// Per-device connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    #[serde(default = "default_true")]
    pub force_disconnect: bool,

    #[serde(default = "default_true")]
    pub reconnect: bool,

    /// Background retry cadence in seconds; 0 disables it.
    #[serde(default)]
    pub reconnect_interval: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            adapter: default_adapter(),
            scan_timeout: default_scan_timeout(),
            connect_timeout: default_connect_timeout(),
            force_disconnect: true,
            reconnect: true,
            reconnect_interval: 0,
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_adapter() -> String {
    DEFAULT_ADAPTER.into()
}
fn default_scan_timeout() -> u64 {
    DEFAULT_SCAN_TIMEOUT.as_secs()
}
fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}
fn default_true() -> bool {
    true
}

/// A named fleet: which adapter, which thermostats, and optional overrides
/// of the global defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// Bluetooth adapter (e.g. "hci0").
    pub adapter: Option<String>,

    /// Thermostat addresses ("AA:BB:CC:DD:EE:FF").
    #[serde(default)]
    pub devices: Vec<String>,

    pub scan_timeout: Option<u64>,
    pub connect_timeout: Option<u64>,
    pub force_disconnect: Option<bool>,
    pub reconnect: Option<bool>,
    pub reconnect_interval: Option<u64>,
}

impl Profile {
    /// Add a device. Returns `false` when it was already present (any case).
    pub fn add_device(&mut self, raw: &str) -> Result<bool, ConfigError> {
        let address = parse_address(raw)?;
        if self
            .devices
            .iter()
            .any(|d| DeviceAddress::new(d) == address)
        {
            return Ok(false);
        }
        self.devices.push(address.into());
        Ok(true)
    }

    /// Remove a device (any case). Returns `false` when it was not present.
    pub fn remove_device(&mut self, raw: &str) -> bool {
        let address = DeviceAddress::new(raw);
        let before = self.devices.len();
        self.devices.retain(|d| DeviceAddress::new(d) != address);
        self.devices.len() != before
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "climalink", "climalink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("climalink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file, layered under `CLIMALINK_*` env vars.
///
/// A missing file is not an error; defaults apply.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation to core ─────────────────────────────────────────────

/// Parse and validate one configured address.
pub fn parse_address(raw: &str) -> Result<DeviceAddress, ConfigError> {
    let address = DeviceAddress::new(raw);
    if !address.is_mac() {
        return Err(ConfigError::Validation {
            field: "devices".into(),
            reason: format!("'{raw}' is not a Bluetooth address (expected AA:BB:CC:DD:EE:FF)"),
        });
    }
    Ok(address)
}

/// Validate a device list: well-formed, no duplicates in any case.
pub fn parse_devices<S: AsRef<str>>(raw: &[S]) -> Result<Vec<DeviceAddress>, ConfigError> {
    let mut devices: Vec<DeviceAddress> = Vec::with_capacity(raw.len());
    for entry in raw {
        let address = parse_address(entry.as_ref())?;
        if devices.contains(&address) {
            return Err(ConfigError::Validation {
                field: "devices".into(),
                reason: format!("{address} is listed more than once"),
            });
        }
        devices.push(address);
    }
    Ok(devices)
}

/// Build a `FleetConfig` from a profile and the global defaults.
///
/// Profile values win over defaults. Suitable for any non-CLI consumer;
/// the CLI layers its flags on top of the result.
pub fn profile_to_fleet_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<FleetConfig, ConfigError> {
    let devices = parse_devices(&profile.devices)?;
    let adapter = profile
        .adapter
        .clone()
        .unwrap_or_else(|| defaults.adapter.clone());
    if adapter.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "adapter".into(),
            reason: "must not be empty".into(),
        });
    }

    let scan_timeout = positive_secs(
        "scan_timeout",
        profile.scan_timeout.unwrap_or(defaults.scan_timeout),
    )?;
    let connect_timeout = positive_secs(
        "connect_timeout",
        profile.connect_timeout.unwrap_or(defaults.connect_timeout),
    )?;

    Ok(FleetConfig {
        adapter,
        devices,
        scan_timeout,
        connect_timeout,
        force_disconnect: profile.force_disconnect.unwrap_or(defaults.force_disconnect),
        reconnect: profile.reconnect.unwrap_or(defaults.reconnect),
        reconnect_interval: Duration::from_secs(
            profile
                .reconnect_interval
                .unwrap_or(defaults.reconnect_interval),
        ),
        ..FleetConfig::default()
    })
}

/// Seconds to a `Duration`, rejecting zero.
pub fn positive_secs(field: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Validation {
            field: field.into(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}
