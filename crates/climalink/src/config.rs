//! CLI configuration: thin wrapper around `climalink_config` shared types.
//!
//! Adds resolution that respects `GlobalOpts` and `ConnectArgs` flag
//! overrides (--adapter, --device, --timeout, etc.).

use std::path::PathBuf;

use climalink_core::FleetConfig;

use crate::cli::{ConnectArgs, GlobalOpts};
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use climalink_config::{Config, Profile, config_path, load_config_from, save_config_to};

// ── CLI-specific helpers ────────────────────────────────────────────

/// The config file in effect: `--config` or the platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config_path)
}

/// Load the config file in effect, layered under env vars.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(load_config_from(&config_file(global))?)
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

pub fn profile_not_found(name: &str, config: &Config) -> CliError {
    let available: Vec<_> = config.profiles.keys().cloned().collect();
    CliError::ProfileNotFound {
        name: name.into(),
        available: if available.is_empty() {
            "(none)".into()
        } else {
            available.join(", ")
        },
    }
}

/// Build the `FleetConfig` for `connect`: profile, then flag overrides.
///
/// An explicitly requested profile must exist; the implicit default may be
/// missing when devices come from `--device`.
pub fn resolve_fleet(global: &GlobalOpts, args: &ConnectArgs) -> Result<FleetConfig, CliError> {
    let cfg = load(global)?;
    let name = active_profile_name(global, &cfg);

    let mut profile = match cfg.profiles.get(&name) {
        Some(profile) => profile.clone(),
        None if global.profile.is_some() => return Err(profile_not_found(&name, &cfg)),
        None => Profile::default(),
    };

    if let Some(ref adapter) = global.adapter {
        profile.adapter = Some(adapter.clone());
    }
    if global.scan_timeout.is_some() {
        profile.scan_timeout = global.scan_timeout;
    }
    if !args.devices.is_empty() {
        profile.devices.clone_from(&args.devices);
    }
    if args.timeout.is_some() {
        profile.connect_timeout = args.timeout;
    }
    if args.no_force_disconnect {
        profile.force_disconnect = Some(false);
    }
    if args.no_reconnect {
        profile.reconnect = Some(false);
    }
    if args.reconnect_interval.is_some() {
        profile.reconnect_interval = args.reconnect_interval;
    }

    if profile.devices.is_empty() {
        return Err(CliError::NoDevices { profile: name });
    }

    Ok(climalink_config::profile_to_fleet_config(
        &profile,
        &cfg.defaults,
    )?)
}

/// Adapter and scan window for `scan`, which needs no device list.
pub fn resolve_scan(global: &GlobalOpts) -> Result<FleetConfig, CliError> {
    let cfg = load(global)?;
    let name = active_profile_name(global, &cfg);
    let profile = cfg.profiles.get(&name);

    let adapter = global
        .adapter
        .clone()
        .or_else(|| profile.and_then(|p| p.adapter.clone()))
        .unwrap_or_else(|| cfg.defaults.adapter.clone());
    let secs = global
        .scan_timeout
        .or_else(|| profile.and_then(|p| p.scan_timeout))
        .unwrap_or(cfg.defaults.scan_timeout);

    let mut fleet = FleetConfig::new(adapter, Vec::new());
    fleet.scan_timeout = climalink_config::positive_secs("scan_timeout", secs)?;
    Ok(fleet)
}
