//! `scan`: one discovery pass, listing every peripheral the adapter saw.

use std::sync::Arc;

use serde::Serialize;
use tabled::Tabled;

use climalink_core::{DeviceCache, DeviceIdentity, FleetOrchestrator};

use crate::cli::GlobalOpts;
use crate::config;
use crate::error::CliError;
use crate::output;

#[derive(Clone, Serialize, Tabled)]
struct ScanRow {
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "RSSI", display_with = "display_rssi")]
    rssi: Option<i16>,
}

#[allow(clippy::ref_option)]
fn display_rssi(rssi: &Option<i16>) -> String {
    rssi.map_or_else(|| "-".into(), |r| format!("{r} dBm"))
}

impl From<&DeviceIdentity> for ScanRow {
    fn from(d: &DeviceIdentity) -> Self {
        Self {
            address: d.address.to_string(),
            name: d.display_name.clone(),
            rssi: d.rssi,
        }
    }
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let fleet_config = config::resolve_scan(global)?;
    let stack = super::open_stack().await?;
    let cache = Arc::new(DeviceCache::new());
    let fleet = FleetOrchestrator::new(fleet_config, Arc::clone(&cache), stack);

    fleet
        .discover()
        .await
        .map_err(|e| CliError::Discovery {
            message: e.failure_reason(),
        })?;

    let rows: Vec<ScanRow> = cache.snapshot().iter().map(|d| ScanRow::from(&**d)).collect();
    let out = output::render_list(&global.output, &rows, ScanRow::clone, |r| {
        r.address.clone()
    });
    output::print_output(&out, global.quiet);

    if !global.quiet {
        eprintln!("{} peripherals found", rows.len());
    }
    Ok(())
}
