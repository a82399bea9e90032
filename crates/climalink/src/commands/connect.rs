//! `connect`: scan, start every configured device, report per-device outcomes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::StreamExt;
use futures_util::stream::select_all;
use serde::Serialize;
use tabled::Tabled;
use tracing::debug;

use climalink_core::{
    DeviceCache, FleetOrchestrator, FleetReport, FleetResult, Notification, Outcome,
};

use crate::cli::{ConnectArgs, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl From<&FleetResult> for ResultRow {
    fn from(r: &FleetResult) -> Self {
        Self {
            address: r.address.to_string(),
            outcome: r.outcome.label().into(),
            state: r.state.to_string(),
            reason: r.outcome.reason().unwrap_or("-").into(),
        }
    }
}

/// A notification as printed while holding.
#[derive(Serialize)]
struct NotificationLine {
    address: String,
    value: String,
    received_at: DateTime<Utc>,
}

impl From<&Notification> for NotificationLine {
    fn from(n: &Notification) -> Self {
        Self {
            address: n.address.to_string(),
            value: hex(&n.value),
            received_at: n.received_at,
        }
    }
}

pub async fn handle(args: ConnectArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let fleet_config = config::resolve_fleet(global, &args)?;
    let stack = super::open_stack().await?;
    let fleet = FleetOrchestrator::new(fleet_config, Arc::new(DeviceCache::new()), stack);

    let report = fleet.start_all().await;
    print_report(&report, global);

    if args.hold {
        hold(&fleet, global).await;
    }
    fleet.shutdown().await;

    verdict(&report, fleet.config().connect_timeout)
}

/// Exit status for a finished startup: fine if anything connected.
fn verdict(report: &FleetReport, timeout: Duration) -> Result<(), CliError> {
    if report.is_empty() || report.connected_count() > 0 {
        return Ok(());
    }
    if report.iter().all(|r| r.outcome == Outcome::TimedOut) {
        return Err(CliError::Timeout { timeout });
    }
    Err(CliError::NoneConnected {
        total: report.len(),
    })
}

fn print_report(report: &FleetReport, global: &GlobalOpts) {
    let results: Vec<FleetResult> = report.iter().cloned().collect();
    let out = output::render_list(&global.output, &results, |r| ResultRow::from(r), |r| {
        format!("{} {}", r.address, r.outcome.label())
    });
    output::print_output(&out, global.quiet);

    if !global.quiet {
        eprintln!(
            "{}",
            output::fleet_summary(
                report.connected_count(),
                report.len(),
                output::should_color(&global.color)
            )
        );
    }
}

/// Print notifications from every session until Ctrl-C.
async fn hold(fleet: &FleetOrchestrator, global: &GlobalOpts) {
    let mut notifications = select_all(
        fleet
            .sessions()
            .iter()
            .map(|s| Box::pin(s.notification_stream())),
    );

    if !global.quiet {
        eprintln!("Holding connections, press Ctrl-C to stop");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                break;
            }
            next = notifications.next() => {
                let Some(notification) = next else {
                    debug!("every notification stream ended");
                    break;
                };
                let line = NotificationLine::from(&notification);
                let out = output::render_single(
                    &global.output,
                    &line,
                    |l| {
                        format!(
                            "{}  {}  {}",
                            l.received_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                            l.address,
                            l.value
                        )
                    },
                    |l| format!("{} {}", l.address, l.value),
                );
                output::print_output(&out, false);
            }
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}
