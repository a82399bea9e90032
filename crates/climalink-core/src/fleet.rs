// ── Fleet orchestrator ──
//
// Starts one `ConnectionSession` per configured device. Startup is:
//
//   force-disconnect (optional) → discovery scan → N concurrent connects
//
// Each connect runs under its own timeout; no device's failure delays or
// fails another. The orchestrator itself never fails.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::DeviceCache;
use crate::classify::classify_failure;
use crate::config::FleetConfig;
use crate::error::CoreError;
use crate::model::DeviceAddress;
use crate::resolver::AddressResolver;
use crate::session::{ConnectionSession, ConnectionState};
use crate::transport::BleStack;

/// Slack granted to the discovery backend on top of its scan window.
const SCAN_GRACE: Duration = Duration::from_secs(2);

// ── Outcomes ─────────────────────────────────────────────────────

/// How one device's connection attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Connected,
    TimedOut,
    /// Not in the discovery cache; needs pairing and a rescan.
    Aborted,
    /// Known Bluetooth stack noise; the next attempt will likely succeed.
    TransientStackError(String),
    FatalError(String),
}

impl Outcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::TimedOut => "timed_out",
            Self::Aborted => "aborted",
            Self::TransientStackError(_) => "transient_stack_error",
            Self::FatalError(_) => "fatal_error",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::TransientStackError(reason) | Self::FatalError(reason) => Some(reason),
            Self::Connected | Self::TimedOut | Self::Aborted => None,
        }
    }

    /// Classify a failure message left behind by a swallowed attempt.
    fn from_failure(message: String) -> Self {
        if classify_failure(&message).is_transient() {
            Self::TransientStackError(message)
        } else {
            Self::FatalError(message)
        }
    }
}

/// Per-device record produced by one startup or reconnect attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FleetResult {
    pub address: DeviceAddress,
    #[serde(flatten)]
    pub outcome: Outcome,
    /// Session state once the attempt settled.
    pub state: ConnectionState,
}

/// Outcome of every device in one orchestration pass, keyed by address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FleetReport {
    results: BTreeMap<DeviceAddress, FleetResult>,
}

impl FleetReport {
    pub fn get(&self, address: &DeviceAddress) -> Option<&FleetResult> {
        self.results.get(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FleetResult> {
        self.results.values()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn connected_count(&self) -> usize {
        self.iter().filter(|r| r.outcome.is_connected()).count()
    }

    pub fn all_connected(&self) -> bool {
        self.iter().all(|r| r.outcome.is_connected())
    }
}

impl FromIterator<FleetResult> for FleetReport {
    fn from_iter<I: IntoIterator<Item = FleetResult>>(iter: I) -> Self {
        Self {
            results: iter.into_iter().map(|r| (r.address.clone(), r)).collect(),
        }
    }
}

impl IntoIterator for FleetReport {
    type Item = FleetResult;
    type IntoIter = btree_map::IntoValues<DeviceAddress, FleetResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_values()
    }
}

// ── FleetOrchestrator ────────────────────────────────────────────

/// Owns the sessions of one fleet and drives their startup.
///
/// Cheaply cloneable via `Arc<FleetInner>`. The discovery cache is handed
/// in at construction so its lifetime stays visible to the caller.
#[derive(Clone)]
pub struct FleetOrchestrator {
    inner: Arc<FleetInner>,
}

struct FleetInner {
    config: FleetConfig,
    cache: Arc<DeviceCache>,
    stack: BleStack,
    sessions: DashMap<DeviceAddress, ConnectionSession>,
    /// Cancelled on shutdown and replaced at the start of every run.
    cancel: Mutex<CancellationToken>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl FleetOrchestrator {
    pub fn new(config: FleetConfig, cache: Arc<DeviceCache>, stack: BleStack) -> Self {
        Self {
            inner: Arc::new(FleetInner {
                config,
                cache,
                stack,
                sessions: DashMap::new(),
                cancel: Mutex::new(CancellationToken::new()),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &Arc<DeviceCache> {
        &self.inner.cache
    }

    pub fn session(&self, address: &DeviceAddress) -> Option<ConnectionSession> {
        self.inner.sessions.get(address).map(|s| s.value().clone())
    }

    /// All sessions, ordered by address.
    pub fn sessions(&self) -> Vec<ConnectionSession> {
        let mut all: Vec<ConnectionSession> = self
            .inner
            .sessions
            .iter()
            .map(|s| s.value().clone())
            .collect();
        all.sort_by(|a, b| a.address().cmp(b.address()));
        all
    }

    // ── Startup ──────────────────────────────────────────────────

    /// Start every configured device and report how each attempt ended.
    ///
    /// Sessions from a previous run are closed first. Never fails: every
    /// configured device gets exactly one entry in the report.
    pub async fn start_all(&self) -> FleetReport {
        self.stop_background().await;
        self.close_sessions().await;

        let sessions = self.build_sessions();
        let config = &self.inner.config;
        info!(
            devices = sessions.len(),
            adapter = %config.adapter,
            "starting fleet"
        );

        if config.force_disconnect {
            self.force_disconnect_all(&sessions).await;
        }

        // Resolution never scans, so the scan must settle first.
        if let Err(e) = self.discover().await {
            warn!(error = %e, "discovery failed; resolving against the existing cache");
        }

        let report: FleetReport = join_all(sessions.iter().map(|s| self.attempt(s)))
            .await
            .into_iter()
            .collect();

        self.spawn_supervisor().await;

        info!(
            connected = report.connected_count(),
            total = report.len(),
            "fleet startup complete"
        );
        report
    }

    /// Run one discovery scan and repopulate the cache.
    ///
    /// Bounded by the configured scan timeout plus a short grace period.
    /// On failure the cache is left untouched.
    pub async fn discover(&self) -> Result<usize, CoreError> {
        let config = &self.inner.config;
        let scan = self
            .inner
            .stack
            .discovery
            .scan(&config.adapter, config.scan_timeout);

        let found = match tokio::time::timeout(config.scan_timeout + SCAN_GRACE, scan).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                return Err(CoreError::Discovery {
                    message: e.message().to_owned(),
                });
            }
            Err(_) => {
                return Err(CoreError::Discovery {
                    message: format!(
                        "scan on {} did not finish within {}s",
                        config.adapter,
                        config.scan_timeout.as_secs()
                    ),
                });
            }
        };

        let count = self.inner.cache.apply_scan(found);
        info!(adapter = %config.adapter, devices = count, "discovery scan complete");
        Ok(count)
    }

    // ── Retry ────────────────────────────────────────────────────

    /// Re-attempt one device. `None` when the address is not part of the fleet.
    pub async fn reconnect(&self, address: &DeviceAddress) -> Option<FleetResult> {
        let session = self.session(address)?;
        Some(self.attempt(&session).await)
    }

    /// Re-attempt every reconnect-enabled session resting in a retryable
    /// state.
    ///
    /// Connected, aborted and in-flight sessions are left alone. Without
    /// reconnect `Disconnected` is terminal; only [`reconnect`](Self::reconnect)
    /// retries such a session.
    pub async fn reconnect_disconnected(&self) -> FleetReport {
        let idle: Vec<ConnectionSession> = self
            .sessions()
            .into_iter()
            .filter(|s| {
                s.reconnect_enabled()
                    && !s.is_closed()
                    && matches!(
                        s.state(),
                        ConnectionState::Disconnected | ConnectionState::Unresolved
                    )
            })
            .collect();

        if idle.is_empty() {
            return FleetReport::default();
        }
        debug!(sessions = idle.len(), "retrying disconnected sessions");

        join_all(idle.iter().map(|s| self.attempt(s)))
            .await
            .into_iter()
            .collect()
    }

    // ── Teardown ─────────────────────────────────────────────────

    /// Stop background retries and release every transport handle.
    ///
    /// Sessions still connecting are cancelled; their attempts end with
    /// [`CoreError::SessionClosed`].
    pub async fn shutdown(&self) {
        self.stop_background().await;
        self.close_sessions().await;
        info!(sessions = self.inner.sessions.len(), "fleet shut down");
    }

    // ── Internals ────────────────────────────────────────────────

    /// One session per distinct configured address, in configuration order.
    fn build_sessions(&self) -> Vec<ConnectionSession> {
        let inner = &self.inner;
        inner.sessions.clear();

        let resolver = AddressResolver::new(Arc::clone(&inner.cache));
        let options = inner.config.session_options();
        let mut sessions = Vec::with_capacity(inner.config.devices.len());

        for address in &inner.config.devices {
            if inner.sessions.contains_key(address) {
                debug!(%address, "duplicate device in configuration; ignoring");
                continue;
            }
            let session = ConnectionSession::new(
                address.clone(),
                options.clone(),
                resolver.clone(),
                Arc::clone(&inner.stack.connector),
            );
            inner.sessions.insert(address.clone(), session.clone());
            sessions.push(session);
        }
        sessions
    }

    /// Best-effort teardown of links other processes left open.
    async fn force_disconnect_all(&self, sessions: &[ConnectionSession]) {
        let Some(force) = &self.inner.stack.force_disconnect else {
            debug!("no force-disconnect strategy configured");
            return;
        };
        let config = &self.inner.config;

        join_all(sessions.iter().map(|session| async move {
            let address = session.address();
            let attempt = force.force_disconnect(&config.adapter, address);
            match tokio::time::timeout(config.connect_timeout, attempt).await {
                Ok(Ok(())) => debug!(%address, "force-disconnected"),
                Ok(Err(e)) => debug!(%address, error = %e, "force-disconnect failed (ignored)"),
                Err(_) => debug!(%address, "force-disconnect timed out (ignored)"),
            }
        }))
        .await;
    }

    /// Run one bounded connect and classify how it ended.
    async fn attempt(&self, session: &ConnectionSession) -> FleetResult {
        let address = session.address();
        let limit = self.inner.config.connect_timeout;

        let outcome = match session.connect_within(limit).await {
            Ok(()) if session.state() == ConnectionState::Connected => Outcome::Connected,
            // Swallowed by the session (reconnect enabled); already logged there.
            Ok(()) => session.last_failure().map_or_else(
                || Outcome::FatalError(format!("session ended {}", session.state())),
                Outcome::from_failure,
            ),
            Err(err @ CoreError::Timeout { .. }) => {
                warn!(%address, error = %err, "connection attempt timed out");
                Outcome::TimedOut
            }
            Err(err) if err.is_abort() => {
                warn!(%address, error = %err, "connection attempt aborted");
                Outcome::Aborted
            }
            Err(err) => {
                let outcome = Outcome::from_failure(err.failure_reason());
                if let Outcome::TransientStackError(reason) = &outcome {
                    debug!(%address, error = %reason, "transient bluetooth stack error");
                } else {
                    error!(%address, error = %err, "failed to connect");
                }
                outcome
            }
        };

        FleetResult {
            address: address.clone(),
            outcome,
            state: session.state(),
        }
    }

    async fn close_sessions(&self) {
        let sessions = self.sessions();
        join_all(sessions.iter().map(ConnectionSession::close)).await;
    }

    /// Spawn the periodic retry task when configured.
    async fn spawn_supervisor(&self) {
        let config = &self.inner.config;
        if !config.reconnect || config.reconnect_interval.is_zero() {
            return;
        }

        let cancel = {
            let mut guard = self.inner.cancel.lock().await;
            if guard.is_cancelled() {
                *guard = CancellationToken::new();
            }
            guard.clone()
        };

        let fleet = self.clone();
        let period = config.reconnect_interval;
        self.inner
            .task_handles
            .lock()
            .await
            .push(tokio::spawn(supervise(fleet, period, cancel)));
    }

    /// Cancel and join background tasks.
    async fn stop_background(&self) {
        {
            let mut guard = self.inner.cancel.lock().await;
            guard.cancel();
            *guard = CancellationToken::new();
        }

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }
}

impl std::fmt::Debug for FleetOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetOrchestrator")
            .field("adapter", &self.inner.config.adapter)
            .field("sessions", &self.inner.sessions.len())
            .finish_non_exhaustive()
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Periodically retries sessions left disconnected.
async fn supervise(fleet: FleetOrchestrator, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    report = fleet.reconnect_disconnected() => {
                        if !report.is_empty() {
                            debug!(
                                retried = report.len(),
                                connected = report.connected_count(),
                                "reconnect pass complete"
                            );
                        }
                    }
                }
            }
        }
    }
    debug!("reconnect supervisor stopped");
}
