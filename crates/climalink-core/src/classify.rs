// ── Failure classification ──
//
// BLE stacks report most failures as free-form strings. Everything that
// decides "noise or real problem" goes through `classify_failure`, so the
// matching can later move to typed transport codes without touching callers.

/// The link was torn down under us by the local stack. Harmless; the next
/// attempt usually succeeds.
pub const BENIGN_DISCONNECT_PATTERNS: &[&str] = &["software caused connection abort"];

/// Known Bluetooth stack noise: concurrent operations, BlueZ cancellations,
/// and D-Bus plumbing errors.
pub const STACK_NOISE_PATTERNS: &[&str] = &[
    "operation already in progress",
    "br-connection-canceled",
    "dbus",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    BenignDisconnect,
    StackNoise,
    Reportable,
}

impl FailureClass {
    /// Transient failures are logged at debug and never escalated.
    pub fn is_transient(self) -> bool {
        !matches!(self, Self::Reportable)
    }
}

/// Classify a connect/subscribe failure by its message (case-insensitive).
pub fn classify_failure(message: &str) -> FailureClass {
    let lowered = message.to_lowercase();
    if BENIGN_DISCONNECT_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
    {
        FailureClass::BenignDisconnect
    } else if STACK_NOISE_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
    {
        FailureClass::StackNoise
    } else {
        FailureClass::Reportable
    }
}
