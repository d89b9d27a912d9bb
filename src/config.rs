//! Runtime configuration for the hotkey registry and portal client.

use std::time::Duration;

/// Default bound on how long a portal request waits for its Response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of activation signals retained for diagnostics.
pub const DEFAULT_HISTORY_DEPTH: usize = 64;

/// Registry configuration.
///
/// Built from CLI flags in `main.rs`; tests construct it directly.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long a portal request waits for its Response signal.
    pub request_timeout: Duration,
    /// Maximum activation signals kept in the diagnostic history.
    pub history_depth: usize,
    /// Whether activation signals are recorded at all.
    pub track_signals: bool,
    /// Check a predicted (unconfirmed) session path with `ListShortcuts`
    /// before binding against it.
    pub verify_predicted_session: bool,
    /// The host toolkit can grab shortcuts through its own compositor
    /// integration.
    pub toolkit_shortcuts: bool,
    /// Parent window identifier passed to `BindShortcuts`.
    pub parent_window: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            history_depth: DEFAULT_HISTORY_DEPTH,
            track_signals: true,
            verify_predicted_session: true,
            toolkit_shortcuts: false,
            parent_window: String::new(),
        }
    }
}
