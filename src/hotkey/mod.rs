//! Hotkey model and registry.
//!
//! A collaborator supplies [`HotkeyDefinition`]s and per-hotkey enabled
//! flags; the [`registry::HotkeyRegistry`] registers the enabled set with
//! the platform and reports per-hotkey [`RegistrationResult`]s.

pub mod accelerator;
pub mod registry;

use std::fmt;
use std::str::FromStr;

use tokio::signal::unix::{SignalKind, signal as tokio_signal};

pub use accelerator::{Accelerator, AcceleratorError};
pub use registry::{HotkeyRegistry, PlatformHotkeyStatus, Strategy};

use crate::config::RegistryConfig;
use crate::format;
use crate::router::ActivationKind;

/// Error string reported when no registration strategy exists.
pub const UNSUPPORTED_PLATFORM: &str = "unsupported-platform";

/// Registry errors surfaced to collaborators.
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("unknown hotkey: {0}")]
    UnknownHotkey(String),
    #[error("invalid hotkey definition: {0}")]
    InvalidDefinition(String),
    #[error("no active portal session")]
    NoSession,
    #[error("portal: {0}")]
    Portal(#[from] crate::portal::PortalError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A hotkey the collaborator wants registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotkeyDefinition {
    pub id: String,
    /// Platform-neutral key combo, e.g. `"Ctrl+Shift+Space"`.
    pub accelerator: String,
    pub description: String,
    /// Persisted desired state.
    pub enabled_by_user: bool,
}

impl HotkeyDefinition {
    pub fn new(id: &str, accelerator: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            accelerator: accelerator.to_string(),
            description: description.to_string(),
            enabled_by_user: true,
        }
    }
}

/// Parses `ID=ACCELERATOR[=DESCRIPTION]` (the CLI `--hotkey` syntax).
impl FromStr for HotkeyDefinition {
    type Err = HotkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '=');
        let id = parts.next().unwrap_or_default().trim();
        let accelerator = parts.next().unwrap_or_default().trim();
        if id.is_empty() || accelerator.is_empty() {
            return Err(HotkeyError::InvalidDefinition(format!(
                "expected ID=ACCELERATOR, got {s:?}"
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(HotkeyError::InvalidDefinition(format!(
                "hotkey id may only contain [A-Za-z0-9_.-]: {id:?}"
            )));
        }
        let description = parts.next().map(str::trim).unwrap_or(id);
        Ok(Self::new(id, accelerator, description))
    }
}

/// Actual registration state of a hotkey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyState {
    Disabled,
    PendingRegistration,
    Registered,
    Failed,
}

impl fmt::Display for HotkeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disabled => "disabled",
            Self::PendingRegistration => "pending",
            Self::Registered => "registered",
            Self::Failed => "failed",
        })
    }
}

/// Outcome of registering one hotkey in a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationResult {
    pub hotkey_id: String,
    pub success: bool,
    pub error: Option<String>,
}

impl RegistrationResult {
    pub fn ok(hotkey_id: &str) -> Self {
        Self {
            hotkey_id: hotkey_id.to_string(),
            success: true,
            error: None,
        }
    }

    pub fn failed(hotkey_id: &str, error: impl Into<String>) -> Self {
        Self {
            hotkey_id: hotkey_id.to_string(),
            success: false,
            error: Some(error.into()),
        }
    }

    /// The same failure for every definition in a batch.
    pub fn fail_all(definitions: &[HotkeyDefinition], error: &str) -> Vec<Self> {
        definitions
            .iter()
            .map(|d| Self::failed(&d.id, error))
            .collect()
    }
}

/// Run the hotkey daemon.
///
/// Registers the enabled definitions, prints activations as they arrive
/// and runs until SIGINT/SIGTERM, then unregisters everything. SIGUSR1
/// prints activation statistics, SIGUSR2 clears them.
pub async fn run(
    mut definitions: Vec<HotkeyDefinition>,
    disabled: Vec<String>,
    config: RegistryConfig,
) -> Result<(), HotkeyError> {
    for id in &disabled {
        let def = definitions
            .iter_mut()
            .find(|d| d.id == *id)
            .ok_or_else(|| HotkeyError::UnknownHotkey(id.clone()))?;
        def.enabled_by_user = false;
    }

    let registry = HotkeyRegistry::for_session(definitions, &config);
    for def in registry.definitions() {
        let id = def.id.clone();
        registry.on_activation(&def.id, move |kind| match kind {
            ActivationKind::Activated => println!("{id} activated"),
            ActivationKind::Deactivated => println!("{id} released"),
        });
    }
    format::print_platform(registry.platform_status(), registry.strategy());

    let mut sig_term = tokio_signal(SignalKind::terminate())?;
    let mut sig_int = tokio_signal(SignalKind::interrupt())?;
    let mut sig_usr1 = tokio_signal(SignalKind::user_defined1())?;
    let mut sig_usr2 = tokio_signal(SignalKind::user_defined2())?;

    registry.register_shortcuts().await;
    format::print_status(
        &registry.platform_hotkey_status(),
        &registry.definitions(),
        |id| registry.hotkey_state(id),
    );
    if registry.strategy() == Strategy::Portal
        && registry.platform_hotkey_status().global_hotkeys_enabled
    {
        match registry.verify_bound_shortcuts().await {
            Ok(bound) => format::print_bound(&bound),
            Err(e) => tracing::warn!(error = %e, "could not list bound shortcuts"),
        }
    }

    tracing::info!("hotkey daemon running, press Ctrl+C to stop");
    loop {
        tokio::select! {
            _ = sig_usr1.recv() => {
                format::print_stats(&registry.activation_signal_stats());
            }
            _ = sig_usr2.recv() => {
                registry.clear_activation_signal_history();
                tracing::info!("activation history cleared");
            }
            _ = sig_term.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }
            _ = sig_int.recv() => {
                tracing::info!("received SIGINT, shutting down");
                break;
            }
        }
    }

    registry.unregister_all().await;
    tracing::info!("hotkey daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_from_cli_syntax() {
        let def: HotkeyDefinition = "quickChat=Ctrl+Shift+Space".parse().unwrap();
        assert_eq!(def.id, "quickChat");
        assert_eq!(def.accelerator, "Ctrl+Shift+Space");
        assert_eq!(def.description, "quickChat");
        assert!(def.enabled_by_user);
    }

    #[test]
    fn definition_with_description() {
        let def: HotkeyDefinition = "toggle=Super+F1=Show or hide the window".parse().unwrap();
        assert_eq!(def.accelerator, "Super+F1");
        assert_eq!(def.description, "Show or hide the window");
    }

    #[test]
    fn definition_rejects_malformed() {
        assert!("quickChat".parse::<HotkeyDefinition>().is_err());
        assert!("=Ctrl+A".parse::<HotkeyDefinition>().is_err());
        assert!("quick chat=Ctrl+A".parse::<HotkeyDefinition>().is_err());
    }

    #[test]
    fn fail_all_covers_batch() {
        let defs = vec![
            HotkeyDefinition::new("a", "Ctrl+A", "a"),
            HotkeyDefinition::new("b", "Ctrl+B", "b"),
        ];
        let results = RegistrationResult::fail_all(&defs, "boom");
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.success));
        assert!(results.iter().all(|r| r.error.as_deref() == Some("boom")));
        assert_eq!(results[1].hotkey_id, "b");
    }
}
