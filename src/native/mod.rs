//! Native (non-portal) shortcut backends.
//!
//! Used when the platform probe selects the native strategy: X11
//! sessions get root-window key grabs, anything else gets a backend that
//! refuses every hotkey so the failure shows up in registration results.

pub mod x11;

pub use x11::X11Shortcuts;

use crate::hotkey::{AcceleratorError, HotkeyDefinition, RegistrationResult};
use crate::platform::PlatformStatus;
use crate::router::ActivationSignalRouter;

/// Error string reported when no native backend is available.
pub const NATIVE_UNAVAILABLE: &str = "native-unavailable";

/// Errors raised while registering native grabs.
#[derive(Debug, thiserror::Error)]
pub enum NativeError {
    /// Display connection or request failure.
    #[error("X11: {0}")]
    X11(String),

    /// Another client already holds the grab.
    #[error("key grab conflict: {0}")]
    Conflict(String),

    #[error("keysym 0x{0:04x} not found in keyboard mapping")]
    UnmappedKeysym(u32),

    #[error(transparent)]
    Accelerator(#[from] AcceleratorError),
}

/// A backend that registers hotkeys without the portal.
///
/// Activations are delivered through the router passed to `register`.
pub trait NativeShortcuts: Send {
    /// Replace every registered hotkey with `definitions`.
    fn register(
        &mut self,
        definitions: &[HotkeyDefinition],
        router: &ActivationSignalRouter,
    ) -> Vec<RegistrationResult>;

    /// Drop every registration. Idempotent.
    fn unregister_all(&mut self);
}

/// Backend for sessions with no native path.
#[derive(Debug, Default)]
pub struct UnavailableShortcuts;

impl NativeShortcuts for UnavailableShortcuts {
    fn register(
        &mut self,
        definitions: &[HotkeyDefinition],
        _router: &ActivationSignalRouter,
    ) -> Vec<RegistrationResult> {
        RegistrationResult::fail_all(definitions, NATIVE_UNAVAILABLE)
    }

    fn unregister_all(&mut self) {}
}

/// Pick the native backend for this session.
///
/// Only X11 sessions have one. On Wayland the toolkit flag path relies
/// on the host toolkit's own compositor integration, which this process
/// does not have.
pub fn for_status(status: &PlatformStatus) -> Box<dyn NativeShortcuts> {
    if status.is_wayland {
        Box::new(UnavailableShortcuts)
    } else {
        Box::new(X11Shortcuts::new())
    }
}
