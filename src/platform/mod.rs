//! Platform probe: session type, desktop environment, portal support.
//!
//! Detection runs once per process. [`probe`] captures a
//! [`SessionEnvironment`] snapshot, derives a [`PlatformStatus`] from it,
//! and caches the result for the process lifetime.

mod environment;

use std::fmt;
use std::sync::OnceLock;

pub use environment::{PortalBackend, SessionEnvironment};

/// Portal backend interface that implements global shortcuts.
const GLOBAL_SHORTCUTS_BACKEND: &str = "org.freedesktop.impl.portal.GlobalShortcuts";

/// First GNOME release whose portal backend implements GlobalShortcuts.
const GNOME_GLOBAL_SHORTCUTS_MAJOR: u32 = 48;

/// Desktop environments the probe distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopEnvironment {
    Kde,
    Gnome,
    Hyprland,
    Sway,
    Cosmic,
    Deepin,
    Unknown,
}

impl DesktopEnvironment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kde => "kde",
            Self::Gnome => "gnome",
            Self::Hyprland => "hyprland",
            Self::Sway => "sway",
            Self::Cosmic => "cosmic",
            Self::Deepin => "deepin",
            Self::Unknown => "unknown",
        }
    }

    /// Match a `XDG_CURRENT_DESKTOP` / `DESKTOP_SESSION` component.
    fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "kde" | "plasma" | "plasmawayland" | "plasma-wayland" => Some(Self::Kde),
            "gnome" | "gnome-wayland" | "gnome-classic" => Some(Self::Gnome),
            "hyprland" => Some(Self::Hyprland),
            "sway" => Some(Self::Sway),
            "cosmic" => Some(Self::Cosmic),
            "deepin" | "dde" => Some(Self::Deepin),
            _ => None,
        }
    }

    /// Match a compositor or shell process name.
    fn from_process(name: &str) -> Option<Self> {
        match name {
            "plasmashell" | "kwin_wayland" => Some(Self::Kde),
            "gnome-shell" => Some(Self::Gnome),
            "Hyprland" => Some(Self::Hyprland),
            "sway" => Some(Self::Sway),
            "cosmic-comp" => Some(Self::Cosmic),
            "dde-session" | "dde-desktop" => Some(Self::Deepin),
            _ => None,
        }
    }
}

impl fmt::Display for DesktopEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How global shortcuts can be registered on this platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalMethod {
    /// The host toolkit grabs shortcuts through its own compositor
    /// integration.
    ChromiumFlag,
    /// Speak the portal protocol on a desktop known to implement it.
    DbusDirect,
    /// Speak the portal protocol on a desktop whose support is unverified.
    DbusFallback,
    None,
}

impl PortalMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChromiumFlag => "chromium-flag",
            Self::DbusDirect => "dbus-direct",
            Self::DbusFallback => "dbus-fallback",
            Self::None => "none",
        }
    }

    /// Whether registration goes through the portal session client.
    pub fn uses_portal(self) -> bool {
        matches!(self, Self::DbusDirect | Self::DbusFallback)
    }
}

impl fmt::Display for PortalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of platform detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformStatus {
    pub is_wayland: bool,
    pub desktop_environment: DesktopEnvironment,
    pub desktop_environment_version: Option<String>,
    pub portal_available: bool,
    pub portal_method: PortalMethod,
}

/// Detect the platform once and return the cached status.
///
/// `toolkit_shortcuts` only matters on the first call.
pub fn probe(toolkit_shortcuts: bool) -> &'static PlatformStatus {
    static STATUS: OnceLock<PlatformStatus> = OnceLock::new();
    STATUS.get_or_init(|| {
        let env = SessionEnvironment::capture();
        let status = detect(&env, toolkit_shortcuts);
        tracing::info!(
            wayland = status.is_wayland,
            desktop = %status.desktop_environment,
            version = status.desktop_environment_version.as_deref().unwrap_or("-"),
            portal = status.portal_available,
            method = %status.portal_method,
            "platform detected"
        );
        status
    })
}

/// Derive the platform status from a session snapshot.
pub fn detect(env: &SessionEnvironment, toolkit_shortcuts: bool) -> PlatformStatus {
    let is_wayland = detect_wayland(env);
    let desktop_environment = detect_desktop(env);
    let desktop_environment_version = desktop_version(env, desktop_environment);
    let portal_available = detect_portal(env, desktop_environment);
    let portal_method = select_method(
        is_wayland,
        desktop_environment,
        desktop_environment_version.as_deref(),
        portal_available,
        toolkit_shortcuts,
    );

    PlatformStatus {
        is_wayland,
        desktop_environment,
        desktop_environment_version,
        portal_available,
        portal_method,
    }
}

fn detect_wayland(env: &SessionEnvironment) -> bool {
    match env.var("XDG_SESSION_TYPE") {
        Some(kind) => kind.eq_ignore_ascii_case("wayland"),
        None => env.var("WAYLAND_DISPLAY").is_some(),
    }
}

fn detect_desktop(env: &SessionEnvironment) -> DesktopEnvironment {
    if let Some(current) = env.var("XDG_CURRENT_DESKTOP")
        && let Some(de) = current.split(':').find_map(DesktopEnvironment::from_name)
    {
        return de;
    }

    if let Some(de) = env
        .var("DESKTOP_SESSION")
        .and_then(DesktopEnvironment::from_name)
    {
        return de;
    }

    if env.var("HYPRLAND_INSTANCE_SIGNATURE").is_some() {
        return DesktopEnvironment::Hyprland;
    }
    if env.var("SWAYSOCK").is_some() {
        return DesktopEnvironment::Sway;
    }

    env.processes
        .iter()
        .find_map(|p| DesktopEnvironment::from_process(p))
        .unwrap_or(DesktopEnvironment::Unknown)
}

fn desktop_version(env: &SessionEnvironment, de: DesktopEnvironment) -> Option<String> {
    match de {
        DesktopEnvironment::Kde => env.var("KDE_SESSION_VERSION").map(str::to_string),
        DesktopEnvironment::Gnome => env.gnome_version.clone(),
        _ => None,
    }
}

/// The frontend is advertised and some backend usable here implements
/// GlobalShortcuts.
fn detect_portal(env: &SessionEnvironment, de: DesktopEnvironment) -> bool {
    if !env.portal_service {
        return false;
    }

    let current: Vec<String> = env
        .var("XDG_CURRENT_DESKTOP")
        .map(|v| v.split(':').map(str::to_lowercase).collect())
        .unwrap_or_else(|| vec![de.as_str().to_string()]);

    env.portal_backends.iter().any(|backend| {
        backend
            .interfaces
            .iter()
            .any(|i| i == GLOBAL_SHORTCUTS_BACKEND)
            && (backend.use_in.is_empty() || backend.use_in.iter().any(|u| current.contains(u)))
    })
}

fn select_method(
    is_wayland: bool,
    de: DesktopEnvironment,
    version: Option<&str>,
    portal_available: bool,
    toolkit_shortcuts: bool,
) -> PortalMethod {
    if !is_wayland || !portal_available {
        return PortalMethod::None;
    }

    let gnome_supported = de == DesktopEnvironment::Gnome
        && version
            .and_then(|v| v.split('.').next())
            .and_then(|major| major.parse::<u32>().ok())
            .is_some_and(|major| major >= GNOME_GLOBAL_SHORTCUTS_MAJOR);

    let toolkit_capable = de == DesktopEnvironment::Kde || gnome_supported;
    if toolkit_shortcuts && toolkit_capable {
        return PortalMethod::ChromiumFlag;
    }

    match de {
        DesktopEnvironment::Kde | DesktopEnvironment::Hyprland | DesktopEnvironment::Cosmic => {
            PortalMethod::DbusDirect
        }
        DesktopEnvironment::Gnome if gnome_supported => PortalMethod::DbusDirect,
        _ => PortalMethod::DbusFallback,
    }
}
