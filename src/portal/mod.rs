//! XDG Desktop Portal `GlobalShortcuts` client.
//!
//! The portal answers method calls asynchronously: each call returns a
//! Request object path and the real reply arrives later as a
//! `Request.Response` signal on that path. The client predicts the path
//! from its bus name and a caller-chosen handle token, registers a
//! pending entry for it, and only then issues the call.
//!
//! Layout:
//! - [`bus`]: the bus abstraction (`BusConnector` / `PortalBus`) and the
//!   signal and call types that cross it
//! - [`dbus`]: the zbus implementation over the session bus
//! - [`paths`]: token generation and object-path prediction
//! - [`pending`]: the path-keyed pending-request table
//! - [`client`]: the session state machine

pub mod bus;
pub mod client;
pub mod dbus;
#[cfg(test)]
pub mod fake;
pub mod paths;
pub mod pending;

use std::time::Duration;

pub use bus::{BusConnector, BusSignal, PortalBus, PortalCall, PortalResponse, SessionBusConnector};
pub use client::{PortalSession, PortalSessionClient, SessionState};

pub const PORTAL_DESTINATION: &str = "org.freedesktop.portal.Desktop";
pub const PORTAL_PATH: &str = "/org/freedesktop/portal/desktop";
pub const GLOBAL_SHORTCUTS_INTERFACE: &str = "org.freedesktop.portal.GlobalShortcuts";
pub const REQUEST_INTERFACE: &str = "org.freedesktop.portal.Request";
pub const SESSION_INTERFACE: &str = "org.freedesktop.portal.Session";

/// Portal protocol errors.
///
/// None of these escape [`PortalSessionClient::register_batch`]; they are
/// turned into per-hotkey registration results there.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortalError {
    /// Session bus unreachable or the connection dropped.
    #[error("connection: {0}")]
    Connection(String),
    /// Malformed or unexpected payload, or a rejected method call.
    #[error("protocol: {0}")]
    Protocol(String),
    /// The Response signal carried a non-zero code.
    #[error("portal responded with code {code}")]
    Response { code: u32 },
    /// No Response signal within the deadline.
    #[error("no response on {path} within {after:?}")]
    Timeout { path: String, after: Duration },
    /// A request for this object path is already outstanding.
    #[error("request already pending on {0}")]
    RequestPending(String),
    #[error("unsupported-platform")]
    UnsupportedPlatform,
}

/// Meaning of a `Request.Response` code.
pub fn response_reason(code: u32) -> &'static str {
    match code {
        0 => "success",
        1 => "cancelled by user",
        _ => "ended in another way",
    }
}
