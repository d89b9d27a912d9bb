//! Bus abstraction between the session client and the message bus.
//!
//! [`PortalSessionClient`](super::PortalSessionClient) never touches
//! zbus directly. It talks to a [`PortalBus`] obtained from a
//! [`BusConnector`], and receives every relevant signal as a
//! [`BusSignal`] on the channel it hands to `connect`.

use std::future::Future;

use tokio::sync::mpsc;

use super::PortalError;
use super::dbus::{DbusBus, DbusConnector};
use crate::platform::PortalMethod;
use crate::router::ActivationSignal;

/// One shortcut in a `BindShortcuts` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutSpec {
    pub id: String,
    pub description: String,
    /// XDG trigger syntax; `None` lets the portal pick.
    pub preferred_trigger: Option<String>,
}

/// Portal method calls that are answered through a Request object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalCall {
    CreateSession {
        handle_token: String,
        session_handle_token: String,
    },
    BindShortcuts {
        session_handle: String,
        shortcuts: Vec<ShortcutSpec>,
        parent_window: String,
        handle_token: String,
    },
    ListShortcuts {
        session_handle: String,
        handle_token: String,
    },
}

impl PortalCall {
    pub fn method(&self) -> &'static str {
        match self {
            Self::CreateSession { .. } => "CreateSession",
            Self::BindShortcuts { .. } => "BindShortcuts",
            Self::ListShortcuts { .. } => "ListShortcuts",
        }
    }

    pub fn handle_token(&self) -> &str {
        match self {
            Self::CreateSession { handle_token, .. }
            | Self::BindShortcuts { handle_token, .. }
            | Self::ListShortcuts { handle_token, .. } => handle_token,
        }
    }
}

/// A shortcut as reported back by the portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundShortcut {
    pub id: String,
    pub description: Option<String>,
    /// Human-readable trigger chosen by the user or compositor.
    pub trigger_description: Option<String>,
}

/// Decoded `Request.Response` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortalResponse {
    pub code: u32,
    /// `session_handle` result of `CreateSession`.
    pub session_handle: Option<String>,
    /// `shortcuts` result of `BindShortcuts` / `ListShortcuts`.
    pub shortcuts: Option<Vec<BoundShortcut>>,
}

/// Signals the bus forwards to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusSignal {
    /// `Request.Response` on `path`. `Err` carries a decode failure.
    Response {
        path: String,
        response: Result<PortalResponse, String>,
    },
    /// `GlobalShortcuts.Activated` or `Deactivated`.
    Activation(ActivationSignal),
}

/// An open connection to the portal.
pub trait PortalBus: Send + Sync + 'static {
    /// The caller's unique bus name (`:1.42`).
    fn unique_name(&self) -> &str;

    /// Issue a portal method call and return the Request object path
    /// the portal reports.
    fn call(&self, call: PortalCall) -> impl Future<Output = Result<String, PortalError>> + Send;

    /// `Session.Close` on a session object.
    fn close_session(
        &self,
        session_handle: &str,
    ) -> impl Future<Output = Result<(), PortalError>> + Send;

    /// Close the connection. Signal delivery stops.
    fn disconnect(self) -> impl Future<Output = Result<(), PortalError>> + Send;
}

/// Opens [`PortalBus`] connections.
pub trait BusConnector: Send + Sync {
    type Bus: PortalBus;

    /// Connect and start forwarding Response and activation signals to
    /// `signals`.
    fn connect(
        &self,
        signals: mpsc::UnboundedSender<BusSignal>,
    ) -> impl Future<Output = Result<Self::Bus, PortalError>> + Send;
}

/// Connector chosen from the platform's portal method.
///
/// Platforms that never take the portal path get `Disabled`, which
/// refuses to connect instead of opening a session bus connection.
#[derive(Debug, Clone)]
pub enum SessionBusConnector {
    Dbus(DbusConnector),
    Disabled,
}

impl SessionBusConnector {
    pub fn for_method(method: PortalMethod) -> Self {
        if method.uses_portal() {
            Self::Dbus(DbusConnector)
        } else {
            Self::Disabled
        }
    }
}

impl BusConnector for SessionBusConnector {
    type Bus = DbusBus;

    async fn connect(
        &self,
        signals: mpsc::UnboundedSender<BusSignal>,
    ) -> Result<DbusBus, PortalError> {
        match self {
            Self::Dbus(connector) => connector.connect(signals).await,
            Self::Disabled => Err(PortalError::UnsupportedPlatform),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_follows_method() {
        assert!(matches!(
            SessionBusConnector::for_method(PortalMethod::DbusDirect),
            SessionBusConnector::Dbus(_)
        ));
        assert!(matches!(
            SessionBusConnector::for_method(PortalMethod::DbusFallback),
            SessionBusConnector::Dbus(_)
        ));
        assert!(matches!(
            SessionBusConnector::for_method(PortalMethod::ChromiumFlag),
            SessionBusConnector::Disabled
        ));
        assert!(matches!(
            SessionBusConnector::for_method(PortalMethod::None),
            SessionBusConnector::Disabled
        ));
    }

    #[tokio::test]
    async fn disabled_connector_refuses() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = SessionBusConnector::Disabled.connect(tx).await;
        assert!(matches!(result, Err(PortalError::UnsupportedPlatform)));
    }

    #[test]
    fn call_metadata() {
        let call = PortalCall::ListShortcuts {
            session_handle: "/s".into(),
            handle_token: "list_1".into(),
        };
        assert_eq!(call.method(), "ListShortcuts");
        assert_eq!(call.handle_token(), "list_1");
    }
}
