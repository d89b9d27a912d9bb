//! Portal session client. Drives the GlobalShortcuts request/response
//! handshake.
//!
//! Every request follows the same order: predict the Request path,
//! register it as pending, issue the method call, then wait for the
//! Response signal or the deadline. A signal pump task spawned on
//! `connect()` resolves pending requests and forwards activation
//! signals to the router.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::bus::{BoundShortcut, ShortcutSpec};
use super::paths;
use super::pending::PendingRequests;
use super::{BusConnector, BusSignal, PortalBus, PortalCall, PortalError, PortalResponse};
use crate::config::RegistryConfig;
use crate::hotkey::{Accelerator, HotkeyDefinition, RegistrationResult};
use crate::router::ActivationSignalRouter;

/// Lifecycle of the portal session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Bound,
    Destroyed,
}

/// The single portal session owned by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalSession {
    pub handle: String,
    pub state: SessionState,
    /// `false` when the handle is the locally predicted path because
    /// `CreateSession` never answered.
    pub confirmed: bool,
}

struct ActiveConnection<B> {
    bus: B,
    /// Sanitized unique name used in predicted paths.
    sender: String,
    pump: JoinHandle<()>,
}

/// Client for `org.freedesktop.portal.GlobalShortcuts`.
///
/// Owns at most one bus connection and one session. Methods take
/// `&mut self`, so a caller holding the client behind a lock gets
/// serialized requests.
pub struct PortalSessionClient<C: BusConnector> {
    connector: C,
    router: ActivationSignalRouter,
    pending: PendingRequests,
    request_timeout: Duration,
    verify_predicted_session: bool,
    parent_window: String,
    connection: Option<ActiveConnection<C::Bus>>,
    session: Option<PortalSession>,
}

impl<C: BusConnector> PortalSessionClient<C> {
    pub fn new(connector: C, router: ActivationSignalRouter, config: &RegistryConfig) -> Self {
        Self {
            connector,
            router,
            pending: PendingRequests::default(),
            request_timeout: config.request_timeout,
            verify_predicted_session: config.verify_predicted_session,
            parent_window: config.parent_window.clone(),
            connection: None,
            session: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// The live (not destroyed) session, if any.
    pub fn session(&self) -> Option<&PortalSession> {
        self.session
            .as_ref()
            .filter(|s| s.state != SessionState::Destroyed)
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Open the bus connection and start the signal pump. No-op when
    /// already connected.
    pub async fn connect(&mut self) -> Result<(), PortalError> {
        if self.connection.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let bus = self.connector.connect(tx).await?;
        let sender = paths::sender_token(bus.unique_name());
        let pump = tokio::spawn(pump_signals(rx, self.pending.clone(), self.router.clone()));

        tracing::info!(unique_name = bus.unique_name(), %sender, "portal connection opened");
        self.connection = Some(ActiveConnection { bus, sender, pump });
        Ok(())
    }

    /// Create a GlobalShortcuts session and return its handle.
    ///
    /// If the Response never arrives, the session path predicted from
    /// the session token is used instead (checked with `ListShortcuts`
    /// when verification is enabled).
    pub async fn create_session(&mut self) -> Result<String, PortalError> {
        let sender = self.sender()?.to_string();
        let handle_token = paths::handle_token("create");
        let session_handle_token = paths::handle_token("session");
        let predicted = paths::session_path(&sender, &session_handle_token);

        let outcome = self
            .request(PortalCall::CreateSession {
                handle_token,
                session_handle_token,
            })
            .await;

        let (handle, confirmed) = match outcome {
            Ok(PortalResponse { code: 0, session_handle: Some(handle), .. }) => (handle, true),
            Ok(PortalResponse { code: 0, .. }) => {
                return Err(PortalError::Protocol(
                    "CreateSession response carries no session_handle".into(),
                ));
            }
            Ok(PortalResponse { code, .. }) => return Err(PortalError::Response { code }),
            Err(PortalError::Timeout { after, .. }) => {
                tracing::warn!(
                    session = %predicted,
                    ?after,
                    "CreateSession unanswered, falling back to predicted session path"
                );
                (predicted, false)
            }
            Err(e) => return Err(e),
        };

        if !confirmed && self.verify_predicted_session {
            self.verify_session(&handle).await?;
        }

        tracing::info!(session = %handle, confirmed, "portal session created");
        self.session = Some(PortalSession {
            handle: handle.clone(),
            state: SessionState::Created,
            confirmed,
        });
        Ok(handle)
    }

    /// Bind the complete definition set to `session_handle` in one call.
    ///
    /// A non-zero Response code is a soft failure applied to every
    /// hotkey in the batch. Definitions whose accelerator does not parse
    /// fail individually and are left out of the call.
    pub async fn bind_shortcuts(
        &mut self,
        session_handle: &str,
        definitions: &[HotkeyDefinition],
    ) -> Result<Vec<RegistrationResult>, PortalError> {
        let mut invalid = Vec::new();
        let mut batch = Vec::new();
        let mut shortcuts = Vec::new();
        for def in definitions {
            match Accelerator::parse(&def.accelerator) {
                Ok(acc) => {
                    shortcuts.push(ShortcutSpec {
                        id: def.id.clone(),
                        description: def.description.clone(),
                        preferred_trigger: Some(acc.to_xdg_trigger()),
                    });
                    batch.push(def);
                }
                Err(e) => {
                    tracing::warn!(hotkey = %def.id, accelerator = %def.accelerator, error = %e, "skipping hotkey");
                    invalid.push(RegistrationResult::failed(&def.id, e.to_string()));
                }
            }
        }

        if shortcuts.is_empty() {
            return Ok(invalid);
        }

        tracing::debug!(session = session_handle, count = shortcuts.len(), "binding shortcuts");
        let response = self
            .request(PortalCall::BindShortcuts {
                session_handle: session_handle.to_string(),
                shortcuts,
                parent_window: self.parent_window.clone(),
                handle_token: paths::handle_token("bind"),
            })
            .await?;

        let mut results: Vec<RegistrationResult> = if response.code != 0 {
            let reason = format!(
                "portal declined binding (code {}: {})",
                response.code,
                super::response_reason(response.code)
            );
            tracing::warn!(code = response.code, "BindShortcuts declined");
            batch
                .iter()
                .map(|d| RegistrationResult::failed(&d.id, reason.as_str()))
                .collect()
        } else {
            if let Some(session) = self.session.as_mut().filter(|s| s.handle == session_handle) {
                session.state = SessionState::Bound;
            }
            let bound = response.shortcuts.unwrap_or_default();
            batch
                .iter()
                .map(|d| {
                    if bound.is_empty() || bound.iter().any(|b| b.id == d.id) {
                        RegistrationResult::ok(&d.id)
                    } else {
                        RegistrationResult::failed(&d.id, "not bound by portal")
                    }
                })
                .collect()
        };

        results.extend(invalid);
        Ok(results)
    }

    /// List the shortcuts bound to `session_handle`.
    pub async fn list_shortcuts(
        &self,
        session_handle: &str,
    ) -> Result<Vec<BoundShortcut>, PortalError> {
        let response = self
            .request(PortalCall::ListShortcuts {
                session_handle: session_handle.to_string(),
                handle_token: paths::handle_token("list"),
            })
            .await?;

        if response.code != 0 {
            return Err(PortalError::Response {
                code: response.code,
            });
        }
        Ok(response.shortcuts.unwrap_or_default())
    }

    /// Close the session and the connection, dropping every pending
    /// request. Idempotent; failures are logged, never returned.
    pub async fn destroy_session(&mut self) {
        let session = self.session.as_mut().filter(|s| s.state != SessionState::Destroyed);

        if let Some(conn) = self.connection.take() {
            if let Some(session) = &session
                && let Err(e) = conn.bus.close_session(&session.handle).await
            {
                tracing::debug!(session = %session.handle, error = %e, "Session.Close failed");
            }
            conn.pump.abort();
            match conn.bus.disconnect().await {
                Ok(()) => tracing::info!("portal connection closed"),
                Err(e) => tracing::warn!(error = %e, "portal disconnect failed"),
            }
        }

        if let Some(session) = session {
            session.state = SessionState::Destroyed;
        }
        self.pending.clear();
    }

    /// Full registration of a batch: destroy any previous session,
    /// connect, create a session, bind everything in one call.
    ///
    /// Never fails: every error becomes a per-hotkey result. An empty
    /// batch touches nothing.
    pub async fn register_batch(
        &mut self,
        definitions: &[HotkeyDefinition],
    ) -> Vec<RegistrationResult> {
        if definitions.is_empty() {
            return Vec::new();
        }

        if self.connection.is_some() {
            self.destroy_session().await;
        }

        match self.try_register(definitions).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(error = %e, count = definitions.len(), "portal registration failed");
                RegistrationResult::fail_all(definitions, &e.to_string())
            }
        }
    }

    async fn try_register(
        &mut self,
        definitions: &[HotkeyDefinition],
    ) -> Result<Vec<RegistrationResult>, PortalError> {
        self.connect().await?;
        let session = self.create_session().await?;
        self.bind_shortcuts(&session, definitions).await
    }

    async fn verify_session(&self, handle: &str) -> Result<(), PortalError> {
        match self.list_shortcuts(handle).await {
            Ok(shortcuts) => {
                tracing::info!(session = handle, existing = shortcuts.len(), "predicted session verified");
                Ok(())
            }
            Err(PortalError::Timeout { .. }) => {
                tracing::warn!(session = handle, "verification unanswered, trusting predicted session");
                Ok(())
            }
            Err(e) => Err(PortalError::Protocol(format!(
                "predicted session {handle} rejected: {e}"
            ))),
        }
    }

    /// Predict, register, call, wait.
    async fn request(&self, call: PortalCall) -> Result<PortalResponse, PortalError> {
        let conn = self
            .connection
            .as_ref()
            .ok_or_else(|| PortalError::Connection("not connected".into()))?;

        let method = call.method();
        let predicted = paths::request_path(&conn.sender, call.handle_token());
        let mut pending = self.pending.register(&predicted)?;
        tracing::debug!(method, path = %predicted, "issuing portal call");

        let actual = match conn.bus.call(call).await {
            Ok(path) => path,
            Err(e) => {
                pending.abandon();
                return Err(e);
            }
        };
        if actual != predicted {
            tracing::warn!(method, %predicted, %actual, "portal used an unexpected request path");
            if let Err(e) = pending.rekey(&actual) {
                pending.abandon();
                return Err(e);
            }
        }

        let response = pending.wait(self.request_timeout).await?;
        tracing::debug!(method, code = response.code, "portal response");
        Ok(response)
    }

    fn sender(&self) -> Result<&str, PortalError> {
        self.connection
            .as_ref()
            .map(|c| c.sender.as_str())
            .ok_or_else(|| PortalError::Connection("not connected".into()))
    }
}

/// Route bus signals until the connection's channel closes.
async fn pump_signals(
    mut rx: mpsc::UnboundedReceiver<BusSignal>,
    pending: PendingRequests,
    router: ActivationSignalRouter,
) {
    while let Some(signal) = rx.recv().await {
        match signal {
            BusSignal::Response { path, response } => {
                let result = response.map_err(PortalError::Protocol);
                if !pending.resolve(&path, result) {
                    tracing::debug!(%path, "response for no pending request, buffered");
                }
            }
            BusSignal::Activation(activation) => {
                router.dispatch(activation);
            }
        }
    }
    tracing::debug!("signal pump stopped");
}
