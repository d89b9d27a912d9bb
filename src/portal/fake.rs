//! Scriptable in-memory portal for tests.
//!
//! Records every call in order and answers per scripted [`Reply`].
//! Unscripted calls succeed. Responses are pushed onto the signal
//! channel before `call()` returns, which is the ordering the pending
//! table has to survive.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;

use super::bus::{BoundShortcut, ShortcutSpec};
use super::paths;
use super::{BusConnector, BusSignal, PortalBus, PortalCall, PortalError, PortalResponse};

/// Scripted answer to one method call.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Emit this Response (defaults are filled in for `code == 0`).
    Respond(PortalResponse),
    /// Accept the call, never respond.
    Silent,
    /// Fail the method call itself.
    Reject(String),
    /// Emit an undecodable Response.
    Malformed(String),
    /// Report a request path other than the predicted one and respond
    /// there shortly after.
    Relocate,
    /// Respond on a relocated path and let the signal pump see it before
    /// `call()` returns that path.
    RelocateEarly(PortalResponse),
}

#[derive(Default)]
struct FakeState {
    log: Vec<String>,
    replies: HashMap<&'static str, VecDeque<Reply>>,
    connect_error: Option<String>,
    connections: u32,
    signals: Option<mpsc::UnboundedSender<BusSignal>>,
    calls: Vec<PortalCall>,
    bound: Vec<ShortcutSpec>,
}

/// Fake connector; clones share state.
#[derive(Clone, Default)]
pub struct FakePortal {
    state: Arc<Mutex<FakeState>>,
}

pub struct FakeBus {
    portal: FakePortal,
    unique_name: String,
    signals: mpsc::UnboundedSender<BusSignal>,
}

impl FakePortal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next call of `method`.
    pub fn script(&self, method: &'static str, reply: Reply) {
        self.lock()
            .replies
            .entry(method)
            .or_default()
            .push_back(reply);
    }

    pub fn fail_connect(&self, message: &str) {
        self.lock().connect_error = Some(message.to_string());
    }

    /// Ordered log: `connect`, method names, `Close`, `disconnect`.
    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.lock().log.iter().filter(|l| *l == entry).count()
    }

    /// Shortcuts of the most recent `BindShortcuts` call.
    pub fn bound_shortcuts(&self) -> Vec<ShortcutSpec> {
        self.lock()
            .calls
            .iter()
            .rev()
            .find_map(|c| match c {
                PortalCall::BindShortcuts { shortcuts, .. } => Some(shortcuts.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Session handle of the most recent `BindShortcuts` call.
    pub fn bound_session(&self) -> Option<String> {
        self.lock().calls.iter().rev().find_map(|c| match c {
            PortalCall::BindShortcuts { session_handle, .. } => Some(session_handle.clone()),
            _ => None,
        })
    }

    /// Session token of the most recent `CreateSession` call.
    pub fn session_token(&self) -> Option<String> {
        self.lock().calls.iter().rev().find_map(|c| match c {
            PortalCall::CreateSession {
                session_handle_token,
                ..
            } => Some(session_handle_token.clone()),
            _ => None,
        })
    }

    /// Push a signal as if the portal emitted it. `false` when no
    /// connection is open.
    pub fn emit(&self, signal: BusSignal) -> bool {
        match &self.lock().signals {
            Some(tx) => tx.send(signal).is_ok(),
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

impl BusConnector for FakePortal {
    type Bus = FakeBus;

    async fn connect(
        &self,
        signals: mpsc::UnboundedSender<BusSignal>,
    ) -> Result<FakeBus, PortalError> {
        let mut state = self.lock();
        if let Some(message) = &state.connect_error {
            return Err(PortalError::Connection(message.clone()));
        }
        state.log.push("connect".into());
        state.connections += 1;
        state.signals = Some(signals.clone());

        Ok(FakeBus {
            portal: self.clone(),
            unique_name: format!(":1.{}", state.connections),
            signals,
        })
    }
}

impl PortalBus for FakeBus {
    fn unique_name(&self) -> &str {
        &self.unique_name
    }

    async fn call(&self, call: PortalCall) -> Result<String, PortalError> {
        let sender = paths::sender_token(&self.unique_name);
        let path = paths::request_path(&sender, call.handle_token());
        let method = call.method();

        let (reply, scripted, bound) = {
            let mut state = self.portal.lock();
            state.log.push(method.to_string());
            state.calls.push(call.clone());
            let scripted = state.replies.get_mut(method).and_then(VecDeque::pop_front);
            let is_scripted = scripted.is_some();
            let reply = scripted.unwrap_or(Reply::Respond(PortalResponse::default()));
            (reply, is_scripted, state.bound.clone())
        };

        match reply {
            Reply::Respond(mut response) => {
                if response.code == 0 {
                    match &call {
                        PortalCall::CreateSession {
                            session_handle_token,
                            ..
                        } if !scripted => {
                            response.session_handle =
                                Some(paths::session_path(&sender, session_handle_token));
                        }
                        PortalCall::BindShortcuts { shortcuts, .. } => {
                            self.portal.lock().bound = shortcuts.clone();
                        }
                        PortalCall::ListShortcuts { .. } if response.shortcuts.is_none() => {
                            response.shortcuts = Some(
                                bound
                                    .iter()
                                    .map(|s| BoundShortcut {
                                        id: s.id.clone(),
                                        description: Some(s.description.clone()),
                                        trigger_description: s.preferred_trigger.clone(),
                                    })
                                    .collect(),
                            );
                        }
                        _ => {}
                    }
                }
                let _ = self.signals.send(BusSignal::Response {
                    path: path.clone(),
                    response: Ok(response),
                });
                Ok(path)
            }
            Reply::Silent => Ok(path),
            Reply::Reject(message) => Err(PortalError::Protocol(message)),
            Reply::Malformed(message) => {
                let _ = self.signals.send(BusSignal::Response {
                    path: path.clone(),
                    response: Err(message),
                });
                Ok(path)
            }
            Reply::Relocate => {
                let actual = format!("{path}_relocated");
                let tx = self.signals.clone();
                let target = actual.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    let _ = tx.send(BusSignal::Response {
                        path: target,
                        response: Ok(PortalResponse::default()),
                    });
                });
                Ok(actual)
            }
            Reply::RelocateEarly(response) => {
                let actual = format!("{path}_relocated");
                let _ = self.signals.send(BusSignal::Response {
                    path: actual.clone(),
                    response: Ok(response),
                });
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(actual)
            }
        }
    }

    async fn close_session(&self, _session_handle: &str) -> Result<(), PortalError> {
        self.portal.lock().log.push("Close".into());
        Ok(())
    }

    async fn disconnect(self) -> Result<(), PortalError> {
        let mut state = self.portal.lock();
        state.log.push("disconnect".into());
        state.signals = None;
        Ok(())
    }
}
