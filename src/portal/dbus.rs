//! zbus implementation of the portal bus over the session bus.
//!
//! Signals are received through explicit bus match rules (one for
//! `Request.Response`, one each for `GlobalShortcuts.Activated` and
//! `Deactivated`) rather than through a generated proxy, so delivery
//! does not depend on proxy-level signal semantics of the portal daemon.

use std::collections::HashMap;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use zbus::message::Type as MessageType;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};
use zbus::{Connection, MatchRule, Message, MessageStream};

use super::bus::BoundShortcut;
use super::{
    BusConnector, BusSignal, GLOBAL_SHORTCUTS_INTERFACE, PORTAL_DESTINATION, PORTAL_PATH,
    PortalBus, PortalCall, PortalError, PortalResponse, REQUEST_INTERFACE, SESSION_INTERFACE,
    paths,
};
use crate::router::{ActivationKind, ActivationSignal};

/// Opens session bus connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct DbusConnector;

/// A live session bus connection with its signal listeners.
pub struct DbusBus {
    conn: Connection,
    unique_name: String,
    listeners: Vec<JoinHandle<()>>,
}

impl BusConnector for DbusConnector {
    type Bus = DbusBus;

    async fn connect(
        &self,
        signals: mpsc::UnboundedSender<BusSignal>,
    ) -> Result<DbusBus, PortalError> {
        let conn = Connection::session()
            .await
            .map_err(|e| PortalError::Connection(format!("session bus: {e}")))?;
        let unique_name = conn
            .unique_name()
            .map(|n| n.to_string())
            .ok_or_else(|| PortalError::Connection("bus assigned no unique name".into()))?;
        let sender = paths::sender_token(&unique_name);

        let responses = subscribe(&conn, REQUEST_INTERFACE, "Response").await?;
        let activated = subscribe(&conn, GLOBAL_SHORTCUTS_INTERFACE, "Activated").await?;
        let deactivated = subscribe(&conn, GLOBAL_SHORTCUTS_INTERFACE, "Deactivated").await?;
        tracing::debug!(%unique_name, "portal match rules installed");

        let listeners = vec![
            tokio::spawn(forward_responses(responses, sender, signals.clone())),
            tokio::spawn(forward_activations(activated, deactivated, signals)),
        ];

        Ok(DbusBus {
            conn,
            unique_name,
            listeners,
        })
    }
}

impl PortalBus for DbusBus {
    fn unique_name(&self) -> &str {
        &self.unique_name
    }

    async fn call(&self, call: PortalCall) -> Result<String, PortalError> {
        let method = call.method();
        let reply = match &call {
            PortalCall::CreateSession {
                handle_token,
                session_handle_token,
            } => {
                let options = HashMap::from([
                    ("handle_token", Value::from(handle_token.as_str())),
                    ("session_handle_token", Value::from(session_handle_token.as_str())),
                ]);
                self.conn
                    .call_method(
                        Some(PORTAL_DESTINATION),
                        PORTAL_PATH,
                        Some(GLOBAL_SHORTCUTS_INTERFACE),
                        method,
                        &(options,),
                    )
                    .await
            }
            PortalCall::BindShortcuts {
                session_handle,
                shortcuts,
                parent_window,
                handle_token,
            } => {
                let session = object_path(session_handle)?;
                let shortcuts: Vec<(&str, HashMap<&str, Value<'_>>)> = shortcuts
                    .iter()
                    .map(|s| {
                        let mut props = HashMap::from([(
                            "description",
                            Value::from(s.description.as_str()),
                        )]);
                        if let Some(trigger) = &s.preferred_trigger {
                            props.insert("preferred_trigger", Value::from(trigger.as_str()));
                        }
                        (s.id.as_str(), props)
                    })
                    .collect();
                let options = HashMap::from([("handle_token", Value::from(handle_token.as_str()))]);
                self.conn
                    .call_method(
                        Some(PORTAL_DESTINATION),
                        PORTAL_PATH,
                        Some(GLOBAL_SHORTCUTS_INTERFACE),
                        method,
                        &(session, shortcuts, parent_window.as_str(), options),
                    )
                    .await
            }
            PortalCall::ListShortcuts {
                session_handle,
                handle_token,
            } => {
                let session = object_path(session_handle)?;
                let options = HashMap::from([("handle_token", Value::from(handle_token.as_str()))]);
                self.conn
                    .call_method(
                        Some(PORTAL_DESTINATION),
                        PORTAL_PATH,
                        Some(GLOBAL_SHORTCUTS_INTERFACE),
                        method,
                        &(session, options),
                    )
                    .await
            }
        }
        .map_err(call_error)?;

        let request: OwnedObjectPath = reply
            .body()
            .deserialize()
            .map_err(|e| PortalError::Protocol(format!("{method} reply: {e}")))?;
        Ok(request.to_string())
    }

    async fn close_session(&self, session_handle: &str) -> Result<(), PortalError> {
        self.conn
            .call_method(
                Some(PORTAL_DESTINATION),
                object_path(session_handle)?,
                Some(SESSION_INTERFACE),
                "Close",
                &(),
            )
            .await
            .map(|_| ())
            .map_err(call_error)
    }

    async fn disconnect(self) -> Result<(), PortalError> {
        for listener in &self.listeners {
            listener.abort();
        }
        self.conn
            .close()
            .await
            .map_err(|e| PortalError::Connection(format!("close: {e}")))
    }
}

/// Install a match rule for `interface.member` signals.
async fn subscribe(
    conn: &Connection,
    interface: &'static str,
    member: &'static str,
) -> Result<MessageStream, PortalError> {
    let rule = MatchRule::builder()
        .msg_type(MessageType::Signal)
        .interface(interface)
        .and_then(|b| b.member(member))
        .map_err(|e| PortalError::Protocol(format!("match rule {interface}.{member}: {e}")))?
        .build();

    MessageStream::for_match_rule(rule, conn, None)
        .await
        .map_err(|e| PortalError::Connection(format!("AddMatch {interface}.{member}: {e}")))
}

/// Forward `Request.Response` signals on our own request paths.
async fn forward_responses(
    mut stream: MessageStream,
    sender: String,
    signals: mpsc::UnboundedSender<BusSignal>,
) {
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "Response stream error");
                continue;
            }
        };
        let Some(signal) = decode_response(&msg) else {
            continue;
        };
        if let BusSignal::Response { path, .. } = &signal
            && !paths::is_request_path_of(path, &sender)
        {
            continue;
        }
        if signals.send(signal).is_err() {
            return;
        }
    }
}

/// Forward `Activated` / `Deactivated` signals.
async fn forward_activations(
    activated: MessageStream,
    deactivated: MessageStream,
    signals: mpsc::UnboundedSender<BusSignal>,
) {
    let activated = activated.map(|m| (ActivationKind::Activated, m));
    let deactivated = deactivated.map(|m| (ActivationKind::Deactivated, m));
    let mut merged = futures::stream::select(activated, deactivated);

    while let Some((kind, msg)) = merged.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "activation stream error");
                continue;
            }
        };
        match decode_activation(kind, &msg) {
            Ok(activation) => {
                if signals.send(BusSignal::Activation(activation)).is_err() {
                    return;
                }
            }
            Err(e) => tracing::warn!(?kind, error = %e, "undecodable activation signal"),
        }
    }
}

fn decode_response(msg: &Message) -> Option<BusSignal> {
    let header = msg.header();
    let path = header.path()?.to_string();
    let response = msg
        .body()
        .deserialize::<(u32, HashMap<String, OwnedValue>)>()
        .map_err(|e| format!("malformed Response body: {e}"))
        .and_then(|(code, results)| decode_results(code, &results));
    Some(BusSignal::Response { path, response })
}

fn decode_results(
    code: u32,
    results: &HashMap<String, OwnedValue>,
) -> Result<PortalResponse, String> {
    let session_handle = match results.get("session_handle") {
        Some(value) => Some(string_value(value).ok_or("session_handle is not a string")?),
        None => None,
    };
    let shortcuts = match results.get("shortcuts") {
        Some(value) => Some(decode_shortcuts(value)?),
        None => None,
    };
    Ok(PortalResponse {
        code,
        session_handle,
        shortcuts,
    })
}

/// Decode `a(sa{sv})`.
fn decode_shortcuts(value: &Value<'_>) -> Result<Vec<BoundShortcut>, String> {
    let Value::Array(array) = value else {
        return Err(format!("shortcuts has signature {}", value.value_signature()));
    };

    array
        .inner()
        .iter()
        .map(|item| {
            let Value::Structure(entry) = item else {
                return Err("shortcut entry is not a struct".to_string());
            };
            let fields = entry.fields();
            let id = fields
                .first()
                .and_then(string_value)
                .ok_or("shortcut entry without id")?;
            let details = fields.get(1).map(string_map).unwrap_or_default();
            Ok(BoundShortcut {
                id,
                description: details.get("description").cloned(),
                trigger_description: details.get("trigger_description").cloned(),
            })
        })
        .collect()
}

fn decode_activation(kind: ActivationKind, msg: &Message) -> Result<ActivationSignal, String> {
    let body: (OwnedObjectPath, String, u64, HashMap<String, OwnedValue>) = msg
        .body()
        .deserialize()
        .map_err(|e| e.to_string())?;
    let raw_body = format!("{body:?}");
    let (session_handle, shortcut_id, timestamp, _options) = body;

    Ok(ActivationSignal {
        kind,
        shortcut_id,
        session_handle: Some(session_handle.to_string()),
        timestamp,
        raw_body,
    })
}

/// String-valued entries of an `a{sv}`; other entries are skipped.
fn string_map(value: &Value<'_>) -> HashMap<String, String> {
    value
        .try_clone()
        .ok()
        .and_then(|v| HashMap::<String, OwnedValue>::try_from(v).ok())
        .map(|map| {
            map.into_iter()
                .filter_map(|(k, v)| string_value(&v).map(|s| (k, s)))
                .collect()
        })
        .unwrap_or_default()
}

fn string_value(value: &Value<'_>) -> Option<String> {
    match value {
        Value::Str(s) => Some(s.to_string()),
        Value::ObjectPath(p) => Some(p.to_string()),
        Value::Value(inner) => string_value(inner),
        _ => None,
    }
}

fn object_path(path: &str) -> Result<ObjectPath<'_>, PortalError> {
    ObjectPath::try_from(path)
        .map_err(|e| PortalError::Protocol(format!("invalid object path {path:?}: {e}")))
}

fn call_error(e: zbus::Error) -> PortalError {
    match e {
        zbus::Error::MethodError(name, detail, _) => PortalError::Protocol(match detail {
            Some(detail) => format!("{name}: {detail}"),
            None => name.to_string(),
        }),
        zbus::Error::InputOutput(e) => PortalError::Connection(e.to_string()),
        other => PortalError::Protocol(other.to_string()),
    }
}
