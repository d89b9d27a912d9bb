//! Handle tokens and predicted object paths.
//!
//! The portal derives Request and Session object paths from the
//! caller's unique bus name and the tokens the caller passes in, so the
//! caller can know them before any reply arrives.

use std::time::{SystemTime, UNIX_EPOCH};

const REQUEST_PREFIX: &str = "/org/freedesktop/portal/desktop/request";
const SESSION_PREFIX: &str = "/org/freedesktop/portal/desktop/session";

/// Turn a unique bus name (`:1.42`) into its path element (`1_42`).
pub fn sender_token(unique_name: &str) -> String {
    unique_name
        .strip_prefix(':')
        .unwrap_or(unique_name)
        .replace('.', "_")
}

/// A process-unique token usable as an object path element.
///
/// Random part plus a millisecond timestamp, prefixed for readability
/// in bus monitors.
pub fn handle_token(prefix: &str) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{prefix}_{}_{millis}", &random[..12])
}

/// Object path the portal will use for a request with `token`.
pub fn request_path(sender: &str, token: &str) -> String {
    format!("{REQUEST_PREFIX}/{sender}/{token}")
}

/// Object path the portal will use for a session with `token`.
pub fn session_path(sender: &str, token: &str) -> String {
    format!("{SESSION_PREFIX}/{sender}/{token}")
}

/// Whether `path` is a request path belonging to `sender`.
pub fn is_request_path_of(path: &str, sender: &str) -> bool {
    path.strip_prefix(REQUEST_PREFIX)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|rest| rest.strip_prefix(sender))
        .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_token_sanitized() {
        assert_eq!(sender_token(":1.42"), "1_42");
        assert_eq!(sender_token(":1.2.3"), "1_2_3");
        assert_eq!(sender_token("1.5"), "1_5");
    }

    #[test]
    fn predicted_paths() {
        assert_eq!(
            request_path("1_42", "create_abc"),
            "/org/freedesktop/portal/desktop/request/1_42/create_abc"
        );
        assert_eq!(
            session_path("1_42", "session_abc"),
            "/org/freedesktop/portal/desktop/session/1_42/session_abc"
        );
    }

    #[test]
    fn tokens_are_unique_and_path_safe() {
        let a = handle_token("bind");
        let b = handle_token("bind");
        assert_ne!(a, b);
        assert!(a.starts_with("bind_"));
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn request_path_ownership() {
        let path = request_path("1_42", "t");
        assert!(is_request_path_of(&path, "1_42"));
        assert!(!is_request_path_of(&path, "1_4"));
        assert!(!is_request_path_of(&session_path("1_42", "t"), "1_42"));
    }
}
