//! Pending portal requests keyed by predicted Request object path.
//!
//! Each entry is removed exactly once: by the signal pump when the
//! matching Response arrives, or by the waiter when its deadline passes.
//! Registering a path that is still pending is refused.
//!
//! A Response for a path nobody waits on is kept in a small buffer, so a
//! Response on a relocated Request path that beats the method return is
//! handed over when the waiter re-keys onto that path.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use super::{PortalError, PortalResponse};

type Outcome = Result<PortalResponse, PortalError>;
type Resolver = oneshot::Sender<Outcome>;

/// Unclaimed Responses kept for a later re-key.
const UNCLAIMED_CAPACITY: usize = 8;

#[derive(Default)]
struct Table {
    waiting: HashMap<String, Resolver>,
    /// Oldest first.
    unclaimed: VecDeque<(String, Outcome)>,
}

impl Table {
    fn take_unclaimed(&mut self, path: &str) -> Option<Outcome> {
        let idx = self.unclaimed.iter().position(|(p, _)| p == path)?;
        self.unclaimed.remove(idx).map(|(_, outcome)| outcome)
    }
}

/// Shared pending-request table.
#[derive(Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<Table>>,
}

/// Receiving half of a registered request.
pub struct PendingRequest {
    path: String,
    rx: oneshot::Receiver<Outcome>,
    table: PendingRequests,
}

impl PendingRequests {
    /// Register a request for `path`. Must happen before the method call
    /// is issued so an early Response finds its entry.
    pub fn register(&self, path: &str) -> Result<PendingRequest, PortalError> {
        let mut table = self.lock();
        if table.waiting.contains_key(path) {
            return Err(PortalError::RequestPending(path.to_string()));
        }
        // Anything buffered here belongs to an earlier request.
        table.take_unclaimed(path);
        let (tx, rx) = oneshot::channel();
        table.waiting.insert(path.to_string(), tx);
        tracing::trace!(path, "request registered");

        Ok(PendingRequest {
            path: path.to_string(),
            rx,
            table: self.clone(),
        })
    }

    /// Resolve and remove the entry for `path`. Returns `false` when
    /// nothing was pending there; the result is then buffered for a
    /// waiter that re-keys onto `path`.
    pub fn resolve(&self, path: &str, result: Outcome) -> bool {
        let mut table = self.lock();
        let Some(tx) = table.waiting.remove(path) else {
            if table.unclaimed.len() == UNCLAIMED_CAPACITY {
                table.unclaimed.pop_front();
            }
            table.unclaimed.push_back((path.to_string(), result));
            return false;
        };
        drop(table);
        // The waiter may have given up between removal and send.
        let _ = tx.send(result);
        true
    }

    /// Move a pending entry to the path the portal actually used.
    ///
    /// A Response already buffered for `to` resolves the entry at once.
    pub fn rekey(&self, from: &str, to: &str) -> Result<(), PortalError> {
        let mut table = self.lock();
        if table.waiting.contains_key(to) {
            return Err(PortalError::RequestPending(to.to_string()));
        }
        let Some(tx) = table.waiting.remove(from) else {
            return Ok(());
        };
        match table.take_unclaimed(to) {
            Some(outcome) => {
                tracing::debug!(path = to, "buffered response claimed on re-key");
                let _ = tx.send(outcome);
            }
            None => {
                table.waiting.insert(to.to_string(), tx);
            }
        }
        Ok(())
    }

    /// Drop an entry without resolving it.
    pub fn cancel(&self, path: &str) -> bool {
        self.lock().waiting.remove(path).is_some()
    }

    /// Drop every entry and buffered Response. Waiters observe a closed
    /// channel.
    pub fn clear(&self) {
        let mut table = self.lock();
        table.waiting.clear();
        table.unclaimed.clear();
    }

    pub fn is_pending(&self, path: &str) -> bool {
        self.lock().waiting.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.lock().waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().waiting.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PendingRequest {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Follow the entry to a new path (see [`PendingRequests::rekey`]).
    pub fn rekey(&mut self, to: &str) -> Result<(), PortalError> {
        self.table.rekey(&self.path, to)?;
        self.path = to.to_string();
        Ok(())
    }

    /// Wait for the Response or the deadline, whichever comes first.
    ///
    /// On timeout the entry is removed locally; nothing is sent to the
    /// portal.
    pub async fn wait(self, timeout: Duration) -> Result<PortalResponse, PortalError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PortalError::Connection(format!(
                "request {} dropped before a response arrived",
                self.path
            ))),
            Err(_) => {
                self.table.cancel(&self.path);
                Err(PortalError::Timeout {
                    path: self.path,
                    after: timeout,
                })
            }
        }
    }

    /// Abandon the request (the method call itself failed).
    pub fn abandon(self) {
        self.table.cancel(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "/org/freedesktop/portal/desktop/request/1_1/t";

    fn ok(code: u32) -> Outcome {
        Ok(PortalResponse {
            code,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn resolves_once() {
        let table = PendingRequests::default();
        let req = table.register(PATH).unwrap();

        assert!(table.resolve(PATH, ok(0)));
        assert!(!table.resolve(PATH, ok(1)), "second resolve must miss");
        assert_eq!(table.len(), 0);

        let resp = req.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(resp.code, 0);
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let table = PendingRequests::default();
        let _first = table.register(PATH).unwrap();
        match table.register(PATH) {
            Err(PortalError::RequestPending(p)) => assert_eq!(p, PATH),
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("duplicate registration accepted"),
        }
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn timeout_removes_entry() {
        let table = PendingRequests::default();
        let req = table.register(PATH).unwrap();

        let err = req.wait(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, PortalError::Timeout { .. }));
        assert!(!table.is_pending(PATH));
        assert!(!table.resolve(PATH, ok(0)), "late response finds nothing");

        // Path is free again after resolution.
        assert!(table.register(PATH).is_ok());
    }

    #[tokio::test]
    async fn clear_wakes_waiters() {
        let table = PendingRequests::default();
        let req = table.register(PATH).unwrap();
        table.clear();
        let err = req.wait(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, PortalError::Connection(_)));
    }

    #[tokio::test]
    async fn rekey_follows_actual_path() {
        let table = PendingRequests::default();
        let mut req = table.register(PATH).unwrap();
        req.rekey("/other").unwrap();
        assert_eq!(req.path(), "/other");
        assert!(!table.is_pending(PATH));

        assert!(table.resolve("/other", ok(0)));
        assert!(req.wait(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn rekey_claims_response_that_arrived_first() {
        let table = PendingRequests::default();
        let mut req = table.register(PATH).unwrap();

        let early = Ok(PortalResponse {
            session_handle: Some("/s".into()),
            ..Default::default()
        });
        assert!(!table.resolve("/other", early));
        req.rekey("/other").unwrap();
        assert!(table.is_empty());

        let resp = req.wait(Duration::from_millis(20)).await.unwrap();
        assert_eq!(resp.session_handle.as_deref(), Some("/s"));
    }

    #[tokio::test]
    async fn unclaimed_buffer_is_bounded() {
        let table = PendingRequests::default();
        let mut req = table.register(PATH).unwrap();
        table.resolve("/oldest", ok(7));
        for i in 0..UNCLAIMED_CAPACITY {
            table.resolve(&format!("/filler{i}"), ok(0));
        }

        req.rekey("/oldest").unwrap();
        assert!(table.is_pending("/oldest"), "evicted response must not be claimed");
        let err = req.wait(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, PortalError::Timeout { .. }));
    }

    #[tokio::test]
    async fn stale_buffered_response_not_reused() {
        let table = PendingRequests::default();
        table.resolve(PATH, ok(3));
        let req = table.register(PATH).unwrap();
        let err = req.wait(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, PortalError::Timeout { .. }));
    }

    #[test]
    fn abandon_frees_path() {
        let table = PendingRequests::default();
        let req = table.register(PATH).unwrap();
        req.abandon();
        assert!(table.is_empty());
    }
}
