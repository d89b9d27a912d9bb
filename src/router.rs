//! Activation signal router: delivers shortcut activations to callbacks.
//!
//! Both registration strategies feed this router: the portal client's
//! signal pump forwards `Activated`/`Deactivated` signals, and the native
//! backend forwards key press/release events. Each signal is dispatched
//! to the callback registered for its hotkey id and, when tracking is
//! enabled, recorded in a bounded diagnostic history.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Whether a shortcut was pressed or released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    Activated,
    Deactivated,
}

/// One activation notification, as received from a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationSignal {
    pub kind: ActivationKind,
    pub shortcut_id: String,
    /// Portal session the signal belongs to; `None` for native grabs.
    pub session_handle: Option<String>,
    /// Backend timestamp in milliseconds.
    pub timestamp: u64,
    /// Debug rendering of the raw signal body.
    pub raw_body: String,
}

/// Diagnostic record of a delivered signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationEvent {
    pub hotkey_id: String,
    pub kind: ActivationKind,
    pub timestamp: u64,
    pub raw_body: String,
}

/// Snapshot of the diagnostic history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationSignalStats {
    pub tracking_enabled: bool,
    pub total_signals: u64,
    pub signals_by_shortcut: BTreeMap<String, u64>,
    /// Wall-clock receipt time (Unix millis) of the newest signal.
    pub last_signal_time: Option<u64>,
    /// Retained signals, newest first.
    pub signals: Vec<ActivationEvent>,
}

/// Collaborator callback invoked per activation.
pub type ActivationCallback = Arc<dyn Fn(ActivationKind) + Send + Sync>;

/// Shared, cloneable router handle.
#[derive(Clone)]
pub struct ActivationSignalRouter {
    inner: Arc<Mutex<RouterState>>,
}

struct RouterState {
    callbacks: HashMap<String, ActivationCallback>,
    history: SignalHistory,
}

/// Bounded newest-first signal history with counters.
struct SignalHistory {
    tracking: bool,
    depth: usize,
    entries: VecDeque<ActivationEvent>,
    total: u64,
    by_shortcut: BTreeMap<String, u64>,
    last_signal_time: Option<u64>,
}

impl SignalHistory {
    fn record(&mut self, signal: &ActivationSignal) {
        if !self.tracking {
            return;
        }

        self.total += 1;
        *self
            .by_shortcut
            .entry(signal.shortcut_id.clone())
            .or_insert(0) += 1;
        self.last_signal_time = Some(now_millis());

        if self.depth == 0 {
            return;
        }
        if self.entries.len() == self.depth {
            self.entries.pop_back();
        }
        self.entries.push_front(ActivationEvent {
            hotkey_id: signal.shortcut_id.clone(),
            kind: signal.kind,
            timestamp: signal.timestamp,
            raw_body: signal.raw_body.clone(),
        });
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.total = 0;
        self.by_shortcut.clear();
        self.last_signal_time = None;
    }
}

impl ActivationSignalRouter {
    /// Create a router retaining at most `depth` signals.
    pub fn new(depth: usize, tracking: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RouterState {
                callbacks: HashMap::new(),
                history: SignalHistory {
                    tracking,
                    depth,
                    entries: VecDeque::with_capacity(depth),
                    total: 0,
                    by_shortcut: BTreeMap::new(),
                    last_signal_time: None,
                },
            })),
        }
    }

    /// Register (or replace) the callback for a hotkey id.
    pub fn on_activation<F>(&self, hotkey_id: &str, callback: F)
    where
        F: Fn(ActivationKind) + Send + Sync + 'static,
    {
        self.lock()
            .callbacks
            .insert(hotkey_id.to_string(), Arc::new(callback));
    }

    /// Record a signal and invoke its hotkey's callback.
    ///
    /// Returns `false` when no callback is registered for the id. The
    /// callback runs outside the router lock.
    pub fn dispatch(&self, signal: ActivationSignal) -> bool {
        let callback = {
            let mut state = self.lock();
            state.history.record(&signal);
            state.callbacks.get(&signal.shortcut_id).cloned()
        };

        match callback {
            Some(callback) => {
                tracing::debug!(
                    hotkey = %signal.shortcut_id,
                    kind = ?signal.kind,
                    timestamp = signal.timestamp,
                    "dispatching activation"
                );
                callback(signal.kind);
                true
            }
            None => {
                tracing::debug!(
                    hotkey = %signal.shortcut_id,
                    "activation for hotkey without callback"
                );
                false
            }
        }
    }

    pub fn stats(&self) -> ActivationSignalStats {
        let state = self.lock();
        let h = &state.history;
        ActivationSignalStats {
            tracking_enabled: h.tracking,
            total_signals: h.total,
            signals_by_shortcut: h.by_shortcut.clone(),
            last_signal_time: h.last_signal_time,
            signals: h.entries.iter().cloned().collect(),
        }
    }

    pub fn clear_history(&self) {
        self.lock().history.clear();
    }

    fn lock(&self) -> MutexGuard<'_, RouterState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn signal(id: &str, kind: ActivationKind, timestamp: u64) -> ActivationSignal {
        ActivationSignal {
            kind,
            shortcut_id: id.into(),
            session_handle: None,
            timestamp,
            raw_body: format!("({id}, {timestamp})"),
        }
    }

    #[test]
    fn dispatches_to_matching_callback() {
        let router = ActivationSignalRouter::new(8, true);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        router.on_activation("quickChat", move |kind| {
            assert_eq!(kind, ActivationKind::Activated);
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(router.dispatch(signal("quickChat", ActivationKind::Activated, 1)));
        assert!(!router.dispatch(signal("other", ActivationKind::Activated, 2)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_replaced_not_duplicated() {
        let router = ActivationSignalRouter::new(8, true);
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let h = Arc::clone(&hits);
            router.on_activation("a", move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
        router.dispatch(signal("a", ActivationKind::Activated, 1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_may_reenter_router() {
        let router = ActivationSignalRouter::new(8, true);
        let inner = router.clone();
        router.on_activation("a", move |_| {
            assert_eq!(inner.stats().total_signals, 1);
        });
        assert!(router.dispatch(signal("a", ActivationKind::Activated, 1)));
    }

    #[test]
    fn history_is_bounded_and_newest_first() {
        let router = ActivationSignalRouter::new(2, true);
        router.dispatch(signal("a", ActivationKind::Activated, 1));
        router.dispatch(signal("b", ActivationKind::Activated, 2));
        router.dispatch(signal("a", ActivationKind::Deactivated, 3));

        let stats = router.stats();
        assert!(stats.tracking_enabled);
        assert_eq!(stats.total_signals, 3);
        assert_eq!(stats.signals_by_shortcut.get("a"), Some(&2));
        assert_eq!(stats.signals_by_shortcut.get("b"), Some(&1));
        assert!(stats.last_signal_time.is_some());
        assert_eq!(stats.signals.len(), 2);
        assert_eq!(stats.signals[0].timestamp, 3);
        assert_eq!(stats.signals[0].kind, ActivationKind::Deactivated);
        assert_eq!(stats.signals[1].hotkey_id, "b");
    }

    #[test]
    fn clear_resets_history() {
        let router = ActivationSignalRouter::new(4, true);
        router.dispatch(signal("a", ActivationKind::Activated, 1));
        router.clear_history();

        let stats = router.stats();
        assert_eq!(stats.total_signals, 0);
        assert!(stats.signals.is_empty());
        assert!(stats.signals_by_shortcut.is_empty());
        assert!(stats.last_signal_time.is_none());
        assert!(stats.tracking_enabled);
    }

    #[test]
    fn tracking_disabled_records_nothing_but_still_dispatches() {
        let router = ActivationSignalRouter::new(4, false);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        router.on_activation("a", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        router.dispatch(signal("a", ActivationKind::Activated, 1));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let stats = router.stats();
        assert!(!stats.tracking_enabled);
        assert_eq!(stats.total_signals, 0);
        assert!(stats.signals.is_empty());
    }
}
