//! Hotkey registry: desired set, strategy selection, per-hotkey results.
//!
//! Every change to the enabled set runs a full pass: tear down whatever
//! is registered, rebuild the complete enabled set, register it again.
//! Passes are serialized on an async mutex that owns the backends, so a
//! second pass waits for the first instead of racing it on the bus.
//! Desired flags, actual states and the last results live behind a
//! plain mutex and stay readable while a pass is suspended.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{HotkeyDefinition, HotkeyError, HotkeyState, RegistrationResult, UNSUPPORTED_PLATFORM};
use crate::config::RegistryConfig;
use crate::native::{self, NativeShortcuts};
use crate::platform::{self, PlatformStatus, PortalMethod};
use crate::portal::bus::BoundShortcut;
use crate::portal::{BusConnector, PortalSessionClient, SessionBusConnector};
use crate::router::{ActivationKind, ActivationSignalRouter, ActivationSignalStats};

/// How hotkeys get registered on this platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// X11 grabs, or the host toolkit's own compositor integration.
    Native,
    /// The portal `GlobalShortcuts` protocol.
    Portal,
    /// Nothing works; every hotkey fails.
    Unsupported,
}

impl Strategy {
    pub fn for_status(status: &PlatformStatus) -> Self {
        if !status.is_wayland {
            return Self::Native;
        }
        match status.portal_method {
            PortalMethod::ChromiumFlag => Self::Native,
            PortalMethod::DbusDirect | PortalMethod::DbusFallback => Self::Portal,
            PortalMethod::None => Self::Unsupported,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Native => "native",
            Self::Portal => "portal",
            Self::Unsupported => "unsupported",
        })
    }
}

/// Status snapshot for collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformHotkeyStatus {
    /// At least one hotkey reached `Registered`.
    pub global_hotkeys_enabled: bool,
    pub wayland_status: PlatformStatus,
    pub registration_results: Vec<RegistrationResult>,
}

#[derive(Default)]
struct RegistryState {
    definitions: Vec<HotkeyDefinition>,
    states: HashMap<String, HotkeyState>,
    results: Vec<RegistrationResult>,
}

struct Backends<C: BusConnector> {
    portal: PortalSessionClient<C>,
    native: Box<dyn NativeShortcuts>,
}

impl<C: BusConnector> Backends<C> {
    async fn teardown(&mut self) {
        self.portal.destroy_session().await;
        self.native.unregister_all();
    }
}

/// Owns the desired hotkey set and the single portal client.
pub struct HotkeyRegistry<C: BusConnector = SessionBusConnector> {
    status: PlatformStatus,
    strategy: Strategy,
    router: ActivationSignalRouter,
    state: Mutex<RegistryState>,
    backends: tokio::sync::Mutex<Backends<C>>,
}

impl HotkeyRegistry<SessionBusConnector> {
    /// Registry for the current session, using the cached probe result.
    pub fn for_session(definitions: Vec<HotkeyDefinition>, config: &RegistryConfig) -> Self {
        let status = platform::probe(config.toolkit_shortcuts).clone();
        let connector = SessionBusConnector::for_method(status.portal_method);
        let native = native::for_status(&status);
        Self::new(status, connector, native, definitions, config)
    }
}

impl<C: BusConnector> HotkeyRegistry<C> {
    pub fn new(
        status: PlatformStatus,
        connector: C,
        native: Box<dyn NativeShortcuts>,
        definitions: Vec<HotkeyDefinition>,
        config: &RegistryConfig,
    ) -> Self {
        let router = ActivationSignalRouter::new(config.history_depth, config.track_signals);
        let portal = PortalSessionClient::new(connector, router.clone(), config);
        let strategy = Strategy::for_status(&status);

        let mut state = RegistryState::default();
        for def in definitions {
            if state.states.contains_key(&def.id) {
                tracing::warn!(hotkey = %def.id, "duplicate hotkey id ignored");
                continue;
            }
            state.states.insert(def.id.clone(), HotkeyState::Disabled);
            state.definitions.push(def);
        }

        tracing::info!(
            strategy = %strategy,
            method = %status.portal_method,
            hotkeys = state.definitions.len(),
            "hotkey registry created"
        );

        Self {
            status,
            strategy,
            router,
            state: Mutex::new(state),
            backends: tokio::sync::Mutex::new(Backends { portal, native }),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn platform_status(&self) -> &PlatformStatus {
        &self.status
    }

    pub fn definitions(&self) -> Vec<HotkeyDefinition> {
        self.lock().definitions.clone()
    }

    /// Run a full registration pass over the enabled set.
    pub async fn register_shortcuts(&self) -> Vec<RegistrationResult> {
        let mut backends = self.backends.lock().await;
        backends.teardown().await;

        let enabled: Vec<HotkeyDefinition> = {
            let mut state = self.lock();
            let RegistryState {
                definitions,
                states,
                ..
            } = &mut *state;
            for def in definitions.iter() {
                let next = if def.enabled_by_user {
                    HotkeyState::PendingRegistration
                } else {
                    HotkeyState::Disabled
                };
                states.insert(def.id.clone(), next);
            }
            definitions
                .iter()
                .filter(|d| d.enabled_by_user)
                .cloned()
                .collect()
        };

        tracing::info!(strategy = %self.strategy, count = enabled.len(), "registration pass");
        let results = match self.strategy {
            Strategy::Unsupported => RegistrationResult::fail_all(&enabled, UNSUPPORTED_PLATFORM),
            Strategy::Portal => backends.portal.register_batch(&enabled).await,
            Strategy::Native => backends.native.register(&enabled, &self.router),
        };
        drop(backends);

        let mut state = self.lock();
        for result in &results {
            let next = if result.success {
                HotkeyState::Registered
            } else {
                HotkeyState::Failed
            };
            state.states.insert(result.hotkey_id.clone(), next);
        }
        for def in &enabled {
            if let Some(s) = state.states.get_mut(&def.id)
                && *s == HotkeyState::PendingRegistration
            {
                *s = HotkeyState::Failed;
            }
        }
        state.results = results.clone();

        let registered = results.iter().filter(|r| r.success).count();
        tracing::info!(registered, failed = results.len() - registered, "registration pass finished");
        results
    }

    /// Tear down every registration and mark all hotkeys disabled.
    /// Desired flags are kept.
    pub async fn unregister_all(&self) {
        let mut backends = self.backends.lock().await;
        backends.teardown().await;
        drop(backends);

        let mut state = self.lock();
        for s in state.states.values_mut() {
            *s = HotkeyState::Disabled;
        }
        state.results.clear();
        tracing::info!("all hotkeys unregistered");
    }

    /// The persisted desired state; unknown ids are not enabled.
    pub fn is_individual_enabled(&self, hotkey_id: &str) -> bool {
        self.lock()
            .definitions
            .iter()
            .any(|d| d.id == hotkey_id && d.enabled_by_user)
    }

    /// Change one hotkey's desired state and re-register the whole set.
    pub async fn set_enabled(
        &self,
        hotkey_id: &str,
        enabled: bool,
    ) -> Result<Vec<RegistrationResult>, HotkeyError> {
        {
            let mut state = self.lock();
            let def = state
                .definitions
                .iter_mut()
                .find(|d| d.id == hotkey_id)
                .ok_or_else(|| HotkeyError::UnknownHotkey(hotkey_id.to_string()))?;
            def.enabled_by_user = enabled;
        }
        tracing::info!(hotkey = hotkey_id, enabled, "desired state changed");
        Ok(self.register_shortcuts().await)
    }

    pub fn hotkey_state(&self, hotkey_id: &str) -> Option<HotkeyState> {
        self.lock().states.get(hotkey_id).copied()
    }

    pub fn on_activation<F>(&self, hotkey_id: &str, callback: F)
    where
        F: Fn(ActivationKind) + Send + Sync + 'static,
    {
        self.router.on_activation(hotkey_id, callback);
    }

    pub fn platform_hotkey_status(&self) -> PlatformHotkeyStatus {
        let state = self.lock();
        PlatformHotkeyStatus {
            global_hotkeys_enabled: state.states.values().any(|s| *s == HotkeyState::Registered),
            wayland_status: self.status.clone(),
            registration_results: state.results.clone(),
        }
    }

    pub fn activation_signal_stats(&self) -> ActivationSignalStats {
        self.router.stats()
    }

    pub fn clear_activation_signal_history(&self) {
        self.router.clear_history();
    }

    /// Shortcuts the portal reports for the live session.
    pub async fn verify_bound_shortcuts(&self) -> Result<Vec<BoundShortcut>, HotkeyError> {
        let backends = self.backends.lock().await;
        let handle = backends
            .portal
            .session()
            .map(|s| s.handle.clone())
            .ok_or(HotkeyError::NoSession)?;
        Ok(backends.portal.list_shortcuts(&handle).await?)
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
