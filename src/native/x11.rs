//! X11 root-window key grabs.
//!
//! Each hotkey becomes four passive grabs on the root window (with and
//! without CapsLock/NumLock). A polling thread drains the display
//! connection and a bridge thread turns matching `KeyPress` /
//! `KeyRelease` events into activation signals on the router.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::{self, GrabMode, Keysym, ModMask, Window};
use x11rb::rust_connection::RustConnection;

use super::{NativeError, NativeShortcuts};
use crate::hotkey::accelerator::Modifiers;
use crate::hotkey::{Accelerator, HotkeyDefinition, RegistrationResult};
use crate::router::{ActivationKind, ActivationSignal, ActivationSignalRouter};

/// CapsLock modifier bit (always LockMask, bit 1).
const LOCK_MASK: u16 = 0x0002;

/// Mod2, the usual NumLock bit.
const NUMLOCK_FALLBACK: u16 = 0x0010;

const XK_NUM_LOCK: Keysym = 0xff7f;

/// One grabbed hotkey.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Grab {
    hotkey_id: String,
    modifiers: u16,
    keycode: u8,
    raw: String,
}

struct Display {
    conn: Arc<RustConnection>,
    root: Window,
    numlock_mask: u16,
}

/// Native backend for X11 sessions.
///
/// The display connection is opened on the first `register` call, so a
/// backend that is never used never touches `$DISPLAY`.
#[derive(Default)]
pub struct X11Shortcuts {
    display: Option<Display>,
    grabs: Vec<Grab>,
    /// Stop flag shared with the event thread.
    stop: Option<Arc<AtomicBool>>,
    event_thread: Option<JoinHandle<()>>,
    bridge_thread: Option<JoinHandle<()>>,
}

impl X11Shortcuts {
    pub fn new() -> Self {
        Self::default()
    }

    fn display(&mut self) -> Result<&Display, NativeError> {
        if self.display.is_none() {
            let (conn, screen_num) = RustConnection::connect(None)
                .map_err(|e| NativeError::X11(format!("connect failed: {e}")))?;
            let root = conn.setup().roots[screen_num].root;
            let numlock_mask = detect_numlock_mask(&conn);
            tracing::debug!(
                numlock_mask = format_args!("0x{numlock_mask:04x}"),
                "detected NumLock modifier"
            );
            self.display = Some(Display {
                conn: Arc::new(conn),
                root,
                numlock_mask,
            });
        }
        self.display
            .as_ref()
            .ok_or_else(|| NativeError::X11("no display".into()))
    }

    /// Start the event and bridge threads for the current grabs.
    fn start_threads(&mut self, router: &ActivationSignalRouter) -> io::Result<()> {
        let Some(display) = &self.display else {
            return Ok(());
        };

        let stop = Arc::new(AtomicBool::new(false));
        let (mut raw_rx, event_thread) =
            spawn_event_thread(Arc::clone(&display.conn), Arc::clone(&stop))?;
        self.stop = Some(stop);
        self.event_thread = Some(event_thread);

        let grabs = self.grabs.clone();
        let numlock_mask = display.numlock_mask;
        let router = router.clone();
        let bridge = std::thread::Builder::new()
            .name("x11-hotkey-bridge".into())
            .spawn(move || {
                while let Some(event) = raw_rx.blocking_recv() {
                    if let Some(signal) = classify_event(&event, &grabs, numlock_mask) {
                        router.dispatch(signal);
                    }
                }
            })?;
        self.bridge_thread = Some(bridge);
        Ok(())
    }

    fn stop_threads(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.store(true, Ordering::Relaxed);
        }
        // Exits within one poll timeout.
        if let Some(handle) = self.event_thread.take()
            && let Err(e) = handle.join()
        {
            tracing::warn!("X11 event thread panicked: {e:?}");
        }
        // Exits once the event thread drops its sender.
        if let Some(handle) = self.bridge_thread.take()
            && let Err(e) = handle.join()
        {
            tracing::warn!("X11 hotkey bridge thread panicked: {e:?}");
        }
    }
}

impl NativeShortcuts for X11Shortcuts {
    fn register(
        &mut self,
        definitions: &[HotkeyDefinition],
        router: &ActivationSignalRouter,
    ) -> Vec<RegistrationResult> {
        self.unregister_all();
        if definitions.is_empty() {
            return Vec::new();
        }

        let display = match self.display() {
            Ok(display) => display,
            Err(e) => {
                tracing::warn!(error = %e, "X11 display unavailable");
                return RegistrationResult::fail_all(definitions, &e.to_string());
            }
        };

        let mut grabs = Vec::new();
        let mut results = Vec::with_capacity(definitions.len());
        for def in definitions {
            match grab_definition(display, def) {
                Ok(grab) => {
                    tracing::info!(hotkey = %def.id, binding = %grab.raw, keycode = grab.keycode, "hotkey grabbed");
                    results.push(RegistrationResult::ok(&def.id));
                    grabs.push(grab);
                }
                Err(e) => {
                    tracing::warn!(hotkey = %def.id, accelerator = %def.accelerator, error = %e, "hotkey not grabbed");
                    results.push(RegistrationResult::failed(&def.id, e.to_string()));
                }
            }
        }
        self.grabs = grabs;

        if !self.grabs.is_empty()
            && let Err(e) = self.start_threads(router)
        {
            tracing::error!(error = %e, "failed to start X11 event threads");
            self.unregister_all();
            return RegistrationResult::fail_all(definitions, &format!("X11: {e}"));
        }
        results
    }

    fn unregister_all(&mut self) {
        self.stop_threads();
        if let Some(display) = &self.display {
            for grab in &self.grabs {
                ungrab(display, grab);
            }
            if let Err(e) = display.conn.flush() {
                tracing::debug!(error = %e, "flush after ungrab failed");
            }
        }
        self.grabs.clear();
    }
}

impl Drop for X11Shortcuts {
    fn drop(&mut self) {
        self.unregister_all();
    }
}

fn grab_definition(display: &Display, def: &HotkeyDefinition) -> Result<Grab, NativeError> {
    let acc = Accelerator::parse(&def.accelerator)?;
    let keycode = keysym_to_keycode(&*display.conn, acc.key.keysym)
        .ok_or(NativeError::UnmappedKeysym(acc.key.keysym))?;
    let grab = Grab {
        hotkey_id: def.id.clone(),
        modifiers: modifier_mask(&acc.modifiers),
        keycode,
        raw: acc.raw,
    };

    if grab_key(display, &grab)? {
        Ok(grab)
    } else {
        ungrab(display, &grab);
        Err(NativeError::Conflict(grab.raw))
    }
}

/// X11 modifier bits for an accelerator's modifiers.
fn modifier_mask(mods: &Modifiers) -> u16 {
    let mut mask = 0u16;
    if mods.ctrl {
        mask |= u16::from(ModMask::CONTROL);
    }
    if mods.alt {
        mask |= u16::from(ModMask::M1);
    }
    if mods.shift {
        mask |= u16::from(ModMask::SHIFT);
    }
    if mods.logo {
        mask |= u16::from(ModMask::M4);
    }
    mask
}

/// [0, CapsLock, NumLock, CapsLock|NumLock].
fn lock_masks(numlock_mask: u16) -> [u16; 4] {
    [0, LOCK_MASK, numlock_mask, LOCK_MASK | numlock_mask]
}

/// Grab all lock-mask variants. `Ok(false)` means another client holds
/// at least one of them.
fn grab_key(display: &Display, grab: &Grab) -> Result<bool, NativeError> {
    let mut all_ok = true;
    for lock_mask in lock_masks(display.numlock_mask) {
        let cookie = xproto::grab_key(
            &*display.conn,
            true,
            display.root,
            ModMask::from(grab.modifiers | lock_mask),
            grab.keycode,
            GrabMode::ASYNC,
            GrabMode::ASYNC,
        )
        .map_err(|e| NativeError::X11(format!("grab_key send: {e}")))?;

        if let Err(e) = cookie.check() {
            tracing::warn!(binding = %grab.raw, lock_mask, error = %e, "XGrabKey failed");
            all_ok = false;
        }
    }
    Ok(all_ok)
}

fn ungrab(display: &Display, grab: &Grab) {
    for lock_mask in lock_masks(display.numlock_mask) {
        let mods = ModMask::from(grab.modifiers | lock_mask);
        if let Err(e) = xproto::ungrab_key(&*display.conn, grab.keycode, display.root, mods) {
            tracing::debug!(binding = %grab.raw, error = %e, "XUngrabKey failed");
        }
    }
}

/// First keycode producing `keysym` in the server's keyboard mapping.
fn keysym_to_keycode(conn: &RustConnection, keysym: Keysym) -> Option<u8> {
    let setup = conn.setup();
    let min_keycode = setup.min_keycode;
    let count = setup.max_keycode - min_keycode + 1;

    let reply = xproto::get_keyboard_mapping(conn, min_keycode, count)
        .ok()?
        .reply()
        .ok()?;

    let syms_per_code = reply.keysyms_per_keycode as usize;
    if syms_per_code == 0 {
        return None;
    }
    reply
        .keysyms
        .chunks(syms_per_code)
        .position(|syms| syms.contains(&keysym))
        .map(|i| min_keycode + i as u8)
}

/// Modifier bit carrying NumLock on this server; Mod2 when undetectable.
fn detect_numlock_mask(conn: &RustConnection) -> u16 {
    let Some(mod_reply) = xproto::get_modifier_mapping(conn)
        .ok()
        .and_then(|c| c.reply().ok())
    else {
        return NUMLOCK_FALLBACK;
    };
    let per_mod = mod_reply.keycodes_per_modifier() as usize;
    if per_mod == 0 {
        return NUMLOCK_FALLBACK;
    }

    let Some(numlock) = keysym_to_keycode(conn, XK_NUM_LOCK) else {
        return NUMLOCK_FALLBACK;
    };

    // 8 rows (Shift, Lock, Control, Mod1..Mod5); row i is bit 1 << i.
    mod_reply
        .keycodes
        .chunks(per_mod)
        .take(8)
        .position(|row| row.contains(&numlock))
        .map_or(NUMLOCK_FALLBACK, |row| 1u16 << row)
}

/// Whether a key event hits `grab`, ignoring lock and pointer-button bits.
fn grab_matches(keycode: u8, state: u16, grab: &Grab, numlock_mask: u16) -> bool {
    let clean = state & !(LOCK_MASK | numlock_mask) & 0x00ff;
    keycode == grab.keycode && clean == grab.modifiers
}

/// Turn a raw X11 event into an activation signal for a grabbed hotkey.
fn classify_event(event: &Event, grabs: &[Grab], numlock_mask: u16) -> Option<ActivationSignal> {
    let (kind, key_event) = match event {
        Event::KeyPress(e) => (ActivationKind::Activated, e),
        Event::KeyRelease(e) => (ActivationKind::Deactivated, e),
        _ => return None,
    };
    let state = u16::from(key_event.state);
    let grab = grabs
        .iter()
        .find(|g| grab_matches(key_event.detail, state, g, numlock_mask))?;

    Some(ActivationSignal {
        kind,
        shortcut_id: grab.hotkey_id.clone(),
        session_handle: None,
        timestamp: u64::from(key_event.time),
        raw_body: format!(
            "keycode={} state=0x{state:04x} time={}",
            key_event.detail, key_event.time
        ),
    })
}

/// Poll the display connection on a dedicated thread and forward every
/// event. Checks `stop` at least every 100ms.
fn spawn_event_thread(
    conn: Arc<RustConnection>,
    stop: Arc<AtomicBool>,
) -> io::Result<(tokio::sync::mpsc::UnboundedReceiver<Event>, JoinHandle<()>)> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    let handle = std::thread::Builder::new()
        .name("x11-events".into())
        .spawn(move || {
            let raw_fd = conn.stream().as_raw_fd();

            while !stop.load(Ordering::Relaxed) {
                // SAFETY: raw_fd is the X11 connection fd, valid while conn is alive.
                let borrowed = unsafe { BorrowedFd::borrow_raw(raw_fd) };
                let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];

                match poll(&mut fds, PollTimeout::from(100u16)) {
                    Ok(0) => continue,
                    Ok(_) => loop {
                        match conn.poll_for_event() {
                            Ok(Some(event)) => {
                                if tx.send(event).is_err() {
                                    return;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                tracing::error!(error = %e, "X11 connection error");
                                return;
                            }
                        }
                    },
                    Err(nix::Error::EINTR) => continue,
                    Err(e) => {
                        tracing::error!(error = %e, "poll error on X11 fd");
                        return;
                    }
                }
            }
        })?;

    Ok((rx, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use x11rb::protocol::xproto::{KeyButMask, KeyPressEvent};

    const NUMLOCK: u16 = 0x0010;

    fn grab(id: &str, modifiers: u16, keycode: u8) -> Grab {
        Grab {
            hotkey_id: id.into(),
            modifiers,
            keycode,
            raw: id.into(),
        }
    }

    fn key_event(keycode: u8, state: u16, time: u32) -> KeyPressEvent {
        KeyPressEvent {
            response_type: xproto::KEY_PRESS_EVENT,
            detail: keycode,
            sequence: 0,
            time,
            root: 0,
            event: 0,
            child: 0,
            root_x: 0,
            root_y: 0,
            event_x: 0,
            event_y: 0,
            state: KeyButMask::from(state),
            same_screen: true,
        }
    }

    #[test]
    fn modifier_mask_maps_each_modifier() {
        let mods = Modifiers {
            ctrl: true,
            shift: true,
            ..Default::default()
        };
        assert_eq!(
            modifier_mask(&mods),
            u16::from(ModMask::CONTROL) | u16::from(ModMask::SHIFT)
        );

        let mods = Modifiers {
            alt: true,
            logo: true,
            ..Default::default()
        };
        assert_eq!(
            modifier_mask(&mods),
            u16::from(ModMask::M1) | u16::from(ModMask::M4)
        );
        assert_eq!(modifier_mask(&Modifiers::default()), 0);
    }

    #[test]
    fn lock_mask_variants() {
        assert_eq!(lock_masks(NUMLOCK), [0, 0x0002, 0x0010, 0x0012]);
    }

    #[test]
    fn match_ignores_lock_bits() {
        let ctrl_shift = u16::from(ModMask::CONTROL) | u16::from(ModMask::SHIFT);
        let g = grab("a", ctrl_shift, 65);

        assert!(grab_matches(65, ctrl_shift, &g, NUMLOCK));
        assert!(grab_matches(65, ctrl_shift | LOCK_MASK, &g, NUMLOCK));
        assert!(grab_matches(65, ctrl_shift | NUMLOCK | LOCK_MASK, &g, NUMLOCK));
        // Button1 held.
        assert!(grab_matches(65, ctrl_shift | 0x0100, &g, NUMLOCK));
    }

    #[test]
    fn match_requires_exact_modifiers_and_keycode() {
        let ctrl = u16::from(ModMask::CONTROL);
        let g = grab("a", ctrl, 65);

        assert!(!grab_matches(66, ctrl, &g, NUMLOCK));
        assert!(!grab_matches(65, 0, &g, NUMLOCK));
        assert!(!grab_matches(65, ctrl | u16::from(ModMask::SHIFT), &g, NUMLOCK));
    }

    #[test]
    fn press_and_release_become_signals() {
        let ctrl = u16::from(ModMask::CONTROL);
        let grabs = vec![grab("quickChat", ctrl, 65), grab("toggle", ctrl, 66)];

        let press = Event::KeyPress(key_event(66, ctrl | NUMLOCK, 1000));
        let signal = classify_event(&press, &grabs, NUMLOCK).unwrap();
        assert_eq!(signal.kind, ActivationKind::Activated);
        assert_eq!(signal.shortcut_id, "toggle");
        assert_eq!(signal.timestamp, 1000);
        assert!(signal.session_handle.is_none());

        let release = Event::KeyRelease(key_event(65, ctrl, 1200));
        let signal = classify_event(&release, &grabs, NUMLOCK).unwrap();
        assert_eq!(signal.kind, ActivationKind::Deactivated);
        assert_eq!(signal.shortcut_id, "quickChat");
    }

    #[test]
    fn unrelated_events_ignored() {
        let grabs = vec![grab("a", u16::from(ModMask::CONTROL), 65)];
        let press = Event::KeyPress(key_event(65, 0, 1));
        assert!(classify_event(&press, &grabs, NUMLOCK).is_none());
        assert!(classify_event(&press, &[], NUMLOCK).is_none());
    }

    #[test]
    fn unregister_without_display_is_noop() {
        let mut backend = X11Shortcuts::new();
        backend.unregister_all();
        backend.unregister_all();
        assert!(backend.grabs.is_empty());
    }

    #[test]
    fn empty_register_never_connects() {
        let mut backend = X11Shortcuts::new();
        let router = ActivationSignalRouter::new(4, true);
        assert!(backend.register(&[], &router).is_empty());
        assert!(backend.display.is_none());
    }
}
