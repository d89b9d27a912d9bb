//! Global hotkey registration across X11 and Wayland desktops.
//!
//! Wayland sessions register through the XDG Desktop Portal
//! `GlobalShortcuts` interface ([`portal`]); X11 sessions grab keys on the
//! root window ([`native`]). [`hotkey::HotkeyRegistry`] picks the strategy
//! from the cached [`platform`] probe and routes activations through
//! [`router::ActivationSignalRouter`].

pub mod config;
pub mod format;
pub mod hotkey;
pub mod native;
pub mod platform;
pub mod portal;
pub mod router;
