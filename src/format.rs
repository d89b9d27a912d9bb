//! Human-readable output for the CLI.
//!
//! Everything goes to stdout; logs stay on stderr through tracing.

use crate::hotkey::{HotkeyDefinition, HotkeyState, PlatformHotkeyStatus, RegistrationResult, Strategy};
use crate::platform::PlatformStatus;
use crate::portal::bus::BoundShortcut;
use crate::router::ActivationSignalStats;

/// Print the probe result.
pub fn print_platform(status: &PlatformStatus, strategy: Strategy) {
    println!("Wayland:   {}", yes_no(status.is_wayland));
    println!(
        "Desktop:   {} {}",
        status.desktop_environment,
        status.desktop_environment_version.as_deref().unwrap_or("")
    );
    println!("Portal:    {}", yes_no(status.portal_available));
    println!("Method:    {}", status.portal_method);
    println!("Strategy:  {strategy}");
}

/// Print per-hotkey desired state, actual state and last result.
pub fn print_status<F>(status: &PlatformHotkeyStatus, definitions: &[HotkeyDefinition], state_of: F)
where
    F: Fn(&str) -> Option<HotkeyState>,
{
    println!(
        "Global hotkeys: {}",
        if status.global_hotkeys_enabled { "enabled" } else { "disabled" }
    );
    if definitions.is_empty() {
        println!("No hotkeys defined");
        return;
    }

    println!("{:<20} {:<24} {:>7} {:<10} RESULT", "HOTKEY", "ACCELERATOR", "WANTED", "STATE");
    println!("{}", "-".repeat(80));
    for def in definitions {
        let state = state_of(&def.id).map_or_else(|| "-".to_string(), |s| s.to_string());
        let result = status
            .registration_results
            .iter()
            .find(|r| r.hotkey_id == def.id);
        println!(
            "{:<20} {:<24} {:>7} {:<10} {}",
            def.id,
            def.accelerator,
            yes_no(def.enabled_by_user),
            state,
            result_cell(result),
        );
    }
}

/// Print the shortcuts the portal reports for the live session.
pub fn print_bound(shortcuts: &[BoundShortcut]) {
    if shortcuts.is_empty() {
        println!("Portal reports no bound shortcuts");
        return;
    }
    println!("{:<20} TRIGGER", "BOUND");
    for s in shortcuts {
        println!(
            "{:<20} {}",
            s.id,
            s.trigger_description.as_deref().unwrap_or("(not assigned)")
        );
    }
}

/// Print activation signal statistics, newest signal first.
pub fn print_stats(stats: &ActivationSignalStats) {
    if !stats.tracking_enabled {
        println!("Signal tracking disabled");
        return;
    }

    println!("Signals:   {}", stats.total_signals);
    println!("Last:      {}", format_time(stats.last_signal_time));
    for (id, count) in &stats.signals_by_shortcut {
        println!("  {id:<20} {count:>6}");
    }
    if stats.signals.is_empty() {
        return;
    }

    println!("{:<20} {:<12} {:>14} BODY", "HOTKEY", "KIND", "TIMESTAMP");
    println!("{}", "-".repeat(70));
    for event in &stats.signals {
        println!(
            "{:<20} {:<12} {:>14} {}",
            event.hotkey_id,
            format!("{:?}", event.kind),
            event.timestamp,
            event.raw_body
        );
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn result_cell(result: Option<&RegistrationResult>) -> String {
    match result {
        None => "-".to_string(),
        Some(r) if r.success => "ok".to_string(),
        Some(r) => format!("failed: {}", r.error.as_deref().unwrap_or("unknown error")),
    }
}

fn format_time(millis: Option<u64>) -> String {
    match millis {
        Some(ms) => format!("{}.{:03}", ms / 1000, ms % 1000),
        None => "never".to_string(),
    }
}
