use clap::{Parser, Subcommand};

use hotkeyd::hotkey::HotkeyDefinition;

#[derive(Parser)]
#[command(name = "hotkeyd", about = "Global hotkeys through the desktop portal or X11 grabs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the detected platform and registration strategy
    Probe {
        /// Host toolkit can grab shortcuts through its compositor integration
        #[arg(long)]
        toolkit_shortcuts: bool,
    },

    /// Register hotkeys and print activations until interrupted
    Run {
        /// Hotkey as ID=ACCELERATOR[=DESCRIPTION], e.g. quickChat=Ctrl+Shift+Space
        #[arg(long = "hotkey", value_name = "ID=ACCEL", required = true)]
        hotkeys: Vec<HotkeyDefinition>,

        /// Keep a hotkey defined but not enabled
        #[arg(long = "disable", value_name = "ID")]
        disabled: Vec<String>,

        /// Portal request timeout in milliseconds
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,

        /// Activation signals kept for diagnostics
        #[arg(long, default_value_t = 64)]
        history_depth: usize,

        /// Do not record activation signals
        #[arg(long)]
        no_track: bool,

        /// Trust a predicted session path without checking it
        #[arg(long)]
        no_verify: bool,

        /// Host toolkit can grab shortcuts through its compositor integration
        #[arg(long)]
        toolkit_shortcuts: bool,

        /// Parent window identifier passed to the portal
        #[arg(long, default_value = "")]
        parent_window: String,
    },
}
