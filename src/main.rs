mod cli;

use std::time::Duration;

use clap::Parser;
use cli::{Cli, Command};
use hotkeyd::{config, format, hotkey, platform};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Probe { toolkit_shortcuts } => {
            let status = platform::probe(toolkit_shortcuts);
            format::print_platform(status, hotkey::Strategy::for_status(status));
        }
        Command::Run {
            hotkeys,
            disabled,
            timeout_ms,
            history_depth,
            no_track,
            no_verify,
            toolkit_shortcuts,
            parent_window,
        } => {
            let config = config::RegistryConfig {
                request_timeout: Duration::from_millis(timeout_ms),
                history_depth,
                track_signals: !no_track,
                verify_predicted_session: !no_verify,
                toolkit_shortcuts,
                parent_window,
            };
            if let Err(e) = hotkey::run(hotkeys, disabled, config).await {
                tracing::error!(error = %e, "hotkey daemon failed");
                eprintln!("hotkeyd run: {e}");
                std::process::exit(1);
            }
        }
    }
}
