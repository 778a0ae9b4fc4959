//! Thin process entry point: parse CLI overrides, build a `Manager`, load
//! whatever modules registered themselves via `modkit::register_module!`,
//! and run until a shutdown signal arrives.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use modkit::bootstrap::HostAdapter;
use modkit::{Manager, ManagerEvent, ManagerOptions};
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Modular application kernel host.
#[derive(Parser)]
#[command(name = "kernel-host")]
#[command(about = "Runs the compiled-in module set to completion or shutdown")]
#[command(version)]
struct Cli {
    /// Directory holding per-module JSON config documents
    #[arg(long)]
    config_path: Option<PathBuf>,

    /// Log verbosity (-v debug, -vv trace); overrides `RUST_LOG`/`LOG_LEVEL`
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, initialize and start every registered module (default)
    Run,
    /// Load modules and report the resolved dependency order, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level_override = match cli.verbose {
        0 => None,
        1 => Some("debug"),
        _ => Some("trace"),
    };
    modkit::telemetry::init_logging(level_override)?;

    let mut options = ManagerOptions::default();
    options.config_path = cli.config_path;
    let resolved = options.resolve();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_host(resolved).await,
        Commands::Check => check_modules(resolved).await,
    }
}

async fn check_modules(options: modkit::ResolvedOptions) -> Result<()> {
    let manager = Manager::new(options);
    let tally = manager.load_modules().await?;
    tracing::info!(
        loaded = tally.loaded,
        disabled = tally.disabled,
        "module graph resolved"
    );
    for status in manager.module_status() {
        println!("{} [{:?}]", status.name, status.state);
    }
    Ok(())
}

async fn run_host(options: modkit::ResolvedOptions) -> Result<()> {
    let shutdown_timeout = options.shutdown_timeout;
    let manager = Manager::new(options);

    let cancel = CancellationToken::new();
    let host = HostAdapter::new(cancel.clone());
    host.install_signal_handlers();

    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let ManagerEvent::Ready(statuses) = event {
                tracing::info!(modules = statuses.len(), "all modules started");
            }
        }
    });

    tracing::info!("loading modules");
    manager.load_modules().await?;
    manager.initialize_modules().await?;

    tracing::info!("kernel host running, waiting for shutdown signal");
    cancel.cancelled().await;

    tracing::info!("shutting down");
    host.stop_with_deadline(&manager, shutdown_timeout).await?;

    Ok(())
}
