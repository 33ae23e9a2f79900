// ABOUTME: Entry point for the shipwright CLI application.
// ABOUTME: Parses arguments, sets up tracing and Ctrl-C cancellation, dispatches to command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use commands::Lifecycle;
use shipwright::config;
use shipwright::error::Result;
use shipwright::output::{Output, OutputMode};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling current phase");
            on_interrupt.cancel();
        }
    });

    if let Err(e) = run(cli, cancel, Output::new(mode)).await {
        // Deploy failures were already reported in full.
        if !matches!(e, shipwright::error::Error::DeployFailed { .. }) {
            Output::new(mode).error(&e.to_string());
        }
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli, cancel: CancellationToken, output: Output) -> Result<()> {
    let args = &cli.sources;
    match cli.command {
        Commands::Init {
            domain,
            admin_email,
            strategy,
            force,
        } => {
            let cwd = std::env::current_dir()?;
            let path = config::init_config(
                &cwd,
                domain.as_deref(),
                admin_email.as_deref(),
                strategy.map(Into::into),
                force,
            )?;
            output.success(&format!("Wrote {}", path.display()));
            Ok(())
        }
        Commands::Deploy { force } => commands::deploy(args, force, cancel, output).await,
        Commands::Status => commands::status(args, output).await,
        Commands::Logs { service, lines } => commands::logs(args, &service, lines, output).await,
        Commands::Start { services } => {
            commands::lifecycle(args, Lifecycle::Start, &services, output).await
        }
        Commands::Stop { services } => {
            commands::lifecycle(args, Lifecycle::Stop, &services, output).await
        }
        Commands::Restart { services } => {
            commands::lifecycle(args, Lifecycle::Restart, &services, output).await
        }
        Commands::Rollback { force } => commands::rollback(args, force, output).await,
    }
}
