use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::warn;

mod commands;
mod output;
mod prompt;

use commands::backup::BackupCommands;
use commands::config::ConfigCommands;
use commands::health::HealthArgs;
use commands::Fleet;

#[derive(Parser)]
#[command(
    name = "wpfleet",
    about = "Safe configuration changes and health checks for WordPress fleets",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Fleet config file
    #[arg(long, global = true, default_value = "wpfleet.toml")]
    config: PathBuf,

    /// Hosts processed at once (default: [fleet] concurrency)
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Report format
    #[arg(long, global = true, value_enum, default_value_t = output::OutputFormat::Table)]
    format: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand a host range expression, e.g. "wp%02d.example.com:1-20:!7,9-11"
    Hosts { range: String },
    /// Read or change compose-file values
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
    /// Create, list or restore compose-file backups
    Backup {
        #[command(subcommand)]
        action: BackupCommands,
    },
    /// Probe hosts and report health verdicts
    Health(HealthArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wpfleet=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // First Ctrl-C stops dispatching new hosts; in-flight hosts finish.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight hosts");
            let _ = shutdown_tx.send(true);
        }
    });

    let fleet = Fleet::load(&cli.config, cli.concurrency, cli.format, shutdown_rx)?;

    let ok = match cli.command {
        Commands::Hosts { range } => commands::hosts::execute(&range, &fleet)?,
        Commands::Config { action } => commands::config::execute(action, &fleet).await?,
        Commands::Backup { action } => commands::backup::execute(action, &fleet).await?,
        Commands::Health(args) => commands::health::execute(args, &fleet).await?,
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
