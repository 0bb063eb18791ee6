mod chat;
mod doctor;
mod run;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use conduit_core::config::{load_config, ConduitConfig};
use conduit_core::RunError;

#[derive(Parser)]
#[command(name = "conduit", version, about = "Drive coding-agent CLIs from the terminal")]
struct Cli {
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one prompt to an agent and print its answer.
    Run(run::RunArgs),
    /// Chat with an agent on stdin, keeping its session between turns.
    Chat(chat::ChatArgs),
    /// Check that the configured agent binaries can be found.
    Doctor {
        /// Output results as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
        /// Path to conduit.toml config file.
        #[arg(long, default_value = "conduit.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run(args) => {
            let config = load(&args.config)?;
            run::run(args, &config).await
        }
        Command::Chat(args) => {
            let config = load(&args.config)?;
            chat::chat(args, &config).await
        }
        Command::Doctor { json, config } => {
            let config = load(&config)?;
            doctor::run_doctor(&config, json)
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load(path: &Path) -> Result<ConduitConfig> {
    load_config(path).with_context(|| format!("failed to load config from {}", path.display()))
}

/// Process exit status for a failed run.
pub(crate) fn exit_status_for(err: &RunError) -> u8 {
    match err {
        RunError::TimedOut { .. } => 124,
        RunError::Cancelled => 130,
        RunError::SpawnFailed { .. } => 127,
        _ => 1,
    }
}
