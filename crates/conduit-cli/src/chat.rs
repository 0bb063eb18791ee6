use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use conduit_core::config::ConduitConfig;
use conduit_core::conversation::{Conversations, RunDefaults};
use conduit_core::registry::ProcessRegistry;
use conduit_core::session::SessionStore;

use crate::run::{build_runner, spawn_printer};

#[derive(Args)]
pub struct ChatArgs {
    /// Backend to use (codex, claude).
    #[arg(long, default_value = "claude")]
    pub backend: String,
    /// Conversation key the session is stored under.
    #[arg(long, default_value = "terminal")]
    pub key: String,
    /// Model override.
    #[arg(long)]
    pub model: Option<String>,
    /// Working directory for the agent.
    #[arg(long)]
    pub workdir: Option<PathBuf>,
    /// Let the agent run tools without asking.
    #[arg(long)]
    pub skip_permissions: bool,
    /// Path to conduit.toml config file.
    #[arg(long, default_value = "conduit.toml")]
    pub config: PathBuf,
}

enum Input<'a> {
    Quit,
    Reset,
    Skip,
    Prompt(&'a str),
}

fn classify(line: &str) -> Input<'_> {
    match line.trim() {
        "/quit" | "/exit" => Input::Quit,
        "/new" => Input::Reset,
        "" => Input::Skip,
        prompt => Input::Prompt(prompt),
    }
}

pub async fn chat(args: ChatArgs, config: &ConduitConfig) -> Result<ExitCode> {
    let registry = Arc::new(ProcessRegistry::new());
    let sessions = Arc::new(SessionStore::new());
    let runner = build_runner(
        config,
        &args.backend,
        Arc::clone(&registry),
        Arc::clone(&sessions),
    )?;
    let conversations = Conversations::new(
        Arc::new(runner),
        sessions,
        Arc::clone(&registry),
        RunDefaults {
            model: args.model,
            workdir: args.workdir,
            skip_permissions: args.skip_permissions,
        },
    );

    // Ctrl+C stops the running turn; with nothing running it ends the chat.
    {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if registry.stop_all() == 0 {
                    std::process::exit(130);
                }
            }
        });
    }

    eprintln!("conduit chat ({}). /new starts over, /quit exits.", args.backend);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        match classify(&line) {
            Input::Quit => break,
            Input::Skip => continue,
            Input::Reset => {
                conversations.reset(&args.key);
                eprintln!("[started a new conversation]");
            }
            Input::Prompt(prompt) => {
                let (tx, rx) = mpsc::channel(64);
                let printer = spawn_printer(rx, true);
                let outcome = conversations.send(&args.key, prompt, tx).await;
                printer.await.context("output task panicked")??;
                if let Err(err) = outcome {
                    eprintln!("error: {err}");
                }
            }
        }
    }

    registry.stop_all();
    Ok(ExitCode::SUCCESS)
}
