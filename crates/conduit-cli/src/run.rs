use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use conduit_core::backend::{BackendRegistry, RunRequest};
use conduit_core::config::ConduitConfig;
use conduit_core::context::SystemContext;
use conduit_core::registry::ProcessRegistry;
use conduit_core::runner::{AgentRunner, RunEvent, RunnerPolicy};
use conduit_core::session::SessionStore;

use crate::exit_status_for;

#[derive(Args)]
pub struct RunArgs {
    /// Backend to use (codex, claude).
    #[arg(long, default_value = "claude")]
    pub backend: String,
    /// Prompt to send to the agent.
    #[arg(short, long)]
    pub prompt: String,
    /// Backend session id to continue.
    #[arg(long)]
    pub session: Option<String>,
    /// Model override.
    #[arg(long)]
    pub model: Option<String>,
    /// Working directory for the agent.
    #[arg(long)]
    pub workdir: Option<PathBuf>,
    /// Let the agent run tools without asking.
    #[arg(long)]
    pub skip_permissions: bool,
    /// Print text as the agent produces it.
    #[arg(long)]
    pub stream: bool,
    /// Print the final result as JSON.
    #[arg(long)]
    pub json: bool,
    /// Path to conduit.toml config file.
    #[arg(long, default_value = "conduit.toml")]
    pub config: PathBuf,
}

/// Build a runner for `backend_key` from configuration.
pub fn build_runner(
    config: &ConduitConfig,
    backend_key: &str,
    registry: Arc<ProcessRegistry>,
    sessions: Arc<SessionStore>,
) -> Result<AgentRunner> {
    let backend = BackendRegistry::from_config(&config.backends).resolve(backend_key)?;
    Ok(AgentRunner::new(
        backend,
        registry,
        sessions,
        RunnerPolicy::from_config(&config.runner),
        SystemContext::load(&config.context),
    ))
}

/// Print streamed text to stdout until the stream ends.
pub fn spawn_printer(mut rx: mpsc::Receiver<RunEvent>, echo: bool) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        let mut printed = false;
        while let Some(event) = rx.recv().await {
            match event {
                RunEvent::Text { delta, .. } if echo => {
                    stdout.write_all(delta.as_bytes()).await?;
                    stdout.flush().await?;
                    printed = true;
                }
                RunEvent::SessionReset => {
                    eprintln!("[previous session could not be resumed; starting a new one]");
                }
                _ => {}
            }
        }
        if printed {
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok(())
    })
}

pub async fn run(args: RunArgs, config: &ConduitConfig) -> Result<ExitCode> {
    let runner = Arc::new(build_runner(
        config,
        &args.backend,
        Arc::new(ProcessRegistry::new()),
        Arc::new(SessionStore::new()),
    )?);

    let mut request =
        RunRequest::new(args.prompt.as_str()).with_skip_permissions(args.skip_permissions);
    if let Some(session) = args.session {
        request = request.with_session(session);
    }
    if let Some(model) = args.model {
        request = request.with_model(model);
    }
    if let Some(workdir) = args.workdir {
        request = request.with_workdir(workdir);
    }

    let interrupt = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                runner.cancel();
            }
        })
    };

    let outcome = if args.stream {
        let (tx, rx) = mpsc::channel(64);
        let printer = spawn_printer(rx, !args.json);
        let outcome = runner.run_stream(request, tx).await;
        printer.await.context("output task panicked")??;
        outcome
    } else {
        runner.run(request).await
    };
    interrupt.abort();

    match outcome {
        Ok(result) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                if !args.stream {
                    println!("{}", result.text);
                }
                if !result.session_id.is_empty() {
                    eprintln!("session: {}", result.session_id);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("error: {err}");
            Ok(ExitCode::from(exit_status_for(&err)))
        }
    }
}
