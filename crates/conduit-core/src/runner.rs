//! Runs one agent turn end to end.
//!
//! The runner asks its backend for a command, spawns it in a fresh process
//! group, feeds stdout through the decoder and interpreter and settles the
//! outcome. Timeout, process exit and cancellation race in a single
//! `select!`, so whichever fires first decides the result.

use std::pin::Pin;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{Backend, OutputMode, RunRequest, RunResult, TextAccumulator};
use crate::config::RunnerConfig;
use crate::context::SystemContext;
use crate::decoder::{self, LineDecoder};
use crate::error::{Result, RunError};
use crate::registry::{ProcessHandle, ProcessRegistry};
use crate::session::SessionStore;
use crate::supervisor;

const READ_CHUNK_BYTES: usize = 8 * 1024;
const STDERR_DRAIN_GRACE: Duration = Duration::from_secs(1);
const TERMINAL_SEND_GRACE: Duration = Duration::from_secs(5);

/// Limits applied to every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerPolicy {
    pub timeout: Duration,
    /// Maximum bytes of stdout (and, separately, stderr) retained per run.
    pub output_buffer_bytes: usize,
}

impl Default for RunnerPolicy {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

impl RunnerPolicy {
    pub fn from_config(cfg: &RunnerConfig) -> Self {
        Self {
            timeout: Duration::from_secs(cfg.timeout_seconds),
            output_buffer_bytes: cfg.output_buffer_bytes,
        }
    }
}

/// Item delivered to a streaming consumer.
///
/// A stream carries zero or more `Text` events and ends with exactly one
/// `Completed` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Text { delta: String, accumulated: String },
    /// The requested session could not be resumed; the turn restarts fresh.
    SessionReset,
    Completed(RunResult),
    Failed(String),
}

/// Everything collected from a process that exited on its own.
struct ProcessOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: String,
    accumulator: TextAccumulator,
    decoded_any: bool,
}

/// Deadline and stop signal of one process.
struct Watch {
    deadline: Pin<Box<Sleep>>,
    cancel_rx: mpsc::Receiver<()>,
}

impl Watch {
    fn new(timeout: Duration, cancel_rx: mpsc::Receiver<()>) -> Self {
        Self {
            deadline: Box::pin(tokio::time::sleep(timeout)),
            cancel_rx,
        }
    }
}

pub struct AgentRunner {
    backend: Arc<dyn Backend>,
    registry: Arc<ProcessRegistry>,
    sessions: Arc<SessionStore>,
    policy: RunnerPolicy,
    context: SystemContext,
    current: Mutex<Option<Arc<ProcessHandle>>>,
}

impl AgentRunner {
    pub fn new(
        backend: Arc<dyn Backend>,
        registry: Arc<ProcessRegistry>,
        sessions: Arc<SessionStore>,
        policy: RunnerPolicy,
        context: SystemContext,
    ) -> Self {
        Self {
            backend,
            registry,
            sessions,
            policy,
            context,
            current: Mutex::new(None),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Run to completion and return the final result.
    pub async fn run(&self, request: RunRequest) -> Result<RunResult> {
        self.run_with_recovery(&request, OutputMode::Buffered, None)
            .await
    }

    /// Run while forwarding text to `events` as it arrives.
    ///
    /// Exactly one terminal event is sent before this returns, unless the
    /// consumer leaves a full channel unread for a few seconds after the run
    /// settles. Dropping the receiver stops the agent.
    pub async fn run_stream(
        &self,
        request: RunRequest,
        events: mpsc::Sender<RunEvent>,
    ) -> Result<RunResult> {
        let result = self
            .run_with_recovery(&request, OutputMode::Streaming, Some(&events))
            .await;
        let terminal = match &result {
            Ok(run) => RunEvent::Completed(run.clone()),
            Err(e) => RunEvent::Failed(e.to_string()),
        };
        if tokio::time::timeout(TERMINAL_SEND_GRACE, events.send(terminal))
            .await
            .is_err()
        {
            warn!("stream consumer stalled; terminal event not delivered");
        }
        result
    }

    /// Stop the most recently started run if it is still going.
    pub fn cancel(&self) -> bool {
        let current = self.lock_current().clone();
        current.is_some_and(|handle| handle.terminate())
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<Arc<ProcessHandle>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_with_recovery(
        &self,
        request: &RunRequest,
        mode: OutputMode,
        events: Option<&mpsc::Sender<RunEvent>>,
    ) -> Result<RunResult> {
        match self.execute(request, mode, events).await {
            Err(err)
                if err.is_exit_failure()
                    && request.session_id.is_some()
                    && self.backend.retries_stale_session() =>
            {
                warn!(
                    backend = self.backend.key(),
                    session_id = request.session_id.as_deref().unwrap_or_default(),
                    error = %err,
                    "resume failed; retrying with a fresh session"
                );
                if let Some(key) = &request.conversation_key {
                    self.sessions.delete(key);
                }
                if let Some(tx) = events {
                    match tokio::time::timeout(self.policy.timeout, tx.send(RunEvent::SessionReset))
                        .await
                    {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) => return Err(RunError::Cancelled),
                        Err(_) => {
                            return Err(RunError::TimedOut {
                                after: self.policy.timeout,
                            })
                        }
                    }
                }
                self.execute(&request.without_session(), mode, events)
                    .await
            }
            other => other,
        }
    }

    async fn execute(
        &self,
        request: &RunRequest,
        mode: OutputMode,
        events: Option<&mpsc::Sender<RunEvent>>,
    ) -> Result<RunResult> {
        let run_id = Uuid::new_v4();
        let resuming = request.session_id.is_some();
        let context = self.context.render(resuming);
        let command = self.backend.build_command(request, mode, &context);

        info!(
            %run_id,
            backend = self.backend.key(),
            program = %command.program,
            resuming,
            conversation = request.conversation_key.as_deref().unwrap_or_default(),
            "starting agent run"
        );

        let mut child = supervisor::build_process(&command)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunError::Io(std::io::Error::other("stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunError::Io(std::io::Error::other("stderr not captured")))?;

        let (handle, cancel_rx) = ProcessHandle::new(child.id());
        if let Some(key) = &request.conversation_key {
            self.registry.register(key, Arc::clone(&handle));
        }
        *self.lock_current() = Some(Arc::clone(&handle));

        let stderr_task = spawn_stderr_drain(stderr, run_id, self.policy.output_buffer_bytes);
        let outcome = self
            .supervise(&mut child, stdout, stderr_task, cancel_rx, mode, events)
            .await;

        handle.mark_exited();
        if let Some(key) = &request.conversation_key {
            self.registry.release(key, &handle);
        }
        {
            let mut current = self.lock_current();
            if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &handle)) {
                *current = None;
            }
        }

        let output = match outcome {
            Ok(output) if handle.is_terminated() => {
                debug!(%run_id, status = %output.status, "agent exited after being stopped");
                Err(RunError::Cancelled)
            }
            other => other,
        };

        let result = output.and_then(|output| self.settle(request, mode, output));
        match &result {
            Ok(run) => info!(
                %run_id,
                session_id = %run.session_id,
                text_bytes = run.text.len(),
                "agent run completed"
            ),
            Err(e) => warn!(%run_id, error = %e, "agent run failed"),
        }
        result
    }

    async fn supervise(
        &self,
        child: &mut Child,
        mut stdout: ChildStdout,
        mut stderr_task: JoinHandle<String>,
        cancel_rx: mpsc::Receiver<()>,
        mode: OutputMode,
        events: Option<&mpsc::Sender<RunEvent>>,
    ) -> Result<ProcessOutput> {
        let limit = self.policy.output_buffer_bytes;
        let mut decoder = LineDecoder::with_max_line_bytes(limit);
        let mut accumulator = TextAccumulator::new(self.backend.final_text_policy());
        let mut raw: Vec<u8> = Vec::new();
        let mut truncated = false;
        let mut decoded_any = false;
        let mut stdout_open = true;
        let mut buf = vec![0u8; READ_CHUNK_BYTES];
        let mut watch = Watch::new(self.policy.timeout, cancel_rx);

        let status = loop {
            tokio::select! {
                read = stdout.read(&mut buf), if stdout_open => {
                    let n = match read {
                        Ok(n) => n,
                        Err(e) => {
                            supervisor::terminate_process(child).await;
                            stderr_task.abort();
                            return Err(RunError::Io(e));
                        }
                    };
                    let mut values = Vec::new();
                    if n == 0 {
                        stdout_open = false;
                        if mode == OutputMode::Streaming {
                            values.extend(decoder.finish());
                        }
                    } else {
                        let chunk = &buf[..n];
                        if raw.len() < limit {
                            let room = limit - raw.len();
                            raw.extend_from_slice(&chunk[..n.min(room)]);
                        }
                        if raw.len() >= limit && !truncated {
                            truncated = true;
                            warn!(limit, "agent stdout exceeded buffer limit; retaining a prefix");
                        }
                        if mode == OutputMode::Streaming {
                            values = decoder.push(chunk);
                        }
                    }

                    for value in values {
                        decoded_any = true;
                        if let Err(e) = self.forward(&value, &mut accumulator, events, &mut watch).await {
                            supervisor::terminate_process(child).await;
                            stderr_task.abort();
                            return Err(e);
                        }
                    }
                }
                status = child.wait(), if !stdout_open => {
                    break status?;
                }
                _ = watch.deadline.as_mut() => {
                    supervisor::terminate_process(child).await;
                    stderr_task.abort();
                    return Err(RunError::TimedOut { after: self.policy.timeout });
                }
                Some(()) = watch.cancel_rx.recv() => {
                    supervisor::terminate_process(child).await;
                    stderr_task.abort();
                    return Err(RunError::Cancelled);
                }
            }
        };

        let stderr = match tokio::time::timeout(STDERR_DRAIN_GRACE, &mut stderr_task).await {
            Ok(Ok(collected)) => collected,
            Ok(Err(e)) => {
                debug!(error = %e, "stderr drain task failed");
                String::new()
            }
            Err(_) => {
                stderr_task.abort();
                String::new()
            }
        };

        Ok(ProcessOutput {
            status,
            stdout: raw,
            stderr,
            accumulator,
            decoded_any,
        })
    }

    /// Fold one decoded value into the accumulator and forward any new text.
    ///
    /// A send waiting on a full channel still races the run deadline and the
    /// stop signal, so a consumer that stops reading cannot stall the run.
    /// A consumer that has gone away counts as a cancellation.
    async fn forward(
        &self,
        value: &serde_json::Value,
        accumulator: &mut TextAccumulator,
        events: Option<&mpsc::Sender<RunEvent>>,
        watch: &mut Watch,
    ) -> Result<()> {
        for event in self.backend.interpret(value) {
            let Some(delta) = accumulator.apply(event) else {
                continue;
            };
            let Some(tx) = events else {
                continue;
            };
            let text = RunEvent::Text {
                delta,
                accumulated: accumulator.text().to_string(),
            };
            tokio::select! {
                sent = tx.send(text) => {
                    if sent.is_err() {
                        debug!("stream consumer dropped; stopping agent");
                        return Err(RunError::Cancelled);
                    }
                }
                _ = watch.deadline.as_mut() => {
                    warn!("stream consumer stalled until the run deadline");
                    return Err(RunError::TimedOut { after: self.policy.timeout });
                }
                Some(()) = watch.cancel_rx.recv() => {
                    return Err(RunError::Cancelled);
                }
            }
        }
        Ok(())
    }

    fn settle(
        &self,
        request: &RunRequest,
        mode: OutputMode,
        output: ProcessOutput,
    ) -> Result<RunResult> {
        let ProcessOutput {
            status,
            stdout,
            stderr,
            mut accumulator,
            mut decoded_any,
        } = output;

        if mode == OutputMode::Buffered {
            for value in decoder::decode_all(&stdout) {
                decoded_any = true;
                for event in self.backend.interpret(&value) {
                    accumulator.apply(event);
                }
            }
        }

        if !status.success() {
            let stderr = stderr.trim();
            let stderr = if stderr.is_empty() {
                accumulator.failure().unwrap_or_default().to_string()
            } else {
                stderr.to_string()
            };
            return Err(RunError::NonZeroExit {
                code: status.code(),
                stderr,
            });
        }

        if let Some(message) = accumulator.failure() {
            return Err(RunError::BackendReported {
                message: message.to_string(),
            });
        }

        let mut text = accumulator.text().to_string();
        if !decoded_any && text.is_empty() {
            text = String::from_utf8_lossy(&stdout).trim().to_string();
        }

        let session_id = accumulator
            .session_id()
            .map(str::to_string)
            .or_else(|| request.session_id.clone())
            .unwrap_or_default();
        if let Some(key) = &request.conversation_key {
            self.sessions.set(key, &session_id);
        }

        let resumed =
            !session_id.is_empty() && request.session_id.as_deref() == Some(session_id.as_str());
        Ok(RunResult {
            text,
            session_id,
            usage: accumulator.usage(),
            resumed,
        })
    }
}

/// Drain stderr into a bounded buffer, logging each line.
fn spawn_stderr_drain(stderr: ChildStderr, run_id: Uuid, limit: usize) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut line = Vec::new();
        let mut collected = String::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    debug!(%run_id, line = %text.trim_end(), "agent stderr");
                    if collected.len() + text.len() <= limit {
                        collected.push_str(&text);
                    }
                }
            }
        }
        collected
    })
}
