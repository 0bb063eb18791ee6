//! Spawning and tearing down agent processes.
//!
//! Every agent runs in its own session (and therefore its own process group)
//! so that terminating it also reaches the tools it spawned.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::backend::AgentCommand;
use crate::error::RunError;

/// Grace period between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_millis(300);

/// Spawn `cmd` with stdin closed and stdout/stderr piped.
pub fn build_process(cmd: &AgentCommand) -> Result<Child, RunError> {
    let mut command = Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true);

    if let Some(cwd) = &cmd.cwd {
        command.current_dir(cwd);
    }

    #[cfg(unix)]
    {
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    command.spawn().map_err(|source| RunError::SpawnFailed {
        program: cmd.program.clone(),
        source,
    })
}

#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KillErrorKind {
    NoSuchProcess,
    PermissionDenied,
    Other(i32),
    Unknown,
}

#[cfg(unix)]
fn classify_kill_error(errno: Option<i32>) -> KillErrorKind {
    match errno {
        Some(code) if code == libc::ESRCH => KillErrorKind::NoSuchProcess,
        Some(code) if code == libc::EPERM => KillErrorKind::PermissionDenied,
        Some(code) => KillErrorKind::Other(code),
        None => KillErrorKind::Unknown,
    }
}

/// Send SIGTERM to the process group led by `pid` without waiting.
///
/// Returns false when the group could not be signalled (usually because it
/// has already exited).
pub fn signal_terminate(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let pgid = -(pid as i32);
        let result = unsafe { libc::kill(pgid, libc::SIGTERM) };
        if result == 0 {
            return true;
        }
        match classify_kill_error(std::io::Error::last_os_error().raw_os_error()) {
            KillErrorKind::NoSuchProcess => {
                tracing::debug!(pid, "process group already exited");
            }
            kind => {
                tracing::warn!(pid, ?kind, "failed sending SIGTERM to process group");
            }
        }
        false
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Terminate the child's process group: SIGTERM, a short grace period, then SIGKILL.
pub async fn terminate_process(child: &mut Child) {
    #[cfg(unix)]
    {
        let Some(pid_u32) = child.id() else {
            let _ = child.kill().await;
            return;
        };

        let pid = pid_u32 as i32;
        let pgid = -pid;

        let term_result = unsafe { libc::kill(pgid, libc::SIGTERM) };
        if term_result != 0 {
            match classify_kill_error(std::io::Error::last_os_error().raw_os_error()) {
                KillErrorKind::NoSuchProcess => {
                    tracing::debug!(pid, "process group already exited before SIGTERM");
                    return;
                }
                kind => {
                    tracing::warn!(
                        pid,
                        ?kind,
                        "failed sending SIGTERM to process group; falling back to child.kill"
                    );
                    let _ = child.kill().await;
                    return;
                }
            }
        }

        tokio::time::sleep(TERMINATE_GRACE).await;

        if let Ok(Some(_)) = child.try_wait() {
            return;
        }

        let kill_result = unsafe { libc::kill(pgid, libc::SIGKILL) };
        if kill_result != 0 {
            match classify_kill_error(std::io::Error::last_os_error().raw_os_error()) {
                KillErrorKind::NoSuchProcess => {
                    tracing::debug!(pid, "process group exited before SIGKILL escalation");
                    return;
                }
                kind => {
                    tracing::warn!(pid, ?kind, "failed sending SIGKILL to process group");
                }
            }
        }
        let _ = child.kill().await;
    }

    #[cfg(not(unix))]
    {
        let _ = child.kill().await;
    }
}
