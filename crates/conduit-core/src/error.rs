use std::time::Duration;

use thiserror::Error;

/// Failure of a single agent run.
///
/// Malformed backend output never shows up here: undecodable lines are
/// dropped by the decoder and the run carries on.
#[derive(Debug, Error)]
pub enum RunError {
    /// The agent executable could not be launched (not installed, not on `PATH`).
    #[error("failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Wall-clock budget exceeded; the process group was terminated.
    #[error("agent timed out after {}s", .after.as_secs())]
    TimedOut { after: Duration },

    /// The process exited unsuccessfully. `code` is `None` when it died from a signal.
    #[error("agent exited with {}: {stderr}", exit_label(.code))]
    NonZeroExit { code: Option<i32>, stderr: String },

    /// The backend's own terminal event reported a failure.
    #[error("agent reported an error: {message}")]
    BackendReported { message: String },

    /// The process was stopped through the runner or the process registry.
    #[error("agent run was cancelled")]
    Cancelled,

    /// Wraps `std::io::Error` raised while supervising the pipes.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// Whether this failure came from the process exiting unsuccessfully.
    pub fn is_exit_failure(&self) -> bool {
        matches!(self, Self::NonZeroExit { .. })
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "signal".to_string(),
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, RunError>;
