use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One turn to send to an agent backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub prompt: String,
    /// Backend session to continue; `None` starts a fresh session.
    pub session_id: Option<String>,
    pub skip_permissions: bool,
    pub model: Option<String>,
    pub workdir: Option<PathBuf>,
    /// Conversation the spawned process is registered under.
    pub conversation_key: Option<String>,
}

impl RunRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_skip_permissions(mut self, skip: bool) -> Self {
        self.skip_permissions = skip;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn with_conversation_key(mut self, key: impl Into<String>) -> Self {
        self.conversation_key = Some(key.into());
        self
    }

    /// Copy of this request that starts a fresh session.
    pub fn without_session(&self) -> Self {
        Self {
            session_id: None,
            ..self.clone()
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub text: String,
    /// Empty when the backend never reported a session; continuation is then unavailable.
    pub session_id: String,
    pub usage: Option<Usage>,
    /// Whether the run continued the requested session.
    pub resumed: bool,
}

/// Token accounting reported by a backend. Observability only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_input_tokens: u64,
}

/// Backend-agnostic event derived from one decoded output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Fragment appended to the accumulated text.
    TextDelta(String),
    /// Complete text; combined with the accumulated text per [`FinalTextPolicy`].
    TextFinal(String),
    SessionId(String),
    Usage(Usage),
    /// The backend's terminal event reported a failure.
    Failed(String),
    Ignorable,
}

/// How the agent's stdout is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Collected in full and decoded once the process exits.
    Buffered,
    /// Decoded incrementally while the process runs.
    Streaming,
}

/// How a [`StreamEvent::TextFinal`] combines with text streamed earlier in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalTextPolicy {
    /// The final text supersedes everything accumulated so far.
    Replace,
    /// Additive merge that keeps streamed narration the final text dropped.
    Merge,
}

/// Command built by a backend for the runner to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; inherits the current one when `None`.
    pub cwd: Option<PathBuf>,
}
