use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::backend::{RunRequest, RunResult};
use crate::error::Result;
use crate::registry::ProcessRegistry;
use crate::runner::{AgentRunner, RunEvent};
use crate::session::SessionStore;

/// Options applied to every turn sent through [`Conversations`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunDefaults {
    pub model: Option<String>,
    pub workdir: Option<PathBuf>,
    pub skip_permissions: bool,
}

/// Chat-facing facade: one agent session and at most one process per key.
pub struct Conversations {
    runner: Arc<AgentRunner>,
    sessions: Arc<SessionStore>,
    registry: Arc<ProcessRegistry>,
    defaults: RunDefaults,
}

impl Conversations {
    pub fn new(
        runner: Arc<AgentRunner>,
        sessions: Arc<SessionStore>,
        registry: Arc<ProcessRegistry>,
        defaults: RunDefaults,
    ) -> Self {
        Self {
            runner,
            sessions,
            registry,
            defaults,
        }
    }

    /// Send one turn, continuing the conversation's session when there is one.
    ///
    /// A turn already running for `key` is stopped first.
    pub async fn send(
        &self,
        key: &str,
        prompt: &str,
        events: mpsc::Sender<RunEvent>,
    ) -> Result<RunResult> {
        let mut request = RunRequest::new(prompt)
            .with_conversation_key(key)
            .with_skip_permissions(self.defaults.skip_permissions);
        if let Some(session_id) = self.sessions.get(key) {
            request = request.with_session(session_id);
        }
        if let Some(model) = &self.defaults.model {
            request = request.with_model(model.clone());
        }
        if let Some(workdir) = &self.defaults.workdir {
            request = request.with_workdir(workdir.clone());
        }
        self.runner.run_stream(request, events).await
    }

    /// Start over: stop any running turn and forget the session.
    pub fn reset(&self, key: &str) -> bool {
        let stopped = self.registry.stop(key);
        let forgotten = self.sessions.delete(key);
        info!(key, stopped, forgotten, "conversation reset");
        stopped || forgotten
    }

    pub fn stop(&self, key: &str) -> bool {
        self.registry.stop(key)
    }

    pub fn is_busy(&self, key: &str) -> bool {
        self.registry.is_running(key)
    }

    pub fn session(&self, key: &str) -> Option<String> {
        self.sessions.get(key)
    }
}
