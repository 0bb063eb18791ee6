//! Shared helpers for runner integration tests.
//!
//! Backends are pointed at `sh -c <script> fake`, so the argv they generate
//! arrives in the script as `$1..$n`.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use conduit_core::backend::{Backend, ClaudeBackend, CodexBackend};
use conduit_core::config::BackendConfig;
use conduit_core::context::SystemContext;
use conduit_core::registry::ProcessRegistry;
use conduit_core::runner::{AgentRunner, RunnerPolicy};
use conduit_core::session::SessionStore;

pub fn script_config(script: &str) -> BackendConfig {
    BackendConfig {
        binary: Some("sh".to_string()),
        model: None,
        launcher_args: vec!["-c".to_string(), script.to_string(), "fake".to_string()],
    }
}

pub fn codex(script: &str) -> Arc<dyn Backend> {
    Arc::new(CodexBackend::new(script_config(script)))
}

pub fn claude(script: &str) -> Arc<dyn Backend> {
    Arc::new(ClaudeBackend::new(script_config(script)))
}

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Script that replays a captured transcript on stdout.
pub fn replay(name: &str) -> String {
    format!("cat '{}'", fixture(name).display())
}

/// Script prefix that records the received argv, NUL-separated, to `path`.
pub fn record_args(path: &Path) -> String {
    format!("printf '%s\\0' \"$@\" > '{}'", path.display())
}

pub fn read_args(path: &Path) -> Vec<String> {
    let raw = std::fs::read_to_string(path).unwrap();
    raw.split('\0')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct Harness {
    pub runner: Arc<AgentRunner>,
    pub registry: Arc<ProcessRegistry>,
    pub sessions: Arc<SessionStore>,
}

pub fn harness(backend: Arc<dyn Backend>, timeout: Duration) -> Harness {
    harness_with_context(backend, timeout, SystemContext::empty())
}

pub fn harness_with_context(
    backend: Arc<dyn Backend>,
    timeout: Duration,
    context: SystemContext,
) -> Harness {
    let registry = Arc::new(ProcessRegistry::new());
    let sessions = Arc::new(SessionStore::new());
    let runner = Arc::new(AgentRunner::new(
        backend,
        Arc::clone(&registry),
        Arc::clone(&sessions),
        RunnerPolicy {
            timeout,
            output_buffer_bytes: 1024 * 1024,
        },
        context,
    ));
    Harness {
        runner,
        registry,
        sessions,
    }
}
