pub mod accumulator;
pub mod claude;
pub mod codex;
pub mod probe;
pub mod registry;
pub mod types;

use serde_json::Value;

pub use accumulator::{merge_final_text, TextAccumulator};
pub use claude::ClaudeBackend;
pub use codex::CodexBackend;
pub use probe::{probe_all, ProbeReport, ProbeResult};
pub use registry::{BackendRegistry, RegistryError};
pub use types::{
    AgentCommand, FinalTextPolicy, OutputMode, RunRequest, RunResult, StreamEvent, Usage,
};

/// One agent CLI family.
///
/// A backend knows how to build the argv for a request and how to read its
/// JSON-line vocabulary. The runner is written against this trait only, so
/// adding a backend never touches it.
pub trait Backend: Send + Sync {
    /// Stable key used in configuration and on the command line.
    fn key(&self) -> &'static str;

    /// Executable that [`Backend::build_command`] launches.
    fn binary(&self) -> &str;

    /// Build the command for `req`. `context` is the rendered system context.
    fn build_command(&self, req: &RunRequest, mode: OutputMode, context: &str) -> AgentCommand;

    /// Map one decoded JSON line to normalized events.
    ///
    /// Unknown shapes yield no events; they are never an error.
    fn interpret(&self, value: &Value) -> Vec<StreamEvent>;

    fn final_text_policy(&self) -> FinalTextPolicy;

    /// Whether a failed resume should be retried once with a fresh session.
    fn retries_stale_session(&self) -> bool {
        false
    }
}

pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

pub(crate) fn u64_field(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}
