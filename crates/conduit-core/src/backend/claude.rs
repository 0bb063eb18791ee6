use serde_json::Value;

use super::types::*;
use super::{str_field, u64_field, Backend};
use crate::config::BackendConfig;

const KEY: &str = "claude";

/// Print-style backend modelled on the Claude Code CLI (`claude -p`).
///
/// Buffered runs ask for a single JSON result object, streaming runs for
/// `stream-json` lines. The system context travels in
/// `--append-system-prompt` instead of the prompt text.
pub struct ClaudeBackend {
    config: BackendConfig,
}

impl ClaudeBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    /// Interpret one `stream-json` line or the buffered `json` result object.
    pub fn parse_event(value: &Value) -> Vec<StreamEvent> {
        match str_field(value, "type") {
            Some("system") if str_field(value, "subtype") == Some("init") => {
                session_event(value).into_iter().collect()
            }
            Some("assistant") => assistant_text_blocks(value)
                .map(|text| StreamEvent::TextDelta(text.to_string()))
                .collect(),
            Some("result") => parse_result(value),
            _ => Vec::new(),
        }
    }
}

impl Backend for ClaudeBackend {
    fn key(&self) -> &'static str {
        KEY
    }

    fn binary(&self) -> &str {
        self.config.binary_or(KEY)
    }

    fn build_command(&self, req: &RunRequest, mode: OutputMode, context: &str) -> AgentCommand {
        let mut args = self.config.launcher_args.clone();
        args.push("-p".to_string());
        args.push("--output-format".to_string());
        match mode {
            OutputMode::Buffered => args.push("json".to_string()),
            OutputMode::Streaming => {
                args.push("stream-json".to_string());
                args.push("--verbose".to_string());
            }
        }

        if req.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }
        if let Some(session_id) = &req.session_id {
            args.push("--resume".to_string());
            args.push(session_id.clone());
        }
        if let Some(model) = req.model.as_ref().or(self.config.model.as_ref()) {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.push("--append-system-prompt".to_string());
        args.push(context.to_string());
        args.push(req.prompt.clone());

        AgentCommand {
            program: self.binary().to_string(),
            args,
            cwd: req.workdir.clone(),
        }
    }

    fn interpret(&self, value: &Value) -> Vec<StreamEvent> {
        Self::parse_event(value)
    }

    fn final_text_policy(&self) -> FinalTextPolicy {
        FinalTextPolicy::Merge
    }

    fn retries_stale_session(&self) -> bool {
        true
    }
}

fn session_event(value: &Value) -> Option<StreamEvent> {
    str_field(value, "session_id")
        .filter(|id| !id.is_empty())
        .map(|id| StreamEvent::SessionId(id.to_string()))
}

fn assistant_text_blocks(value: &Value) -> impl Iterator<Item = &str> {
    value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|block| str_field(block, "type") == Some("text"))
        .filter_map(|block| str_field(block, "text"))
        .filter(|text| !text.is_empty())
}

fn parse_result(value: &Value) -> Vec<StreamEvent> {
    let mut events: Vec<StreamEvent> = session_event(value).into_iter().collect();

    let subtype = str_field(value, "subtype").unwrap_or("");
    let is_error = value
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        || subtype.starts_with("error");

    if is_error {
        events.push(StreamEvent::Failed(error_message(value, subtype)));
    } else if let Some(result) = str_field(value, "result") {
        events.push(StreamEvent::TextFinal(result.to_string()));
    }

    if let Some(usage) = value.get("usage").filter(|u| u.is_object()) {
        events.push(StreamEvent::Usage(Usage {
            input_tokens: u64_field(usage, "input_tokens"),
            output_tokens: u64_field(usage, "output_tokens"),
            cached_input_tokens: u64_field(usage, "cache_read_input_tokens"),
        }));
    }

    events
}

fn error_message(value: &Value, subtype: &str) -> String {
    if let Some(result) = str_field(value, "result").filter(|r| !r.is_empty()) {
        return result.to_string();
    }

    let errors: Vec<&str> = value
        .get("errors")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .collect();
    if !errors.is_empty() {
        return errors.join("; ");
    }

    if subtype.is_empty() {
        "unknown error".to_string()
    } else {
        subtype.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend() -> ClaudeBackend {
        ClaudeBackend::new(BackendConfig::default())
    }

    #[test]
    fn build_command_streaming_layout() {
        let req = RunRequest::new("Fix the bug")
            .with_skip_permissions(true)
            .with_session("abc123")
            .with_model("sonnet");
        let cmd = backend().build_command(&req, OutputMode::Streaming, "Persona.");
        assert_eq!(cmd.program, "claude");
        assert_eq!(
            cmd.args,
            vec![
                "-p",
                "--output-format",
                "stream-json",
                "--verbose",
                "--dangerously-skip-permissions",
                "--resume",
                "abc123",
                "--model",
                "sonnet",
                "--append-system-prompt",
                "Persona.",
                "Fix the bug",
            ]
        );
    }

    #[test]
    fn build_command_buffered_uses_json_without_verbose() {
        let cmd = backend().build_command(&RunRequest::new("hi"), OutputMode::Buffered, "ctx");
        assert_eq!(
            cmd.args,
            vec!["-p", "--output-format", "json", "--append-system-prompt", "ctx", "hi"]
        );
    }

    #[test]
    fn prompt_is_not_prefixed_with_context() {
        let cmd = backend().build_command(&RunRequest::new("hi"), OutputMode::Streaming, "ctx");
        assert_eq!(cmd.args.last().unwrap(), "hi");
    }

    #[test]
    fn init_event_yields_session_id() {
        let events = ClaudeBackend::parse_event(&json!({
            "type": "system", "subtype": "init", "cwd": "/tmp", "session_id": "abc123", "tools": ["Bash"]
        }));
        assert_eq!(events, vec![StreamEvent::SessionId("abc123".into())]);
    }

    #[test]
    fn assistant_text_blocks_become_deltas() {
        let events = ClaudeBackend::parse_event(&json!({
            "type": "assistant",
            "message": {"content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "Bash", "input": {"command": "ls"}},
                {"type": "text", "text": "Running tests."}
            ]},
            "session_id": "abc123"
        }));
        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("Let me check.".into()),
                StreamEvent::TextDelta("Running tests.".into()),
            ]
        );
    }

    #[test]
    fn assistant_without_text_yields_nothing() {
        let events = ClaudeBackend::parse_event(&json!({
            "type": "assistant",
            "message": {"content": [{"type": "tool_use", "id": "t", "name": "Read", "input": {}}]}
        }));
        assert!(events.is_empty());
    }

    #[test]
    fn success_result_yields_session_text_and_usage() {
        let events = ClaudeBackend::parse_event(&json!({
            "type": "result", "subtype": "success", "is_error": false,
            "result": "Done", "session_id": "abc123", "total_cost_usd": 0.05,
            "usage": {"input_tokens": 12, "output_tokens": 40, "cache_read_input_tokens": 900}
        }));
        assert_eq!(
            events,
            vec![
                StreamEvent::SessionId("abc123".into()),
                StreamEvent::TextFinal("Done".into()),
                StreamEvent::Usage(Usage {
                    input_tokens: 12,
                    output_tokens: 40,
                    cached_input_tokens: 900,
                }),
            ]
        );
    }

    #[test]
    fn error_result_yields_failure_not_text() {
        let events = ClaudeBackend::parse_event(&json!({
            "type": "result", "subtype": "success", "is_error": true,
            "result": "Credit balance is too low", "session_id": "abc123"
        }));
        assert_eq!(
            events,
            vec![
                StreamEvent::SessionId("abc123".into()),
                StreamEvent::Failed("Credit balance is too low".into()),
            ]
        );
    }

    #[test]
    fn error_subtype_without_result_uses_errors_or_subtype() {
        let with_errors = ClaudeBackend::parse_event(&json!({
            "type": "result", "subtype": "error_during_execution",
            "errors": ["tool crashed", "aborted"]
        }));
        assert_eq!(with_errors, vec![StreamEvent::Failed("tool crashed; aborted".into())]);

        let bare = ClaudeBackend::parse_event(&json!({
            "type": "result", "subtype": "error_max_turns", "session_id": "s"
        }));
        assert_eq!(
            bare,
            vec![
                StreamEvent::SessionId("s".into()),
                StreamEvent::Failed("error_max_turns".into()),
            ]
        );
    }

    #[test]
    fn unknown_types_are_ignored() {
        assert!(ClaudeBackend::parse_event(&json!({"type": "user", "message": {}})).is_empty());
        assert!(ClaudeBackend::parse_event(&json!({"type": "stream_event"})).is_empty());
        assert!(ClaudeBackend::parse_event(&json!({"no_type": true})).is_empty());
    }

    #[test]
    fn backend_retries_stale_sessions_and_merges() {
        assert!(backend().retries_stale_session());
        assert_eq!(backend().final_text_policy(), FinalTextPolicy::Merge);
    }
}
