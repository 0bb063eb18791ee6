use serde_json::Value;

use super::types::*;
use super::{str_field, u64_field, Backend};
use crate::config::BackendConfig;

const KEY: &str = "codex";

const BYPASS_FLAG: &str = "--dangerously-bypass-approvals-and-sandbox";
const FULL_AUTO_FLAG: &str = "--full-auto";

/// Exec-style backend modelled on the Codex CLI (`codex exec --json`).
///
/// Global flags must come before the `resume` pseudo-subcommand, and the
/// prompt (with the system context prefixed) is always the last argument.
pub struct CodexBackend {
    config: BackendConfig,
}

impl CodexBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    /// Interpret one line of `exec --json` output.
    ///
    /// Legacy `{"id": .., "msg": {..}}` envelopes are unwrapped first. At most
    /// one session id and one text event are produced per line.
    pub fn parse_event(value: &Value) -> Vec<StreamEvent> {
        if !value.is_object() {
            return Vec::new();
        }
        let body = value.get("msg").filter(|m| m.is_object()).unwrap_or(value);

        let mut events = Vec::new();
        if let Some(id) = session_id(value).or_else(|| session_id(body)) {
            events.push(StreamEvent::SessionId(id.to_string()));
        }

        match str_field(body, "type") {
            Some("item.completed") => {
                if let Some(text) = body.get("item").and_then(agent_message_text) {
                    events.push(StreamEvent::TextFinal(text.to_string()));
                }
            }
            Some("agent_message_delta") | Some("item.delta") => {
                if let Some(delta) = delta_text(body) {
                    events.push(StreamEvent::TextDelta(delta.to_string()));
                }
            }
            Some("turn.completed") => {
                if let Some(usage) = body.get("usage").filter(|u| u.is_object()) {
                    events.push(StreamEvent::Usage(Usage {
                        input_tokens: u64_field(usage, "input_tokens"),
                        output_tokens: u64_field(usage, "output_tokens"),
                        cached_input_tokens: u64_field(usage, "cached_input_tokens"),
                    }));
                }
            }
            Some("turn.failed") => {
                let message = body
                    .get("error")
                    .and_then(|e| str_field(e, "message"))
                    .unwrap_or("turn failed");
                events.push(StreamEvent::Failed(message.to_string()));
            }
            None | Some("message") | Some("result") | Some("agent_message") => {
                let legacy = str_field(body, "message").or_else(|| str_field(body, "result"));
                if let Some(text) = legacy.filter(|t| !t.is_empty()) {
                    events.push(StreamEvent::TextFinal(text.to_string()));
                }
            }
            _ => {}
        }

        events
    }
}

impl Backend for CodexBackend {
    fn key(&self) -> &'static str {
        KEY
    }

    fn binary(&self) -> &str {
        self.config.binary_or(KEY)
    }

    fn build_command(&self, req: &RunRequest, _mode: OutputMode, context: &str) -> AgentCommand {
        let mut args = self.config.launcher_args.clone();
        args.push("exec".to_string());
        args.push("--json".to_string());
        args.push(
            if req.skip_permissions {
                BYPASS_FLAG
            } else {
                FULL_AUTO_FLAG
            }
            .to_string(),
        );
        args.push("--skip-git-repo-check".to_string());

        if let Some(model) = req.model.as_ref().or(self.config.model.as_ref()) {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(dir) = &req.workdir {
            args.push("--cd".to_string());
            args.push(dir.display().to_string());
        }
        if let Some(session_id) = &req.session_id {
            args.push("resume".to_string());
            args.push(session_id.clone());
        }
        args.push(prefix_context(context, &req.prompt));

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
        FinalTextPolicy::Replace
    }
}

fn session_id(obj: &Value) -> Option<&str> {
    let started = match str_field(obj, "type") {
        Some("thread.started") => str_field(obj, "thread_id"),
        _ => None,
    };
    started
        .or_else(|| str_field(obj, "thread_id"))
        .or_else(|| str_field(obj, "session_id"))
        .filter(|id| !id.is_empty())
}

fn agent_message_text(item: &Value) -> Option<&str> {
    let kind = str_field(item, "type").or_else(|| str_field(item, "item_type"));
    match kind {
        Some("agent_message") => str_field(item, "text"),
        _ => None,
    }
}

fn delta_text(body: &Value) -> Option<&str> {
    match body.get("delta") {
        Some(Value::String(s)) => Some(s.as_str()),
        Some(other) => str_field(other, "text"),
        None => None,
    }
}

/// Prefix the system context into the prompt text.
fn prefix_context(context: &str, prompt: &str) -> String {
    if context.is_empty() {
        prompt.to_string()
    } else {
        format!("<system_context>\n{context}\n</system_context>\n\n{prompt}")
    }
}
