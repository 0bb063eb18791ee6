use tracing::debug;

use super::types::{FinalTextPolicy, StreamEvent, Usage};

/// Running state of one run: text, last session id, usage and failure.
#[derive(Debug)]
pub struct TextAccumulator {
    policy: FinalTextPolicy,
    text: String,
    session_id: Option<String>,
    usage: Option<Usage>,
    failure: Option<String>,
}

impl TextAccumulator {
    pub fn new(policy: FinalTextPolicy) -> Self {
        Self {
            policy,
            text: String::new(),
            session_id: None,
            usage: None,
            failure: None,
        }
    }

    /// Fold one event into the state.
    ///
    /// Returns the fragment to forward to a streaming consumer when the text
    /// changed. A replacement that does not extend the previous text is
    /// forwarded whole.
    pub fn apply(&mut self, event: StreamEvent) -> Option<String> {
        match event {
            StreamEvent::TextDelta(fragment) => {
                if fragment.is_empty() {
                    return None;
                }
                self.text.push_str(&fragment);
                Some(fragment)
            }
            StreamEvent::TextFinal(full) => {
                let next = match self.policy {
                    FinalTextPolicy::Replace => full,
                    FinalTextPolicy::Merge => merge_final_text(&self.text, &full),
                };
                if next == self.text {
                    return None;
                }
                let fragment = match next.strip_prefix(self.text.as_str()) {
                    Some(tail) if !self.text.is_empty() => tail.to_string(),
                    _ => next.clone(),
                };
                self.text = next;
                Some(fragment)
            }
            StreamEvent::SessionId(id) => {
                if !id.is_empty() {
                    self.session_id = Some(id);
                }
                None
            }
            StreamEvent::Usage(usage) => {
                debug!(
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    cached_input_tokens = usage.cached_input_tokens,
                    "agent usage"
                );
                self.usage = Some(usage);
                None
            }
            StreamEvent::Failed(message) => {
                self.failure = Some(message);
                None
            }
            StreamEvent::Ignorable => None,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }
}

/// Combine streamed text with a terminal result.
///
/// Some backend versions drop narration emitted before a tool call from the
/// final result, so streamed text is kept unless the result already covers it:
///
/// - an empty result keeps the streamed text;
/// - a result containing the streamed text replaces it;
/// - streamed text that already contains the result is kept as is;
/// - otherwise the result is appended after a blank line (`"\n\n"`), so the
///   narration and the answer read as separate paragraphs.
pub fn merge_final_text(streamed: &str, result: &str) -> String {
    if result.is_empty() {
        return streamed.to_string();
    }
    if streamed.is_empty() || result.contains(streamed) {
        return result.to_string();
    }
    if streamed.contains(result) {
        return streamed.to_string();
    }
    format!("{streamed}\n\n{result}")
}
