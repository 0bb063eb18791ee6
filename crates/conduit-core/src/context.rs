//! System context injected ahead of every prompt.
//!
//! The context is the persona, a notice telling the agent whether it is
//! continuing a conversation, and an optional command-reference document.
//! How it reaches the agent is a backend capability: exec-style backends get
//! it prefixed into the prompt, print-style backends get it as a flag value.

use std::path::Path;

use tracing::debug;

use crate::config::ContextConfig;

const RESUMED_NOTICE: &str = "This message continues an earlier conversation in this chat. \
Earlier turns are available in your session history.";

const FRESH_NOTICE: &str = "This message starts a new conversation in this chat.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemContext {
    enabled: bool,
    persona: String,
    reference: String,
}

impl SystemContext {
    pub fn new(persona: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            enabled: true,
            persona: persona.into(),
            reference: reference.into(),
        }
    }

    /// A context that renders to nothing, not even the session notice.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the context from configuration, reading the reference document once.
    ///
    /// A missing or unreadable document contributes nothing.
    pub fn load(config: &ContextConfig) -> Self {
        let reference = config
            .reference_path
            .as_deref()
            .map(read_reference)
            .unwrap_or_default();
        Self::new(config.persona.trim(), reference)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Render the preamble for a fresh or a resumed conversation.
    ///
    /// The session notice is always present once the context is enabled,
    /// even with no persona and no reference document.
    pub fn render(&self, resuming: bool) -> String {
        if !self.enabled {
            return String::new();
        }

        let notice = if resuming { RESUMED_NOTICE } else { FRESH_NOTICE };
        [self.persona.as_str(), notice, self.reference.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn read_reference(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "command reference not loaded");
            String::new()
        }
    }
}
