use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from `conduit.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ConduitConfig {
    pub runner: RunnerConfig,
    pub backends: BackendsConfig,
    pub context: ContextConfig,
}

/// Process supervision limits shared by every backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RunnerConfig {
    pub timeout_seconds: u64,
    pub output_buffer_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 600,
            output_buffer_bytes: 16 * 1024 * 1024, // 16 MiB
        }
    }
}

/// Per-backend executable settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BackendsConfig {
    pub codex: BackendConfig,
    pub claude: BackendConfig,
}

/// How to launch one backend CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BackendConfig {
    /// Executable name or path; the backend's own name when unset.
    pub binary: Option<String>,
    /// Model used when a request does not name one.
    pub model: Option<String>,
    /// Arguments placed before the generated argv (wrapper scripts, `sh -c`, ...).
    pub launcher_args: Vec<String>,
}

impl BackendConfig {
    pub fn with_binary(binary: &str) -> Self {
        Self {
            binary: Some(binary.to_string()),
            ..Default::default()
        }
    }

    /// Executable to launch, falling back to `default`.
    pub fn binary_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.binary.as_deref().unwrap_or(default)
    }
}

/// System context injected ahead of every prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ContextConfig {
    pub persona: String,
    /// Optional command-reference document appended to the context.
    pub reference_path: Option<PathBuf>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            persona: "You are a helpful coding assistant answering from a chat conversation. \
                      Keep replies concise and readable as chat messages."
                .to_string(),
            reference_path: None,
        }
    }
}
