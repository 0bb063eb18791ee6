use std::sync::Arc;

use thiserror::Error;

use super::claude::ClaudeBackend;
use super::codex::CodexBackend;
use super::Backend;
use crate::config::BackendsConfig;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown backend '{key}'. Known backends: {known}")]
    UnknownBackend { key: String, known: String },
}

/// Lookup table of the configured agent backends.
pub struct BackendRegistry {
    backends: Vec<Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn from_config(config: &BackendsConfig) -> Self {
        let backends: Vec<Arc<dyn Backend>> = vec![
            Arc::new(CodexBackend::new(config.codex.clone())),
            Arc::new(ClaudeBackend::new(config.claude.clone())),
        ];
        Self { backends }
    }

    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        Self { backends }
    }

    pub fn resolve(&self, key: &str) -> Result<Arc<dyn Backend>, RegistryError> {
        self.backends
            .iter()
            .find(|b| b.key() == key)
            .map(Arc::clone)
            .ok_or_else(|| RegistryError::UnknownBackend {
                key: key.to_string(),
                known: self.known_keys().join(", "),
            })
    }

    pub fn known_keys(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.key()).collect()
    }

    pub fn all(&self) -> &[Arc<dyn Backend>] {
        &self.backends
    }
}
