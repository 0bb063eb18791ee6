use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::registry::BackendRegistry;
use super::Backend;

/// Whether one backend's executable can be found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub backend: String,
    pub binary: String,
    pub resolved_path: Option<PathBuf>,
    pub available: bool,
}

/// Aggregated probe report for all registered backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub timestamp: DateTime<Utc>,
    pub results: Vec<ProbeResult>,
    pub all_available: bool,
}

pub fn probe(backend: &dyn Backend) -> ProbeResult {
    let binary = backend.binary().to_string();
    let resolved_path = which::which(&binary).ok();
    ProbeResult {
        backend: backend.key().to_string(),
        available: resolved_path.is_some(),
        binary,
        resolved_path,
    }
}

pub fn probe_all(registry: &BackendRegistry) -> ProbeReport {
    let results: Vec<ProbeResult> = registry.all().iter().map(|b| probe(b.as_ref())).collect();
    let all_available = results.iter().all(|r| r.available);
    ProbeReport {
        timestamp: Utc::now(),
        results,
        all_available,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ClaudeBackend, CodexBackend};
    use crate::config::BackendConfig;
    use std::sync::Arc;

    #[test]
    fn probe_finds_binary_on_path() {
        let result = probe(&CodexBackend::new(BackendConfig::with_binary("sh")));
        assert!(result.available);
        assert!(result.resolved_path.is_some());
        assert_eq!(result.backend, "codex");
    }

    #[test]
    fn probe_reports_missing_binary() {
        let result = probe(&ClaudeBackend::new(BackendConfig::with_binary(
            "conduit-definitely-not-installed",
        )));
        assert!(!result.available);
        assert_eq!(result.resolved_path, None);
        assert_eq!(result.binary, "conduit-definitely-not-installed");
    }

    #[test]
    fn report_is_ready_only_when_every_backend_is_found() {
        let registry = BackendRegistry::new(vec![
            Arc::new(CodexBackend::new(BackendConfig::with_binary("sh"))),
            Arc::new(ClaudeBackend::new(BackendConfig::with_binary(
                "conduit-definitely-not-installed",
            ))),
        ]);
        let report = probe_all(&registry);
        assert_eq!(report.results.len(), 2);
        assert!(!report.all_available);

        let ready = BackendRegistry::new(vec![Arc::new(CodexBackend::new(
            BackendConfig::with_binary("sh"),
        ))]);
        assert!(probe_all(&ready).all_available);
    }
}
