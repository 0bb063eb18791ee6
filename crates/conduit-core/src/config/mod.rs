use std::path::Path;

use thiserror::Error;

mod schema;

pub use schema::{BackendConfig, BackendsConfig, ConduitConfig, ContextConfig, RunnerConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFailed {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("config validation error: {message}")]
    Validation { message: String },
}

/// Load and validate a `ConduitConfig` from a TOML file path.
///
/// Returns the default config if the file does not exist.
pub fn load_config(path: &Path) -> Result<ConduitConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(ConduitConfig::default());
    }

    let data = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_config(&data)
}

/// Parse and validate a `ConduitConfig` from a TOML string.
pub fn parse_config(data: &str) -> Result<ConduitConfig, ConfigError> {
    let config: ConduitConfig = toml::from_str(data)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ConduitConfig) -> Result<(), ConfigError> {
    if config.runner.timeout_seconds == 0 {
        return Err(ConfigError::Validation {
            message: "runner.timeout_seconds must be > 0".to_string(),
        });
    }

    if config.runner.output_buffer_bytes == 0 {
        return Err(ConfigError::Validation {
            message: "runner.output_buffer_bytes must be > 0".to_string(),
        });
    }

    for (key, backend) in [
        ("codex", &config.backends.codex),
        ("claude", &config.backends.claude),
    ] {
        if backend.binary.as_deref().is_some_and(|b| b.trim().is_empty()) {
            return Err(ConfigError::Validation {
                message: format!("backends.{key}.binary must not be empty"),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes_validation() {
        let config = ConduitConfig::default();
        validate(&config).unwrap();
    }

    #[test]
    fn minimal_toml_parses_to_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.runner.timeout_seconds, 600);
        assert_eq!(config.backends.codex.binary_or("codex"), "codex");
        assert_eq!(config.backends.claude.binary_or("claude"), "claude");
        assert!(config.context.reference_path.is_none());
        assert!(!config.context.persona.is_empty());
    }

    #[test]
    fn full_example_config_parses() {
        let data = r#"
[runner]
timeout_seconds = 120
output_buffer_bytes = 1048576

[backends.codex]
binary = "/opt/codex"
model = "o4-mini"

[backends.claude]
binary = "/opt/claude"
launcher_args = ["--config", "/etc/claude.json"]

[context]
persona = "You are the on-call bot."
reference_path = "docs/commands.md"
"#;

        let config = parse_config(data).unwrap();
        assert_eq!(config.runner.timeout_seconds, 120);
        assert_eq!(config.runner.output_buffer_bytes, 1_048_576);
        assert_eq!(config.backends.codex.binary.as_deref(), Some("/opt/codex"));
        assert_eq!(config.backends.codex.model.as_deref(), Some("o4-mini"));
        assert_eq!(
            config.backends.claude.launcher_args,
            vec!["--config", "/etc/claude.json"]
        );
        assert_eq!(config.context.persona, "You are the on-call bot.");
        assert_eq!(
            config.context.reference_path.as_deref(),
            Some(Path::new("docs/commands.md"))
        );
    }

    #[test]
    fn partial_backend_table_keeps_other_defaults() {
        let data = r#"
[backends.claude]
model = "sonnet"
"#;
        let config = parse_config(data).unwrap();
        assert_eq!(config.backends.claude.model.as_deref(), Some("sonnet"));
        assert_eq!(config.backends.claude.binary_or("claude"), "claude");
        assert_eq!(config.backends.codex, BackendConfig::default());
    }

    #[test]
    fn zero_timeout_rejected() {
        let data = r#"
[runner]
timeout_seconds = 0
"#;
        let err = parse_config(data).unwrap_err();
        assert!(err.to_string().contains("timeout_seconds"));
    }

    #[test]
    fn empty_binary_rejected() {
        let data = r#"
[backends.codex]
binary = "  "
"#;
        let err = parse_config(data).unwrap_err();
        assert!(err.to_string().contains("backends.codex.binary"));
    }

    #[test]
    fn unknown_field_in_toml_returns_parse_error() {
        let data = r#"
[runner]
nonexistent_field = "bad"
"#;
        let err = parse_config(data).unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed(_)));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = load_config(Path::new("/tmp/nonexistent-conduit-test.toml")).unwrap();
        assert_eq!(config, ConduitConfig::default());
    }

    #[test]
    fn config_file_on_disk_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conduit.toml");
        std::fs::write(&path, "[runner]\ntimeout_seconds = 42\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.runner.timeout_seconds, 42);
    }
}
