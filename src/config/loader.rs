//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ControllerConfig;
use crate::config::validation::{validate_config, ValidationError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ControllerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ControllerConfig = toml::from_str(&content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::LogFormat;
    use crate::routing::OverlapPolicy;
    use std::io::Write;

    fn write(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let file = write("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.admission.batch_window_ms, 3000);
        assert_eq!(config.admission.workers, 10);
        assert_eq!(config.dynamic.retries, 15);
        assert_eq!(config.passthrough.buffer_size, 4096);
    }

    #[test]
    fn test_sections_override_defaults() {
        let file = write(
            r#"
            [controller]
            default_backend_service = "kube-system/default-http-backend"
            overlap_policy = "strict"

            [admission]
            workers = 2

            [streams.tcp]
            "9000" = "default/db:5432"

            [observability]
            log_format = "json"
            "#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.controller.overlap_policy, OverlapPolicy::Strict);
        assert_eq!(config.admission.workers, 2);
        assert_eq!(config.streams.tcp.get("9000").map(String::as_str), Some("default/db:5432"));
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(
            config.builder_options().default_backend_service.as_deref(),
            Some("kube-system/default-http-backend")
        );
    }

    #[test]
    fn test_unknown_log_format_is_a_parse_error() {
        let file = write("[observability]\nlog_format = \"xml\"\n");
        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let file = write("[admission]\nworkers = 0\n");
        match load_config(file.path()) {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors[0].field, "admission.workers"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
