//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::overrides::Overrides;
use crate::config::schema::GatewayConfig;
use crate::config::validation::ValidationError;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("Invalid header name '{0}'")]
    HeaderName(String),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    parse_config_with(content, &Overrides::default())
}

/// Parse TOML text, apply `overrides`, then validate the merged result.
pub fn parse_config_with(
    content: &str,
    overrides: &Overrides,
) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = toml::from_str(content)?;
    overrides.resolve(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    load_config_with(path, &Overrides::default())
}

/// Load a TOML file with command-line overrides applied.
pub fn load_config_with(path: &Path, overrides: &Overrides) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_with(&content, overrides)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_document() {
        let config = parse_config(
            r#"
            [upstream]
            address = "10.0.0.5:4000"

            [gate]
            header = "X-Caller-Email"
            "#,
        )
        .unwrap();
        assert_eq!(config.upstream.address, "10.0.0.5:4000");
        assert_eq!(config.gate.header, "X-Caller-Email");
    }

    #[test]
    fn test_parse_error_surfaces() {
        let err = parse_config("[gate\nheader = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_error_lists_all_problems() {
        let err = parse_config(
            r#"
            [gate]
            protected_paths = []

            [limits]
            max_body_bytes = 0
            "#,
        )
        .unwrap_err();

        let message = err.to_string();
        assert!(message.starts_with("Validation failed: "));
        assert!(message.contains("at least one path"));
        assert!(message.contains("limits.max_body_bytes"));
    }

    #[test]
    fn test_override_fixes_invalid_file_value() {
        let overrides = Overrides {
            upstream_address: Some("127.0.0.1:4100".into()),
            ..Overrides::default()
        };
        let content = r#"
            [upstream]
            address = "not an address"
        "#;

        assert!(parse_config(content).is_err());
        let config = parse_config_with(content, &overrides).unwrap();
        assert_eq!(config.upstream.address, "127.0.0.1:4100");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/email-gate.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
