//! Error types for the diagnostics library.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiagnosticsError {
    #[error("Failed to read config file: {path}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON config: {path}")]
    ConfigJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse YAML config: {path}")]
    ConfigYaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Unsupported config format for {0}: '{1}'")]
    UnsupportedFormat(String, String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid options for agent '{agent}': {message}")]
    InvalidAgentOptions { agent: String, message: String },

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Unknown issue: {0}")]
    UnknownIssue(String),

    #[error("No diagnostic report available yet")]
    NoReport,

    #[error("Unknown export format: {0}")]
    UnknownFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, DiagnosticsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_unknown_agent() {
        let err = DiagnosticsError::UnknownAgent("lint".to_string());
        assert_eq!(err.to_string(), "Unknown agent: lint");
    }

    #[test]
    fn test_error_display_config_read() {
        let err = DiagnosticsError::ConfigRead {
            path: "/tmp/diagnostics.config.json".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to read config file: /tmp/diagnostics.config.json"
        );
    }

    #[test]
    fn test_error_display_invalid_agent_options() {
        let err = DiagnosticsError::InvalidAgentOptions {
            agent: "network".to_string(),
            message: "expected u64".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid options for agent 'network': expected u64"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: DiagnosticsError = io.into();
        assert!(matches!(err, DiagnosticsError::Io(_)));
    }
}
