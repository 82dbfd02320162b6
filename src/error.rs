use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TabError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("DevTools connection lost")]
    ConnectionLost,

    #[error("Attach failed: {0}")]
    AttachFailed(String),

    #[error("Tab not attached: {0}")]
    NotAttached(String),

    #[error("Protocol command {method} failed: {message}")]
    Protocol { method: String, message: String },

    #[error("JavaScript evaluation failed: {0}")]
    EvaluationError(String),

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid port: {0}")]
    InvalidPort(u16),

    #[error("File I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    #[error("General error: {0}")]
    General(String),
}

impl TabError {
    pub fn protocol(method: &str, err: impl std::fmt::Display) -> Self {
        Self::Protocol {
            method: method.to_string(),
            message: err.to_string(),
        }
    }

    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Connection(_) | Self::ConnectionLost => vec![
                "Start Chrome with --remote-debugging-port=9222".into(),
                "Check --host/--port or TABPILOT_DEBUG_PORT".into(),
            ],
            Self::AttachFailed(_) => vec![
                "Verify the tab id with: tabpilot tabs".into(),
                "Close other DevTools clients attached to the tab".into(),
            ],
            Self::NotAttached(_) => vec!["Begin a task or start a capture first".into()],
            Self::TargetNotFound(id) => vec![
                "List open tabs with: tabpilot tabs".into(),
                format!("Check if tab '{}' was closed", id),
            ],
            Self::ConfigError(_) | Self::TomlDeError(_) => vec![
                "Check configuration file syntax".into(),
                "Show the effective config with: tabpilot config show".into(),
            ],
            Self::InvalidPort(port) => vec![format!(
                "Port {} is out of valid range (1024-65535)",
                port
            )],
            _ => vec!["Run with --verbose for more details".into()],
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Connection(_) | Self::ConnectionLost | Self::AttachFailed(_) => 3,
            Self::TargetNotFound(_) | Self::NotAttached(_) => 5,
            Self::IoError(_) => 6,
            Self::ConfigError(_)
            | Self::TomlDeError(_)
            | Self::TomlSerError(_)
            | Self::InvalidPort(_) => 7,
            _ => 1,
        }
    }
}

/// Outcome classification carried in a [`CommandResult`](crate::chrome::models::CommandResult).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    CommandNotSupported,
    TargetNotResolved,
    NotInteractable,
    NotSelect,
    VerifyFailed,
    Timeout,
    ExecutionError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::CommandNotSupported => "COMMAND_NOT_SUPPORTED",
            Self::TargetNotResolved => "TARGET_NOT_RESOLVED",
            Self::NotInteractable => "NOT_INTERACTABLE",
            Self::NotSelect => "NOT_SELECT",
            Self::VerifyFailed => "VERIFY_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::ExecutionError => "EXECUTION_ERROR",
        }
    }

    /// Maps a page-side failure reason onto a code. Unknown reasons are execution errors.
    pub fn from_page_reason(reason: &str) -> Self {
        match reason {
            "TARGET_NOT_FOUND" => Self::TargetNotResolved,
            "NOT_SELECT" => Self::NotSelect,
            _ => Self::ExecutionError,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::TargetNotResolved).unwrap();
        assert_eq!(json, "\"TARGET_NOT_RESOLVED\"");
        let parsed: ErrorCode = serde_json::from_str("\"NOT_SELECT\"").unwrap();
        assert_eq!(parsed, ErrorCode::NotSelect);
    }

    #[test]
    fn test_error_code_as_str_matches_serde() {
        for code in [
            ErrorCode::ValidationError,
            ErrorCode::CommandNotSupported,
            ErrorCode::TargetNotResolved,
            ErrorCode::NotInteractable,
            ErrorCode::NotSelect,
            ErrorCode::VerifyFailed,
            ErrorCode::Timeout,
            ErrorCode::ExecutionError,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json.trim_matches('"'), code.as_str());
        }
    }

    #[test]
    fn test_from_page_reason() {
        assert_eq!(
            ErrorCode::from_page_reason("TARGET_NOT_FOUND"),
            ErrorCode::TargetNotResolved
        );
        assert_eq!(ErrorCode::from_page_reason("NOT_SELECT"), ErrorCode::NotSelect);
        assert_eq!(
            ErrorCode::from_page_reason("weird"),
            ErrorCode::ExecutionError
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(TabError::ConnectionLost.exit_code(), 3);
        assert_eq!(TabError::ConfigError("x".into()).exit_code(), 7);
        assert_eq!(TabError::General("x".into()).exit_code(), 1);
    }
}
