//! Error types for chorus.
//!
//! Epistemic taxonomy:
//! - B_i falsified: Expected failures (missing credential, invalid input)
//! - I^B materialized: Infrastructure failures (network, timeout, gateway status)
//! - K_i violated: Internal invariant violations (bugs, panicked tasks)

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for chorus.
#[derive(Debug, Error)]
pub enum ChorusError {
    // ═══════════════════════════════════════════════════════════════════
    // B_i FALSIFIED: Belief proven wrong (expected failures)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ═══════════════════════════════════════════════════════════════════
    // I^B MATERIALIZED: Bounded ignorance became known-bad
    // ═══════════════════════════════════════════════════════════════════

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // K_i VIOLATED: Invariant broken (bug, should not happen)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Gateway specific errors.
///
/// `call` identifies what was being requested: a model id for chat,
/// `generation:<id>` for stats lookups, `models` for the catalog.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{call}: authentication failed (HTTP 401)")]
    AuthenticationFailed { call: String },

    #[error("{call}: HTTP error {status} - {message}")]
    Status {
        status: u16,
        call: String,
        message: String,
    },

    #[error("{call}: invalid response: {message}")]
    InvalidResponse { call: String, message: String },
}

/// Coarse classification carried by failed results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credential missing or unusable
    Config,
    /// Rejected before any network call
    InvalidInput,
    /// Connection failure or timeout
    Transport,
    /// Unexpected status or malformed payload
    Protocol,
    /// Bug or panicked task
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::InvalidInput => write!(f, "invalid input"),
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::Protocol => write!(f, "protocol"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

impl ChorusError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Network(_) | Self::Timeout(_) => ErrorKind::Transport,
            Self::Gateway(_) | Self::ParseError(_) => ErrorKind::Protocol,
            Self::Io { .. } | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status attached to this error, if the gateway answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Gateway(GatewayError::AuthenticationFailed { .. }) => Some(401),
            Self::Gateway(GatewayError::Status { status, .. }) => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether this error must abort a whole batch rather than one entry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::InvalidInput(_))
    }
}

/// Result type alias for chorus.
pub type Result<T> = std::result::Result<T, ChorusError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConfigError;
    use std::time::Duration;

    #[test]
    fn test_kind_mapping() {
        let missing = ChorusError::from(ConfigError::MissingApiKey {
            source_name: "env".to_string(),
        });
        assert_eq!(missing.kind(), ErrorKind::Config);
        assert!(missing.is_fatal());

        let timeout = ChorusError::Timeout(Duration::from_secs(5));
        assert_eq!(timeout.kind(), ErrorKind::Transport);
        assert!(!timeout.is_fatal());

        let status = ChorusError::from(GatewayError::Status {
            status: 503,
            call: "openai/gpt-4o".to_string(),
            message: "Service Unavailable".to_string(),
        });
        assert_eq!(status.kind(), ErrorKind::Protocol);
        assert_eq!(status.status(), Some(503));
        assert!(status.to_string().contains("openai/gpt-4o"));
    }

    #[test]
    fn test_auth_failure_reports_401() {
        let err = ChorusError::from(GatewayError::AuthenticationFailed {
            call: "models".to_string(),
        });
        assert_eq!(err.status(), Some(401));
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }
}
