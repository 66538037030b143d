//! Error types for the agent router
//!
//! Module-local errors (config, discovery, forward, transport) are aggregated
//! into [`RouterError`]. Every routed failure maps to an [`ErrorKind`] and a
//! sanitized, user-facing message.

use crate::agent::{DiscoveryError, ForwardError};
use crate::config::ConfigError;
use crate::transport::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Message attached to a classification failure
pub const NO_MATCHING_AGENT: &str = "no matching agent";

/// Main error type for routing operations
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Classification error: {message}")]
    Classification { message: String },

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Forward error: {0}")]
    Forward(#[from] ForwardError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

/// Coarse error category surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Config,
    Classification,
    Discovery,
    Forward,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Classification => "classification",
            ErrorKind::Discovery => "discovery",
            ErrorKind::Forward => "forward",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RouterError {
    /// Create classification error
    pub fn classification<S: Into<String>>(message: S) -> Self {
        Self::Classification {
            message: message.into(),
        }
    }

    /// No agent matched and no default is configured
    pub fn no_matching_agent() -> Self {
        Self::classification(NO_MATCHING_AGENT)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RouterError::Config(_) => ErrorKind::Config,
            RouterError::Classification { .. } => ErrorKind::Classification,
            RouterError::Discovery(_) => ErrorKind::Discovery,
            RouterError::Forward(_) | RouterError::Transport(_) => ErrorKind::Forward,
            RouterError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Message safe to show to the requester
    pub fn user_message(&self) -> String {
        let message = match self {
            RouterError::Classification { message } => {
                format!("Couldn't determine a target agent: {message}")
            }
            other => other.to_string(),
        };
        sanitize_error_message(&message)
    }
}

static SECRET_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").ok());

static SENSITIVE_PATH_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+").ok()
});

const MAX_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

/// Sanitize error messages to prevent sensitive data leakage
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    // Remove common secret patterns
    if let Some(re) = SECRET_PATTERN.as_ref() {
        sanitized = re.replace_all(&sanitized, "${1}=***").to_string();
    }

    // Remove potential file paths that might contain sensitive info
    if let Some(re) = SENSITIVE_PATH_PATTERN.as_ref() {
        sanitized = re.replace_all(&sanitized, "/***REDACTED***/").to_string();
    }

    // Truncate very long messages - ensure total length is <= 500
    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut end = MAX_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..end], TRUNCATE_SUFFIX);
    }

    sanitized
}

/// Result type for router operations
pub type RouterResult<T> = Result<T, RouterError>;
