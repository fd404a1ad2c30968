//! Unified error handling for EdgeLink services
//!
//! One error type covers every service so that bridges, the scheduler and
//! the channel layer can share a single `Result` alias. The variants map
//! onto the failure taxonomy the scheduler cares about: transport problems
//! are retryable, conversion and addressing problems are not, and
//! configuration problems are fatal for the component being activated.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for all EdgeLink services
#[derive(Debug, Clone, Error)]
pub enum EdgeError {
    // ======================================
    // Configuration errors (fatal at activation)
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // ======================================
    // Transport errors (retryable)
    // ======================================
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    #[error("Not connected")]
    NotConnected,

    // ======================================
    // Data errors (not retryable)
    // ======================================
    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Addressing error: {0}")]
    Addressing(String),

    // ======================================
    // Channel access errors
    // ======================================
    #[error("Invalid access mode: channel {channel} is {mode}")]
    InvalidAccessMode { channel: String, mode: String },

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Component not found: {0}")]
    ComponentNotFound(String),

    // ======================================
    // General
    // ======================================
    #[error("IO error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EdgeError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a conversion error
    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion(msg.into())
    }

    /// Create an addressing error
    pub fn addressing(msg: impl Into<String>) -> Self {
        Self::Addressing(msg.into())
    }

    /// Whether the scheduler should retry the operation on a later cycle.
    ///
    /// Transport failures are transient: the link may come back. Conversion
    /// and addressing failures will fail the same way every cycle, so the
    /// task is executed again only because its interval elapses, not as a
    /// retry of the failed value.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::ConnectionFailed { .. }
                | Self::Timeout(_)
                | Self::NotConnected
                | Self::Io(_)
        )
    }

    /// Whether the error is fatal for component activation
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::InvalidConfig { .. } | Self::MissingConfig(_)
        )
    }

    /// Short machine-readable category, used in structured log fields
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration(_) | Self::InvalidConfig { .. } | Self::MissingConfig(_) => {
                "configuration"
            },
            Self::Transport(_)
            | Self::ConnectionFailed { .. }
            | Self::Timeout(_)
            | Self::NotConnected => "transport",
            Self::Conversion(_) => "conversion",
            Self::Addressing(_) => "addressing",
            Self::InvalidAccessMode { .. } => "access",
            Self::ChannelNotFound(_) | Self::ComponentNotFound(_) => "lookup",
            Self::Io(_) | Self::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for EdgeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for EdgeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Conversion(format!("JSON: {e}"))
    }
}

/// Result alias used throughout the workspace
pub type EdgeResult<T> = Result<T, EdgeError>;

/// Serializable error information for diagnostics endpoints and logs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub category: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&EdgeError> for ErrorInfo {
    fn from(e: &EdgeError) -> Self {
        Self {
            category: e.category().to_string(),
            message: e.to_string(),
            details: None,
        }
    }
}
