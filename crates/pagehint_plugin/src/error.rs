//! Plugin error types.

use thiserror::Error;

/// Errors raised by plugins while they run.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A rule or parser handler failed.
    #[error("Handler failed: {0}")]
    HandlerError(String),

    /// The connector could not analyze the target.
    #[error("Connector failed: {0}")]
    ConnectorError(String),

    /// A formatter could not render the problems.
    #[error("Formatter failed: {0}")]
    FormatterError(String),

    /// Invalid plugin options.
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    /// Creates a handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::HandlerError(message.into())
    }

    /// Creates a connector error.
    pub fn connector(message: impl Into<String>) -> Self {
        Self::ConnectorError(message.into())
    }

    /// Creates a formatter error.
    pub fn formatter(message: impl Into<String>) -> Self {
        Self::FormatterError(message.into())
    }

    /// Creates an invalid options error.
    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions(message.into())
    }
}
