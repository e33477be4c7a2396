//! Engine error types.

use thiserror::Error;

/// Errors raised while resolving a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No configuration was provided.
    #[error("Couldn't find a configuration")]
    NotFound,

    /// The configuration does not have the expected shape.
    #[error("Invalid configuration: {0}")]
    InvalidConfigShape(String),

    /// An `extends` entry could not be loaded or is not a valid configuration.
    #[error("Configuration package \"{name}\" could not be loaded: {reason}")]
    ExtendsNotFound { name: String, reason: String },

    /// `extends` entries reference each other.
    #[error("Circular extends: {}", chain.join(" -> "))]
    CircularExtends { chain: Vec<String> },

    /// A rule severity is not one of `off`, `warning`, `error`.
    #[error("Invalid severity for rule '{rule}': {value}")]
    InvalidSeverity { rule: String, value: String },

    /// An `ignoredUrls` domain is not a valid regular expression.
    #[error("Invalid ignored URL pattern '{pattern}': {reason}")]
    InvalidIgnoredUrl { pattern: String, reason: String },

    /// One or more rules have options that don't match their schema.
    #[error("Invalid rule configuration: {}", rules.join(", "))]
    RuleOptionSchemaInvalid { rules: Vec<String> },
}

impl ConfigError {
    /// Creates a shape error.
    pub fn shape(message: impl Into<String>) -> Self {
        Self::InvalidConfigShape(message.into())
    }
}

/// Errors raised while loading plugin packages.
#[derive(Debug, Error)]
pub enum LoadError {
    /// A plugin package is malformed.
    #[error("Failed to load plugin '{name}': {reason}")]
    PluginLoadError { name: String, reason: String },
}

impl LoadError {
    pub fn plugin(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PluginLoadError {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the analysis engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Plugin loading error.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Some plugins are missing or incompatible with this engine.
    #[error("Missing plugins: [{}], incompatible plugins: [{}]", missing.join(", "), incompatible.join(", "))]
    MissingPlugins {
        missing: Vec<String>,
        incompatible: Vec<String>,
    },

    /// A plugin subscribes to an event name the engine can't deliver.
    #[error("Plugin '{plugin}' subscribes to unknown event '{event}'")]
    PluginWireError { plugin: String, event: String },

    /// The connector failed to analyze a target.
    #[error("Connector failed on {target}: {reason}")]
    ConnectorError { target: String, reason: String },

    /// The engine was used after `close()`.
    #[error("Engine is closed")]
    Closed,
}

impl EngineError {
    /// Returns whether this error aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngineError::ConnectorError { .. })
    }
}
