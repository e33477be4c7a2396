//! Problem types for analysis results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity level of a configured rule or a reported problem.
///
/// `Off` only ever appears in configuration: a rule set to `off` is never
/// wired, so no problem carries it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Rule disabled.
    Off,
    /// Should be reviewed.
    Warning,
    /// Must be fixed.
    #[default]
    Error,
}

impl Severity {
    /// Returns the lowercase token used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Off => "off",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }

    /// Parses a severity from a configuration value.
    ///
    /// Accepts the string tokens understood by [`FromStr`] and the numeric
    /// shorthands `0` (off), `1` (warning) and `2` (error).
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Number(n) => match n.as_u64()? {
                0 => Some(Severity::Off),
                1 => Some(Severity::Warning),
                2 => Some(Severity::Error),
                _ => None,
            },
            _ => None,
        }
    }

    /// Returns whether a rule with this severity should run.
    pub fn is_enabled(&self) -> bool {
        *self != Severity::Off
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Severity::Off),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line/column position of a problem inside a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProblemLocation {
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

impl ProblemLocation {
    /// Creates a new location.
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A problem reported by a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    /// The rule that reported this problem.
    pub rule_id: String,

    /// The resource (URL) the problem belongs to. Empty for global problems.
    pub resource: String,

    /// The problem message.
    pub message: String,

    /// Severity level.
    #[serde(default)]
    pub severity: Severity,

    /// Line/column location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<ProblemLocation>,
}

impl Problem {
    /// Creates a new problem with `error` severity.
    pub fn new(
        rule_id: impl Into<String>,
        resource: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            resource: resource.into(),
            message: message.into(),
            severity: Severity::Error,
            location: None,
        }
    }

    /// Sets the severity level.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the location.
    pub fn with_location(mut self, location: ProblemLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Returns whether this problem fails the run.
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}
