//! # pagehint_core
//!
//! Core analysis engine for pagehint.
//!
//! This crate provides:
//! - Configuration resolution (`extends`, severities, ignored URLs)
//! - Plugin resolution against installed packages
//! - The hierarchical event bus
//! - The `Engine` driving targets through the wired plugins
//!
//! ## Example
//!
//! ```rust,ignore
//! use pagehint_core::{AnalyzeRequest, PluginRegistry, analyze};
//!
//! let registry = PluginRegistry::new(pagehint_builtin::package());
//! let request = AnalyzeRequest {
//!     config: Some(serde_json::json!({ "extends": ["web-recommended"] })),
//!     targets: vec![Url::parse("file:///srv/site/")?],
//!     ..Default::default()
//! };
//!
//! let (_engine, report) = analyze(request, &registry).await?;
//! for result in report.results() {
//!     println!("{}: {} problems", result.target, result.problems.len());
//! }
//! ```

pub mod bus;
pub mod config;
mod engine;
mod error;
pub mod loader;
mod merge;
pub mod registry;
pub mod runner;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use bus::{AnyListener, EventBus};
pub use config::{
    ConfigOverrides, ConfigSource, ConnectorConfig, IgnoredUrls, ResolvedConfig, RuleConfig,
    UserConfig,
};
pub use engine::{Engine, EngineState, PrintHandler, ProblemCollector, RunResult};
pub use error::{ConfigError, EngineError, LoadError};
pub use loader::{PluginSet, RuleDescriptor, load};
pub use merge::{merge, merge_all};
pub use registry::{PluginKind, PluginPackage, PluginRegistry};
pub use runner::{AnalyzeRequest, RunReport, TargetOutcome, analyze, prepare, run};
