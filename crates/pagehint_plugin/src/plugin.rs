//! Plugin traits.
//!
//! Every plugin kind is resolved by name from a registry and instantiated
//! lazily by the engine, so the registry stores factories rather than live
//! instances.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::{Emitter, HandlerMap, ParserContext, PluginError, Problem, RuleContext, RuleMeta};

/// Creates rule instances.
pub trait RuleFactory: Send + Sync {
    /// Static metadata, including the options schema.
    fn meta(&self) -> RuleMeta;

    /// Creates the rule's handlers for one run.
    fn create(&self, context: RuleContext) -> HandlerMap;
}

/// Creates parser instances.
pub trait ParserFactory: Send + Sync {
    /// Names of the derived events this parser may emit.
    ///
    /// Rules may only subscribe to these (or their prefixes) in addition to
    /// the connector lifecycle events.
    fn emits(&self) -> Vec<String> {
        Vec::new()
    }

    /// Creates the parser's handlers for one run.
    fn create(&self, context: ParserContext) -> HandlerMap;
}

/// Renders the problems of one target.
pub trait Formatter: Send + Sync {
    fn format(&self, problems: &[Problem]) -> Result<(), PluginError>;
}

/// Drives the navigation of a target and emits its lifecycle events.
#[async_trait]
pub trait Connector: Send {
    /// Analyzes `target`, emitting `scan::start`, fetch/traverse events and
    /// finally `scan::end` through `emitter`.
    async fn collect(&mut self, target: &Url, emitter: Arc<dyn Emitter>)
    -> Result<(), PluginError>;

    /// Releases any resources held by the connector.
    async fn close(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Creates connector instances from their configured options.
pub trait ConnectorFactory: Send + Sync {
    fn create(&self, options: &serde_json::Value) -> Result<Box<dyn Connector>, PluginError>;
}
