//! # pagehint_plugin
//!
//! Plugin contract for pagehint.
//!
//! This crate provides:
//! - Lifecycle events and their payloads
//! - Problems and severities reported by rules
//! - The rule, parser, formatter and connector traits
//! - Rule and parser contexts handed to plugins at creation time
//!
//! ## Architecture
//!
//! Plugins never talk to the engine directly. A rule receives a
//! [`RuleContext`] and returns a [`HandlerMap`] (event name to async
//! handler); the engine subscribes those handlers on its event bus and
//! relays whatever the connector emits. Parsers do the same but get a
//! [`ParserContext`] so they can emit derived events back onto the bus.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pagehint_plugin::{HandlerMap, RuleContext, RuleFactory, RuleMeta};
//!
//! struct NoHttp;
//!
//! impl RuleFactory for NoHttp {
//!     fn meta(&self) -> RuleMeta {
//!         RuleMeta::default()
//!     }
//!
//!     fn create(&self, context: RuleContext) -> HandlerMap {
//!         HandlerMap::new().on("fetch::end", move |event| {
//!             let context = context.clone();
//!             async move {
//!                 if event.resource().starts_with("http:") {
//!                     context.report(event.resource(), None, "Use HTTPS");
//!                 }
//!                 Ok(())
//!             }
//!         })
//!     }
//! }
//! ```

mod context;
mod error;
pub mod event;
mod handler;
mod meta;
mod plugin;
mod problem;

pub use context::{Emitter, ParserContext, Reporter, RuleContext};
pub use error::PluginError;
pub use event::{
    DataEvent, Event, EventPayload, FetchEnd, FetchError, FetchStart, Response, ResponseBody,
    ScanEvent, TraverseEvent,
};
pub use handler::{Handler, HandlerFuture, HandlerMap, HandlerOutput};
pub use meta::{Category, RuleMeta};
pub use plugin::{Connector, ConnectorFactory, Formatter, ParserFactory, RuleFactory};
pub use problem::{Problem, ProblemLocation, Severity};

pub use url::Url;
