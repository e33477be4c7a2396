//! Event handlers returned by rules and parsers.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::{Event, PluginError};

/// What a handler settles to. `emit_async` callers receive these values.
pub type HandlerOutput = Result<serde_json::Value, PluginError>;

/// Boxed future returned by a [`Handler`].
pub type HandlerFuture = BoxFuture<'static, HandlerOutput>;

/// An asynchronous event handler.
pub type Handler = Arc<dyn Fn(Arc<Event>) -> HandlerFuture + Send + Sync>;

/// Ordered mapping from event name to handler.
///
/// The same event name may appear more than once; handlers keep the order in
/// which they were added.
#[derive(Clone, Default)]
pub struct HandlerMap {
    entries: Vec<(String, Handler)>,
}

impl HandlerMap {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler that settles to `()`.
    pub fn on<F, Fut>(mut self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PluginError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |event: Arc<Event>| -> HandlerFuture {
            let fut = handler(event);
            Box::pin(async move { fut.await.map(|()| serde_json::Value::Null) })
        });
        self.insert(event, handler);
        self
    }

    /// Adds a handler whose settled value is returned to `emit_async` callers.
    pub fn on_value<F, Fut>(mut self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerOutput> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |event: Arc<Event>| -> HandlerFuture { Box::pin(handler(event)) });
        self.insert(event, handler);
        self
    }

    /// Adds an already boxed handler.
    pub fn insert(&mut self, event: impl Into<String>, handler: Handler) {
        self.entries.push((event.into(), handler));
    }

    /// Returns the subscribed event names in insertion order.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for HandlerMap {
    type Item = (String, Handler);
    type IntoIter = std::vec::IntoIter<(String, Handler)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl fmt::Debug for HandlerMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.events()).finish()
    }
}
