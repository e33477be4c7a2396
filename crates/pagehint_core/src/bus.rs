//! Hierarchical publish/subscribe bus.
//!
//! Handlers are indexed by the name they subscribed to. Emitting
//! `fetch::end::script` looks up `fetch`, `fetch::end` and
//! `fetch::end::script` and runs the matches in registration order.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use parking_lot::RwLock;
use tracing::warn;

use pagehint_plugin::event::segment_prefixes;
use pagehint_plugin::{Event, Handler, HandlerOutput, PluginError};

/// A synchronous listener that observes every event.
pub type AnyListener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Runs `handler`, turning a panic into a handler error.
async fn invoke(handler: Handler, event: Arc<Event>) -> HandlerOutput {
    let name = event.name().to_string();
    match AssertUnwindSafe(async move { handler(event).await })
        .catch_unwind()
        .await
    {
        Ok(output) => output,
        Err(panic) => Err(PluginError::handler(format!(
            "Handler for '{}' panicked: {}",
            name,
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

struct Subscription {
    seq: u64,
    handler: Handler,
}

#[derive(Default)]
struct BusState {
    handlers: HashMap<String, Vec<Subscription>>,
    any: Vec<AnyListener>,
    next_seq: u64,
}

/// Event bus shared by the engine and the plugins it wires.
#[derive(Default)]
pub struct EventBus {
    state: RwLock<BusState>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `handler` to `event` and to every event below it.
    pub fn on(&self, event: impl Into<String>, handler: Handler) {
        let mut state = self.state.write();
        let seq = state.next_seq;
        state.next_seq += 1;
        state
            .handlers
            .entry(event.into())
            .or_default()
            .push(Subscription { seq, handler });
    }

    /// Adds a listener invoked for every event before any handler.
    ///
    /// The most recently prepended listener runs first.
    pub fn prepend_any(&self, listener: AnyListener) {
        self.state.write().any.insert(0, listener);
    }

    /// Returns the handlers receiving `name`, in registration order.
    pub fn handlers_for(&self, name: &str) -> Vec<Handler> {
        let state = self.state.read();
        let mut matched: Vec<&Subscription> = segment_prefixes(name)
            .filter_map(|prefix| state.handlers.get(prefix))
            .flatten()
            .collect();
        matched.sort_by_key(|subscription| subscription.seq);
        matched
            .into_iter()
            .map(|subscription| subscription.handler.clone())
            .collect()
    }

    fn notify_any(&self, event: &Event) {
        let listeners = self.state.read().any.clone();
        for listener in listeners {
            listener(event);
        }
    }

    /// Runs the matching handlers one after another.
    ///
    /// A failing or panicking handler is logged and doesn't stop the others.
    pub async fn emit(&self, event: Event) {
        self.notify_any(&event);

        let handlers = self.handlers_for(event.name());
        let event = Arc::new(event);
        for handler in handlers {
            if let Err(e) = invoke(handler, event.clone()).await {
                warn!("Handler for '{}' failed: {}", event.name(), e);
            }
        }
    }

    /// Runs the matching handlers concurrently and returns every result in
    /// settlement order.
    pub async fn emit_async(&self, event: Event) -> Vec<HandlerOutput> {
        self.notify_any(&event);

        let handlers = self.handlers_for(event.name());
        let event = Arc::new(event);
        let pending: FuturesUnordered<_> = handlers
            .into_iter()
            .map(|handler| invoke(handler, event.clone()))
            .collect();

        let results: Vec<HandlerOutput> = pending.collect().await;
        for error in results.iter().filter_map(|result| result.as_ref().err()) {
            warn!("Handler for '{}' failed: {}", event.name(), error);
        }
        results
    }

    /// Drops every subscription and listener.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.handlers.clear();
        state.any.clear();
    }

    /// Number of registered handlers, listeners excluded.
    pub fn len(&self) -> usize {
        self.state.read().handlers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        let mut names: Vec<&str> = state.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("EventBus")
            .field("subscriptions", &names)
            .field("any_listeners", &state.any.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagehint_plugin::{HandlerFuture, HandlerMap, PluginError};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(log: &Log, label: &str) -> Handler {
        let log = log.clone();
        let label = label.to_string();
        Arc::new(move |event: Arc<Event>| -> HandlerFuture {
            let log = log.clone();
            let label = label.clone();
            Box::pin(async move {
                log.lock().push(format!("{}:{}", label, event.name()));
                Ok(serde_json::Value::Null)
            })
        })
    }

    fn delayed(millis: u64, output: HandlerOutput) -> Handler {
        let map = HandlerMap::new().on_value("x", move |_| {
            let output = match &output {
                Ok(value) => Ok(value.clone()),
                Err(e) => Err(PluginError::handler(e.to_string())),
            };
            async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                output
            }
        });
        map.into_iter().next().map(|(_, handler)| handler).unwrap()
    }

    #[tokio::test]
    async fn test_prefix_subscription_receives_children() {
        let bus = EventBus::new();
        let log = Log::default();
        bus.on("fetch::end", recorder(&log, "end"));
        bus.on("fetch::end::script", recorder(&log, "script"));

        bus.emit(Event::scan("fetch::end::script", "a.js")).await;
        bus.emit(Event::scan("fetch::end", "b.html")).await;

        assert_eq!(
            *log.lock(),
            vec![
                "end:fetch::end::script".to_string(),
                "script:fetch::end::script".to_string(),
                "end:fetch::end".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_segment_boundary_respected() {
        let bus = EventBus::new();
        let log = Log::default();
        bus.on("fetch", recorder(&log, "fetch"));

        bus.emit(Event::scan("fetched::end", "a")).await;

        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_registration_order_across_prefixes() {
        let bus = EventBus::new();
        let log = Log::default();
        bus.on("fetch::end::css", recorder(&log, "first"));
        bus.on("fetch", recorder(&log, "second"));
        bus.on("fetch::end::css", recorder(&log, "third"));

        bus.emit(Event::scan("fetch::end::css", "a.css")).await;

        let labels: Vec<String> = log
            .lock()
            .iter()
            .map(|entry| entry.split(':').next().unwrap_or_default().to_string())
            .collect();
        assert_eq!(labels, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_emit_continues_after_failure() {
        let bus = EventBus::new();
        let log = Log::default();
        bus.on("scan::end", delayed(0, Err(PluginError::handler("boom"))));
        bus.on("scan::end", recorder(&log, "after"));

        bus.emit(Event::scan("scan::end", "")).await;

        assert_eq!(*log.lock(), vec!["after:scan::end".to_string()]);
    }

    fn panicking() -> Handler {
        Arc::new(|event: Arc<Event>| -> HandlerFuture {
            Box::pin(async move {
                let segments: Vec<&str> = event.name().split("::").collect();
                let _ = segments[3];
                Ok(serde_json::Value::Null)
            })
        })
    }

    #[tokio::test]
    async fn test_emit_survives_panicking_handler() {
        let bus = EventBus::new();
        let log = Log::default();
        bus.on("fetch::end", recorder(&log, "before"));
        bus.on("fetch::end", panicking());
        bus.on("fetch::end", recorder(&log, "after"));

        bus.emit(Event::scan("fetch::end", "a.html")).await;

        assert_eq!(
            *log.lock(),
            vec![
                "before:fetch::end".to_string(),
                "after:fetch::end".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_emit_async_reports_panic_as_error() {
        let bus = EventBus::new();
        let log = Log::default();
        bus.on("fetch::end", recorder(&log, "before"));
        bus.on("fetch::end", panicking());
        bus.on("fetch::end", recorder(&log, "after"));

        let results = bus.emit_async(Event::scan("fetch::end", "a.html")).await;

        assert_eq!(results.len(), 3);
        let errors: Vec<String> = results
            .iter()
            .filter_map(|result| result.as_ref().err())
            .map(|error| error.to_string())
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("panicked"), "{}", errors[0]);
        assert_eq!(log.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_emit_async_settlement_order() {
        let bus = EventBus::new();
        bus.on("x", delayed(60, Ok(serde_json::json!("slow"))));
        bus.on("x", delayed(0, Err(PluginError::handler("failed"))));
        bus.on("x", delayed(20, Ok(serde_json::json!("fast"))));

        let results = bus.emit_async(Event::scan("x", "")).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_err());
        assert_eq!(results[1].as_ref().unwrap(), "fast");
        assert_eq!(results[2].as_ref().unwrap(), "slow");
    }

    #[tokio::test]
    async fn test_emit_async_without_handlers() {
        let bus = EventBus::new();
        assert!(bus.emit_async(Event::scan("nothing", "")).await.is_empty());
    }

    #[tokio::test]
    async fn test_prepend_any_runs_first_newest_first() {
        let bus = EventBus::new();
        let log = Log::default();
        bus.on("scan::start", recorder(&log, "handler"));

        let older = log.clone();
        bus.prepend_any(Arc::new(move |event: &Event| {
            older.lock().push(format!("older:{}", event.name()))
        }));
        let newer = log.clone();
        bus.prepend_any(Arc::new(move |event: &Event| {
            newer.lock().push(format!("newer:{}", event.name()))
        }));

        bus.emit(Event::scan("scan::start", "")).await;

        assert_eq!(
            *log.lock(),
            vec![
                "newer:scan::start".to_string(),
                "older:scan::start".to_string(),
                "handler:scan::start".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_clear() {
        let bus = EventBus::new();
        let log = Log::default();
        bus.on("scan::start", recorder(&log, "handler"));
        assert_eq!(bus.len(), 1);

        bus.clear();
        bus.emit(Event::scan("scan::start", "")).await;

        assert!(bus.is_empty());
        assert!(log.lock().is_empty());
    }
}
