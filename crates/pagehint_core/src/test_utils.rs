//! Plugin doubles shared by unit and integration tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use pagehint_plugin::event::{SCAN_END, SCAN_START};
use pagehint_plugin::{
    Connector, ConnectorFactory, Emitter, Event, FetchEnd, Formatter, HandlerMap, ParserContext,
    ParserFactory, PluginError, Problem, Response, ResponseBody, RuleContext, RuleFactory,
    RuleMeta, Url,
};

type CreateRule = dyn Fn(RuleContext) -> HandlerMap + Send + Sync;
type CreateParser = dyn Fn(ParserContext) -> HandlerMap + Send + Sync;

/// Rule built from a closure.
pub struct StaticRule {
    meta: RuleMeta,
    create: Arc<CreateRule>,
}

impl StaticRule {
    /// A rule without handlers.
    pub fn new(meta: RuleMeta) -> Self {
        Self::with_handlers(meta, |_| HandlerMap::new())
    }

    pub fn with_handlers<F>(meta: RuleMeta, create: F) -> Self
    where
        F: Fn(RuleContext) -> HandlerMap + Send + Sync + 'static,
    {
        Self {
            meta,
            create: Arc::new(create),
        }
    }
}

impl RuleFactory for StaticRule {
    fn meta(&self) -> RuleMeta {
        self.meta.clone()
    }

    fn create(&self, context: RuleContext) -> HandlerMap {
        (self.create)(context)
    }
}

/// Parser built from a closure.
pub struct StaticParser {
    emits: Vec<String>,
    create: Arc<CreateParser>,
}

impl StaticParser {
    /// A parser declaring `emits` but without handlers.
    pub fn new(emits: Vec<&str>) -> Self {
        Self::with_handlers(emits, |_| HandlerMap::new())
    }

    pub fn with_handlers<F>(emits: Vec<&str>, create: F) -> Self
    where
        F: Fn(ParserContext) -> HandlerMap + Send + Sync + 'static,
    {
        Self {
            emits: emits.into_iter().map(str::to_string).collect(),
            create: Arc::new(create),
        }
    }
}

impl ParserFactory for StaticParser {
    fn emits(&self) -> Vec<String> {
        self.emits.clone()
    }

    fn create(&self, context: ParserContext) -> HandlerMap {
        (self.create)(context)
    }
}

/// Formatter that prints nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFormatter;

impl Formatter for NoopFormatter {
    fn format(&self, _problems: &[Problem]) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Formatter remembering every problem list it was given.
#[derive(Debug, Default, Clone)]
pub struct RecordingFormatter {
    pub printed: Arc<Mutex<Vec<Vec<Problem>>>>,
}

impl Formatter for RecordingFormatter {
    fn format(&self, problems: &[Problem]) -> Result<(), PluginError> {
        self.printed.lock().push(problems.to_vec());
        Ok(())
    }
}

/// Builds a `fetch::end::<kind>` event for `resource` with a 200 response.
pub fn fetch_end(resource: &str, kind: &str) -> Event {
    fetch_end_with_body(resource, kind, "")
}

/// Same as [`fetch_end`] with a body.
pub fn fetch_end_with_body(resource: &str, kind: &str, body: &str) -> Event {
    Event::new(
        format!("fetch::end::{}", kind),
        FetchEnd {
            resource: resource.to_string(),
            response: Response {
                status_code: 200,
                headers: BTreeMap::new(),
                body: ResponseBody {
                    content: body.to_string(),
                },
            },
        },
    )
}

/// Connector replaying a fixed list of events between `scan::start` and
/// `scan::end`.
pub struct ScriptedConnector {
    events: Arc<Vec<Event>>,
    fail_on: Option<String>,
    closed: Arc<Mutex<usize>>,
}

impl ScriptedConnector {
    pub fn factory(events: Vec<Event>) -> ScriptedConnectorFactory {
        ScriptedConnectorFactory {
            events: Arc::new(events),
            fail_on: None,
            closed: Arc::default(),
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn collect(
        &mut self,
        target: &Url,
        emitter: Arc<dyn Emitter>,
    ) -> Result<(), PluginError> {
        emitter.emit(Event::scan(SCAN_START, target.as_str())).await;

        let failing = self.fail_on.as_deref().is_some_and(|fail_on| {
            fail_on.trim_end_matches('/') == target.as_str().trim_end_matches('/')
        });
        if failing {
            return Err(PluginError::connector(format!("couldn't load {}", target)));
        }

        for event in self.events.iter() {
            emitter.emit(event.clone()).await;
        }

        emitter.emit(Event::scan(SCAN_END, target.as_str())).await;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        *self.closed.lock() += 1;
        Ok(())
    }
}

/// Factory for [`ScriptedConnector`].
#[derive(Clone)]
pub struct ScriptedConnectorFactory {
    events: Arc<Vec<Event>>,
    fail_on: Option<String>,
    closed: Arc<Mutex<usize>>,
}

impl ScriptedConnectorFactory {
    /// Makes `collect` fail for `target` right after `scan::start`.
    pub fn failing_on(mut self, target: &str) -> Self {
        self.fail_on = Some(target.to_string());
        self
    }

    /// How many times a connector from this factory was closed.
    pub fn close_count(&self) -> Arc<Mutex<usize>> {
        self.closed.clone()
    }
}

impl ConnectorFactory for ScriptedConnectorFactory {
    fn create(&self, _options: &serde_json::Value) -> Result<Box<dyn Connector>, PluginError> {
        Ok(Box::new(ScriptedConnector {
            events: self.events.clone(),
            fail_on: self.fail_on.clone(),
            closed: self.closed.clone(),
        }))
    }
}
