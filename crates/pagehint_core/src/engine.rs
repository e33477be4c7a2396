//! The analysis engine.
//!
//! The engine wires the loaded plugins onto an [`EventBus`], hands the bus to
//! the connector for each target and collects what rules report.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use pagehint_plugin::event::{self, LIFECYCLE_ROOTS};
use pagehint_plugin::{
    Connector, Emitter, Event, Handler, HandlerFuture, HandlerMap, HandlerOutput, ParserContext,
    PluginError, Problem, Reporter, RuleContext, Severity, Url,
};

use crate::bus::{AnyListener, EventBus};
use crate::config::{IgnoredUrls, ResolvedConfig};
use crate::error::{EngineError, LoadError};
use crate::loader::PluginSet;

/// Lifecycle of an [`Engine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Created,
    ConfigLoaded,
    ResourcesResolved,
    Ready,
    /// Running the connector against the given target.
    Scanning(String),
    /// Handing a target's problems to `print` subscribers.
    Reporting,
    Closed,
}

/// Problems found for one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub target: String,
    /// Problems in the order they were reported.
    pub problems: Vec<Problem>,
}

impl RunResult {
    /// Returns whether any problem has error severity.
    pub fn has_errors(&self) -> bool {
        self.problems.iter().any(Problem::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    fn count(&self, severity: Severity) -> usize {
        self.problems
            .iter()
            .filter(|problem| problem.severity == severity)
            .count()
    }
}

/// Called once per target after `scan::end`.
pub type PrintHandler = Arc<dyn Fn(&RunResult) -> Result<(), PluginError> + Send + Sync>;

tokio::task_local! {
    /// Scan a rule invocation was started for.
    static SCAN: u64;
}

/// Accumulates the problems of the current target, dropping those whose
/// resource is ignored for the reporting rule.
///
/// Each target gets a new scan number. Reports made by a rule invocation
/// started for an earlier scan are dropped.
#[derive(Debug, Default)]
pub struct ProblemCollector {
    ignored: IgnoredUrls,
    scan: AtomicU64,
    problems: Mutex<Vec<Problem>>,
}

impl ProblemCollector {
    pub fn new(ignored: IgnoredUrls) -> Self {
        Self {
            ignored,
            scan: AtomicU64::new(0),
            problems: Mutex::new(Vec::new()),
        }
    }

    /// Starts a new scan and returns its number.
    pub fn begin_scan(&self) -> u64 {
        self.scan.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_scan(&self) -> u64 {
        self.scan.load(Ordering::SeqCst)
    }

    fn is_stale(&self) -> bool {
        SCAN.try_with(|scan| *scan != self.current_scan())
            .unwrap_or(false)
    }

    /// Appends a problem without consulting the ignored URLs.
    pub fn push(&self, problem: Problem) {
        self.problems.lock().push(problem);
    }

    /// Takes every problem collected so far.
    pub fn take(&self) -> Vec<Problem> {
        std::mem::take(&mut *self.problems.lock())
    }

    pub fn len(&self) -> usize {
        self.problems.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Reporter for ProblemCollector {
    fn report(&self, problem: Problem) {
        if self.is_stale() {
            debug!(
                "Dropping late report from '{}' for {}",
                problem.rule_id, problem.resource
            );
            return;
        }
        if self.ignored.is_ignored(&problem.rule_id, &problem.resource) {
            debug!(
                "Ignoring report from '{}' for {}",
                problem.rule_id, problem.resource
            );
            return;
        }
        self.push(problem);
    }
}

/// Emitter handed to parsers and connectors.
///
/// Holds the bus weakly: the bus owns the parser handlers that own this.
struct BusEmitter {
    bus: Weak<EventBus>,
}

#[async_trait]
impl Emitter for BusEmitter {
    async fn emit(&self, event: Event) {
        match self.bus.upgrade() {
            Some(bus) => bus.emit(event).await,
            None => debug!("Dropping '{}': engine closed", event.name()),
        }
    }

    async fn emit_async(&self, event: Event) -> Vec<HandlerOutput> {
        match self.bus.upgrade() {
            Some(bus) => bus.emit_async(event).await,
            None => Vec::new(),
        }
    }
}

/// Everything a rule handler wrapper needs.
#[derive(Clone)]
struct RuleGuard {
    rule: Arc<str>,
    timeout: Duration,
    works_with_local_files: bool,
    local_target: Arc<AtomicBool>,
    collector: Arc<ProblemCollector>,
}

impl RuleGuard {
    /// Spawns each invocation of `handler` and races it against the timeout.
    ///
    /// A handler that doesn't settle in time is abandoned: its task keeps
    /// running detached and a timeout problem is recorded.
    fn wrap(self, handler: Handler) -> Handler {
        Arc::new(move |event: Arc<Event>| -> HandlerFuture {
            let guard = self.clone();
            let handler = handler.clone();
            Box::pin(async move {
                if !guard.works_with_local_files && guard.local_target.load(Ordering::Relaxed) {
                    return Ok(serde_json::Value::Null);
                }

                let resource = event.resource().to_string();
                let name = event.name().to_string();
                let scan = guard.collector.current_scan();
                let task = tokio::spawn(SCAN.scope(scan, async move { handler(event).await }));

                match tokio::time::timeout(guard.timeout, task).await {
                    Ok(Ok(output)) => output,
                    Ok(Err(e)) => Err(PluginError::handler(format!(
                        "Rule '{}' aborted on '{}': {}",
                        guard.rule, name, e
                    ))),
                    Err(_) => {
                        warn!(
                            "Rule '{}' timed out on '{}' after {:?}",
                            guard.rule, name, guard.timeout
                        );
                        guard.collector.push(
                            Problem::new(
                                guard.rule.as_ref(),
                                resource,
                                format!(
                                    "Rule '{}' didn't finish within {} ms",
                                    guard.rule,
                                    guard.timeout.as_millis()
                                ),
                            )
                            .with_severity(Severity::Error),
                        );
                        Ok(serde_json::Value::Null)
                    }
                }
            })
        })
    }
}

/// Drives targets through the wired plugins.
pub struct Engine {
    config: ResolvedConfig,
    bus: Arc<EventBus>,
    emitter: Arc<dyn Emitter>,
    collector: Arc<ProblemCollector>,
    connector: Option<Box<dyn Connector>>,
    print_handlers: Vec<PrintHandler>,
    local_target: Arc<AtomicBool>,
    local_incapable_rules: Vec<String>,
    state: EngineState,
}

impl Engine {
    /// Validates rule options and wires every plugin.
    pub fn new(config: ResolvedConfig, plugins: PluginSet) -> Result<Self, EngineError> {
        let mut state = EngineState::Created;

        if !plugins.is_complete() {
            return Err(EngineError::MissingPlugins {
                missing: plugins.missing,
                incompatible: plugins.incompatible,
            });
        }

        config.validate_rule_options(&plugins)?;
        transition(&mut state, EngineState::ConfigLoaded);

        let known_events: Vec<String> = plugins
            .parsers
            .iter()
            .flat_map(|parser| parser.emits.iter().cloned())
            .collect();

        let bus = Arc::new(EventBus::new());
        let emitter: Arc<dyn Emitter> = Arc::new(BusEmitter {
            bus: Arc::downgrade(&bus),
        });
        let collector = Arc::new(ProblemCollector::new(config.ignored_urls.clone()));
        let local_target = Arc::new(AtomicBool::new(false));

        for parser in &plugins.parsers {
            let handlers = parser
                .factory
                .create(ParserContext::new(parser.name.as_str(), emitter.clone()));
            check_subscriptions(&parser.name, &handlers, &known_events)?;
            for (name, handler) in handlers {
                bus.on(name, handler);
            }
            debug!("Wired parser '{}'", parser.name);
        }

        let mut local_incapable_rules = Vec::new();
        for rule in config.enabled_rules() {
            let Some(descriptor) = plugins.rule(&rule.name) else {
                continue;
            };

            let reporter: Arc<dyn Reporter> = collector.clone();
            let context = RuleContext::new(
                rule.name.as_str(),
                rule.severity,
                rule.options.clone(),
                reporter,
            );
            let handlers = descriptor.factory.create(context);
            check_subscriptions(&rule.name, &handlers, &known_events)?;

            let guard = RuleGuard {
                rule: Arc::from(rule.name.as_str()),
                timeout: config.rules_timeout,
                works_with_local_files: descriptor.meta.works_with_local_files,
                local_target: local_target.clone(),
                collector: collector.clone(),
            };
            for (name, handler) in handlers {
                bus.on(name, guard.clone().wrap(handler));
            }

            if !descriptor.meta.works_with_local_files {
                local_incapable_rules.push(rule.name.clone());
            }
            debug!("Wired rule '{}' ({})", rule.name, rule.severity);
        }

        let print_handlers: Vec<PrintHandler> = plugins
            .formatters
            .iter()
            .map(|descriptor| {
                let formatter = descriptor.formatter.clone();
                let handler: PrintHandler =
                    Arc::new(move |result: &RunResult| formatter.format(&result.problems));
                handler
            })
            .collect();
        transition(&mut state, EngineState::ResourcesResolved);

        let connector = match &plugins.connector {
            Some(descriptor) => descriptor
                .factory
                .create(&config.connector.options)
                .map_err(|e| LoadError::plugin(&descriptor.name, e.to_string()))?,
            None => {
                return Err(EngineError::MissingPlugins {
                    missing: vec![format!("connector-{}", config.connector.name)],
                    incompatible: Vec::new(),
                });
            }
        };
        transition(&mut state, EngineState::Ready);

        info!(
            "Engine ready: {} handlers, {} formatters",
            bus.len(),
            print_handlers.len()
        );

        Ok(Self {
            config,
            bus,
            emitter,
            collector,
            connector: Some(connector),
            print_handlers,
            local_target,
            local_incapable_rules,
            state,
        })
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Runs the connector against `target` and returns what was reported.
    ///
    /// `print` subscribers are called before this returns.
    pub async fn execute_on(&mut self, target: &Url) -> Result<RunResult, EngineError> {
        if self.state == EngineState::Closed {
            return Err(EngineError::Closed);
        }
        let Some(connector) = self.connector.as_mut() else {
            return Err(EngineError::Closed);
        };

        transition(&mut self.state, EngineState::Scanning(target.to_string()));
        let scan = self.collector.begin_scan();
        debug!("Scan {} for {}", scan, target);

        let is_local = target.scheme() == "file";
        self.local_target.store(is_local, Ordering::Relaxed);
        if is_local {
            for rule in &self.local_incapable_rules {
                debug!("Skipping rule '{}': it doesn't work with local files", rule);
            }
        }

        let collected = connector.collect(target, self.emitter.clone()).await;

        if let Err(e) = collected {
            let discarded = self.collector.take();
            debug!(
                "Discarding {} problems from failed target {}",
                discarded.len(),
                target
            );
            transition(&mut self.state, EngineState::Ready);
            return Err(EngineError::ConnectorError {
                target: target.to_string(),
                reason: e.to_string(),
            });
        }

        let result = RunResult {
            target: target.to_string(),
            problems: self.collector.take(),
        };

        transition(&mut self.state, EngineState::Reporting);
        self.print(&result);
        transition(&mut self.state, EngineState::Ready);

        Ok(result)
    }

    fn print(&self, result: &RunResult) {
        for handler in &self.print_handlers {
            if let Err(e) = handler(result) {
                warn!("Failed to print results for {}: {}", result.target, e);
            }
        }
    }

    /// Subscribes to the per-target `print` notification.
    pub fn on_print(&mut self, handler: PrintHandler) {
        self.print_handlers.push(handler);
    }

    /// Adds a listener that observes every event before any handler.
    pub fn prepend_any(&self, listener: AnyListener) {
        self.bus.prepend_any(listener);
    }

    /// Emits an event on the engine's bus.
    pub async fn emit(&self, event: Event) {
        self.bus.emit(event).await;
    }

    /// Emits an event and collects every handler's result.
    pub async fn emit_async(&self, event: Event) -> Vec<HandlerOutput> {
        self.bus.emit_async(event).await
    }

    /// Releases the connector and drops every subscription. Idempotent.
    pub async fn close(&mut self) -> Result<(), EngineError> {
        if self.state == EngineState::Closed {
            return Ok(());
        }

        if let Some(mut connector) = self.connector.take() {
            if let Err(e) = connector.close().await {
                warn!("Failed to close connector: {}", e);
            }
        }
        self.collector.begin_scan();
        self.bus.clear();
        self.print_handlers.clear();
        let dropped = self.collector.take();
        if !dropped.is_empty() {
            debug!("Dropping {} late problems", dropped.len());
        }

        transition(&mut self.state, EngineState::Closed);
        Ok(())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("bus", &self.bus)
            .field("print_handlers", &self.print_handlers.len())
            .finish_non_exhaustive()
    }
}

fn transition(state: &mut EngineState, next: EngineState) {
    debug!("Engine state: {:?} -> {:?}", state, next);
    *state = next;
}

/// Checks that every subscription of `plugin` can ever fire.
///
/// A name is accepted when its segments are non-empty and it is either
/// rooted in a connector lifecycle event or prefix-related to an event some
/// parser emits.
fn check_subscriptions(
    plugin: &str,
    handlers: &HandlerMap,
    known_events: &[String],
) -> Result<(), EngineError> {
    for name in handlers.events() {
        let deliverable = event::is_well_formed(name)
            && (LIFECYCLE_ROOTS.contains(&event::root(name))
                || known_events
                    .iter()
                    .any(|known| event::matches(name, known) || event::matches(known, name)));

        if !deliverable {
            return Err(EngineError::PluginWireError {
                plugin: plugin.to_string(),
                event: name.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load;
    use crate::registry::{PluginPackage, PluginRegistry};
    use crate::test_utils::{ScriptedConnector, StaticParser, StaticRule, fetch_end};
    use pagehint_plugin::{Category, RuleMeta};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn reporting_rule() -> StaticRule {
        StaticRule::with_handlers(RuleMeta::new(Category::Security), |context| {
            HandlerMap::new().on("fetch::end", move |event| {
                let context = context.clone();
                async move {
                    context.report(event.resource(), None, "Found a problem");
                    Ok(())
                }
            })
        })
    }

    fn engine(config: serde_json::Value, package: PluginPackage) -> Result<Engine, EngineError> {
        let config = ResolvedConfig::from_value(config)?;
        let plugins = load(&config, &PluginRegistry::new(package))?;
        Engine::new(config, plugins)
    }

    fn package() -> PluginPackage {
        PluginPackage::new("test")
            .with_connector(
                "scripted",
                ScriptedConnector::factory(vec![fetch_end("http://example.com/a.js", "script")]),
            )
            .with_rule("reporting", reporting_rule())
    }

    #[test]
    fn test_problem_collector_filters_ignored() {
        let ignored = IgnoredUrls::compile(&[crate::config::IgnoredUrl {
            domain: "cdn\\.example\\.com".to_string(),
            rules: vec!["r".to_string()],
        }])
        .unwrap();
        let collector = ProblemCollector::new(ignored);

        collector.report(Problem::new("r", "https://CDN.example.com/x.js", "m"));
        collector.report(Problem::new("other", "https://cdn.example.com/x.js", "m"));
        collector.report(Problem::new("r", "https://example.com", "m"));

        let problems = collector.take();
        assert_eq!(problems.len(), 2);
        assert!(collector.is_empty());
    }

    #[tokio::test]
    async fn test_problem_collector_drops_stale_reports() {
        let collector = Arc::new(ProblemCollector::default());
        let first = collector.begin_scan();
        let second = collector.begin_scan();

        let late = collector.clone();
        SCAN.scope(first, async move {
            late.report(Problem::new("r", "http://first.test/", "late"))
        })
        .await;
        let current = collector.clone();
        SCAN.scope(second, async move {
            current.report(Problem::new("r", "http://second.test/", "on time"))
        })
        .await;

        let problems = collector.take();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].resource, "http://second.test/");
    }

    #[test]
    fn test_run_result_counts() {
        let result = RunResult {
            target: "http://example.com/".to_string(),
            problems: vec![
                Problem::new("a", "", "m"),
                Problem::new("b", "", "m").with_severity(Severity::Warning),
                Problem::new("c", "", "m").with_severity(Severity::Warning),
            ],
        };

        assert!(result.has_errors());
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.warning_count(), 2);
    }

    #[tokio::test]
    async fn test_ready_after_new() {
        let engine = engine(
            json!({ "connector": "scripted", "rules": { "reporting": "warning" } }),
            package(),
        )
        .unwrap();

        assert_eq!(engine.state(), &EngineState::Ready);
    }

    #[tokio::test]
    async fn test_off_rules_not_wired() {
        let engine = engine(
            json!({ "connector": "scripted", "rules": { "reporting": "off" } }),
            package(),
        )
        .unwrap();

        assert!(engine.bus.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_event_root_rejected() {
        let package = package().with_rule(
            "odd",
            StaticRule::with_handlers(RuleMeta::new(Category::Other), |_| {
                HandlerMap::new().on("bogus::event", |_| async { Ok(()) })
            }),
        );

        let result = engine(
            json!({ "connector": "scripted", "rules": { "odd": "error" } }),
            package,
        );

        assert!(matches!(
            result,
            Err(EngineError::PluginWireError { ref plugin, ref event })
                if plugin == "odd" && event == "bogus::event"
        ));
    }

    #[tokio::test]
    async fn test_empty_segment_rejected() {
        let package = package().with_rule(
            "odd",
            StaticRule::with_handlers(RuleMeta::new(Category::Other), |_| {
                HandlerMap::new().on("fetch::::end", |_| async { Ok(()) })
            }),
        );

        let result = engine(
            json!({ "connector": "scripted", "rules": { "odd": "error" } }),
            package,
        );

        assert!(matches!(result, Err(EngineError::PluginWireError { .. })));
    }

    #[tokio::test]
    async fn test_parser_events_accepted() {
        let package = package()
            .with_parser("css", StaticParser::new(vec!["parse::css::end"]))
            .with_rule(
                "css-rule",
                StaticRule::with_handlers(RuleMeta::new(Category::Other), |_| {
                    HandlerMap::new()
                        .on("parse::css", |_| async { Ok(()) })
                        .on("parse::css::end::extra", |_| async { Ok(()) })
                }),
            );

        let result = engine(
            json!({
                "connector": "scripted",
                "parsers": ["css"],
                "rules": { "css-rule": "error" }
            }),
            package,
        );

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_missing_plugins_fail() {
        let config = ResolvedConfig::from_value(
            json!({ "connector": "scripted", "rules": { "absent": "error" } }),
        )
        .unwrap();
        let plugins = load(&config, &PluginRegistry::new(package())).unwrap();

        let result = Engine::new(config, plugins);

        assert!(matches!(
            result,
            Err(EngineError::MissingPlugins { ref missing, .. }) if missing == &vec!["rule-absent".to_string()]
        ));
    }

    #[tokio::test]
    async fn test_rule_options_validated() {
        let package = package().with_rule(
            "strict",
            StaticRule::new(RuleMeta::new(Category::Other).with_schema(json!({
                "type": "object",
                "properties": { "max": { "type": "integer" } },
                "additionalProperties": false
            }))),
        );

        let result = engine(
            json!({
                "connector": "scripted",
                "rules": { "strict": ["error", { "max": "three" }] }
            }),
            package,
        );

        assert!(matches!(
            result,
            Err(EngineError::Config(crate::error::ConfigError::RuleOptionSchemaInvalid { ref rules }))
                if rules == &vec!["strict".to_string()]
        ));
    }

    #[tokio::test]
    async fn test_local_targets_skip_incapable_rules() {
        let mut engine = engine(
            json!({ "connector": "scripted", "rules": { "reporting": "error" } }),
            package(),
        )
        .unwrap();

        let remote = engine
            .execute_on(&Url::parse("http://example.com").unwrap())
            .await
            .unwrap();
        let local = engine
            .execute_on(&Url::parse("file:///tmp/site/").unwrap())
            .await
            .unwrap();

        assert_eq!(remote.problems.len(), 1);
        assert!(local.problems.is_empty());
    }

    #[tokio::test]
    async fn test_print_called_once_per_target() {
        let mut engine = engine(
            json!({ "connector": "scripted", "rules": { "reporting": "error" } }),
            package(),
        )
        .unwrap();
        let printed = Arc::new(Mutex::new(Vec::new()));
        let sink = printed.clone();
        engine.on_print(Arc::new(move |result: &RunResult| {
            sink.lock().push(result.problems.len());
            Ok(())
        }));

        engine
            .execute_on(&Url::parse("http://example.com").unwrap())
            .await
            .unwrap();
        engine
            .execute_on(&Url::parse("http://example.org").unwrap())
            .await
            .unwrap();

        assert_eq!(*printed.lock(), vec![1, 1]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut engine = engine(json!({ "connector": "scripted" }), package()).unwrap();

        engine.close().await.unwrap();
        engine.close().await.unwrap();

        assert_eq!(engine.state(), &EngineState::Closed);
        let result = engine
            .execute_on(&Url::parse("http://example.com").unwrap())
            .await;
        assert!(matches!(result, Err(EngineError::Closed)));
    }
}
