//! Contexts handed to plugins when the engine creates them.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{Event, HandlerOutput, Problem, ProblemLocation, Severity};

/// Sink for problems reported by rules.
///
/// The engine implements this; it may drop a report (for example when the
/// resource matches an ignored URL).
pub trait Reporter: Send + Sync {
    fn report(&self, problem: Problem);
}

/// Publishes events on the engine's bus.
#[async_trait]
pub trait Emitter: Send + Sync {
    /// Runs every matching handler one after another.
    async fn emit(&self, event: Event);

    /// Runs every matching handler concurrently and returns their results in
    /// settlement order.
    async fn emit_async(&self, event: Event) -> Vec<HandlerOutput>;
}

/// Rule-scoped context. Report-only.
#[derive(Clone)]
pub struct RuleContext {
    rule_id: Arc<str>,
    severity: Severity,
    options: serde_json::Value,
    reporter: Arc<dyn Reporter>,
}

impl RuleContext {
    pub fn new(
        rule_id: impl Into<Arc<str>>,
        severity: Severity,
        options: serde_json::Value,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            severity,
            options,
            reporter,
        }
    }

    /// The rule's configured name.
    pub fn id(&self) -> &str {
        &self.rule_id
    }

    /// The rule's configured severity.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// The rule's configured options (`null` when none were given).
    pub fn options(&self) -> &serde_json::Value {
        &self.options
    }

    /// Reports a problem with the rule's configured severity.
    pub fn report(
        &self,
        resource: impl Into<String>,
        location: Option<ProblemLocation>,
        message: impl Into<String>,
    ) {
        self.report_with_severity(resource, location, message, self.severity);
    }

    /// Reports a problem with an explicit severity.
    pub fn report_with_severity(
        &self,
        resource: impl Into<String>,
        location: Option<ProblemLocation>,
        message: impl Into<String>,
        severity: Severity,
    ) {
        let mut problem =
            Problem::new(self.rule_id.as_ref(), resource, message).with_severity(severity);
        problem.location = location;
        self.reporter.report(problem);
    }
}

impl fmt::Debug for RuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleContext")
            .field("rule_id", &self.rule_id)
            .field("severity", &self.severity)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Parser-scoped context. Lets parsers publish derived events.
#[derive(Clone)]
pub struct ParserContext {
    name: Arc<str>,
    emitter: Arc<dyn Emitter>,
}

impl ParserContext {
    pub fn new(name: impl Into<Arc<str>>, emitter: Arc<dyn Emitter>) -> Self {
        Self {
            name: name.into(),
            emitter,
        }
    }

    /// The parser's configured name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Emits a derived event, awaiting each subscriber in turn.
    pub async fn emit(&self, event: Event) {
        self.emitter.emit(event).await;
    }

    /// Emits a derived event to all subscribers at once.
    pub async fn emit_async(&self, event: Event) -> Vec<HandlerOutput> {
        self.emitter.emit_async(event).await
    }
}

impl fmt::Debug for ParserContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserContext")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
