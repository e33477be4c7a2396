//! Run orchestration: resolve, load, construct, scan every target, close.

use serde_json::Value;
use tracing::{info, warn};

use pagehint_plugin::Url;

use crate::config::{ConfigOverrides, ResolvedConfig};
use crate::engine::{Engine, RunResult};
use crate::error::EngineError;
use crate::loader;
use crate::registry::PluginRegistry;

/// Input of [`analyze`].
#[derive(Debug, Clone, Default)]
pub struct AnalyzeRequest {
    /// Parsed configuration file, `None` when none was found.
    pub config: Option<Value>,
    pub overrides: ConfigOverrides,
    /// Targets, scanned in this order.
    pub targets: Vec<Url>,
}

/// What happened to one target.
#[derive(Debug)]
pub enum TargetOutcome {
    Completed(RunResult),
    Failed { target: Url, error: EngineError },
}

impl TargetOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TargetOutcome::Completed(_))
    }
}

/// Outcome of a multi-target run, in input order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<TargetOutcome>,
}

impl RunReport {
    /// Results of the targets that completed.
    pub fn results(&self) -> impl Iterator<Item = &RunResult> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            TargetOutcome::Completed(result) => Some(result),
            TargetOutcome::Failed { .. } => None,
        })
    }

    /// Targets whose connector run failed.
    pub fn failures(&self) -> impl Iterator<Item = (&Url, &EngineError)> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            TargetOutcome::Failed { target, error } => Some((target, error)),
            TargetOutcome::Completed(_) => None,
        })
    }

    /// Returns whether a target failed or reported an error-severity problem.
    pub fn has_errors(&self) -> bool {
        self.failures().next().is_some() || self.results().any(RunResult::has_errors)
    }
}

/// Resolves the configuration and plugins and builds an engine.
///
/// Missing or incompatible plugins fail with [`EngineError::MissingPlugins`]
/// before any plugin is instantiated.
pub fn prepare(
    config: Option<Value>,
    overrides: &ConfigOverrides,
    registry: &PluginRegistry,
) -> Result<Engine, EngineError> {
    let config = ResolvedConfig::resolve(config, overrides, registry)?;
    let plugins = loader::load(&config, registry)?;

    if !plugins.is_complete() {
        return Err(EngineError::MissingPlugins {
            missing: plugins.missing,
            incompatible: plugins.incompatible,
        });
    }

    Engine::new(config, plugins)
}

/// Scans `targets` one after another. A failing target is recorded and the
/// run moves on.
pub async fn run(engine: &mut Engine, targets: &[Url]) -> Result<RunReport, EngineError> {
    let mut report = RunReport::default();

    for target in targets {
        match engine.execute_on(target).await {
            Ok(result) => {
                info!(
                    "{}: {} errors, {} warnings",
                    target,
                    result.error_count(),
                    result.warning_count()
                );
                report.outcomes.push(TargetOutcome::Completed(result));
            }
            Err(error) if !error.is_fatal() => {
                warn!("{}", error);
                report.outcomes.push(TargetOutcome::Failed {
                    target: target.clone(),
                    error,
                });
            }
            Err(error) => return Err(error),
        }
    }

    Ok(report)
}

/// Runs a whole analysis and returns the closed engine with the report.
pub async fn analyze(
    request: AnalyzeRequest,
    registry: &PluginRegistry,
) -> Result<(Engine, RunReport), EngineError> {
    let mut engine = prepare(request.config, &request.overrides, registry)?;
    let report = run(&mut engine, &request.targets).await;
    engine.close().await?;
    Ok((engine, report?))
}
