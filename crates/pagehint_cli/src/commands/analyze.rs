//! Analyze command implementation

use std::path::Path;
use std::time::Duration;

use miette::{IntoDiagnostic, Result};
use tracing::info;
use url::Url;

use pagehint_core::{ConfigOverrides, EngineError, PluginRegistry, prepare, run};

use crate::cli::Cli;
use crate::config;
use crate::progress;

/// npm-style scope suggested for missing plugins.
const PACKAGE_SCOPE: &str = "@pagehint";

pub async fn run_analyze(
    cli: &Cli,
    targets: &[String],
    formats: &[String],
    watch: bool,
    rules_timeout: Option<u64>,
) -> Result<bool> {
    let cwd = config::working_dir()?;
    let raw = config::load(cli.config.as_deref(), &cwd)?;
    if raw.is_none() {
        info!("No config file found in {}", cwd.display());
    }

    let overrides = ConfigOverrides {
        watch: watch.then_some(true),
        formatters: (!formats.is_empty()).then(|| formats.to_vec()),
        rules_timeout: rules_timeout.map(Duration::from_millis),
    };

    let targets = targets
        .iter()
        .map(|target| to_url(target, &cwd))
        .collect::<Result<Vec<_>>>()?;

    let registry = PluginRegistry::new(pagehint_builtin::package());
    let mut engine = match prepare(raw, &overrides, &registry) {
        Ok(engine) => engine,
        Err(EngineError::MissingPlugins {
            missing,
            incompatible,
        }) => {
            report_missing(&missing, &incompatible);
            return Err(miette::miette!(
                "Can't analyze: {} missing and {} incompatible plugin(s)",
                missing.len(),
                incompatible.len()
            ));
        }
        Err(e) => return Err(e).into_diagnostic(),
    };

    engine.prepend_any(progress::listener());

    let report = run(&mut engine, &targets).await;
    engine.close().await.into_diagnostic()?;
    let report = report.into_diagnostic()?;

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        eprintln!("\n{} target(s) failed to analyze:", failures.len());
        for (target, error) in &failures {
            eprintln!("  {}: {}", target, error);
        }
    }

    Ok(report.has_errors())
}

fn report_missing(missing: &[String], incompatible: &[String]) {
    if !missing.is_empty() {
        eprintln!("The following plugins are missing:");
        for name in missing {
            eprintln!("  {}  (install {}/{})", name, PACKAGE_SCOPE, name);
        }
    }
    if !incompatible.is_empty() {
        eprintln!("The following plugins are not compatible with this version of pagehint:");
        for name in incompatible {
            eprintln!("  {}  (update {}/{})", name, PACKAGE_SCOPE, name);
        }
    }
}

/// Turns a CLI target into a URL. Anything that isn't an absolute URL is a
/// path relative to `cwd`.
pub fn to_url(target: &str, cwd: &Path) -> Result<Url> {
    if let Ok(url) = Url::parse(target) {
        // Single-letter schemes are Windows drive letters.
        if url.scheme().len() > 1 {
            return Ok(url);
        }
    }

    let path = cwd.join(target);
    let url = if path.is_dir() {
        Url::from_directory_path(&path)
    } else {
        Url::from_file_path(&path)
    };
    url.map_err(|_| miette::miette!("Invalid target: {}", target))
}
