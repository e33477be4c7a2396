//! Configuration file discovery and loading.

use std::path::{Path, PathBuf};

use jsonc_parser::ParseOptions;
use miette::{IntoDiagnostic, Result};
use serde_json::Value;
use tracing::{debug, info};

/// Files searched for a configuration, in order.
pub const CONFIG_FILES: &[&str] = &[".pagehintrc", ".pagehintrc.json", "package.json"];

/// Key holding the configuration inside `package.json`.
pub const PACKAGE_JSON_KEY: &str = "pagehintConfig";

/// Loads the configuration from `path`, or discovers one in `dir`.
///
/// Returns `Ok(None)` when nothing was found; the engine turns that into a
/// fatal error.
pub fn load(path: Option<&Path>, dir: &Path) -> Result<Option<Value>> {
    match path {
        Some(path) => {
            info!("Using config: {}", path.display());
            let config = read(path)?;
            if config.is_none() {
                return Err(miette::miette!(
                    "{} has no \"{}\" entry",
                    path.display(),
                    PACKAGE_JSON_KEY
                ));
            }
            Ok(config)
        }
        None => discover(dir),
    }
}

/// Looks for the first usable configuration file in `dir`.
pub fn discover(dir: &Path) -> Result<Option<Value>> {
    for name in CONFIG_FILES {
        let candidate = dir.join(name);
        if !candidate.is_file() {
            continue;
        }
        match read(&candidate)? {
            Some(config) => {
                info!("Using config: {}", candidate.display());
                return Ok(Some(config));
            }
            None => debug!("{} has no {} entry", candidate.display(), PACKAGE_JSON_KEY),
        }
    }

    Ok(None)
}

fn read(path: &Path) -> Result<Option<Value>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("Failed to read {}: {}", path.display(), e))?;

    let value = jsonc_parser::parse_to_serde_value(&content, &ParseOptions::default())
        .map_err(|e| miette::miette!("Failed to parse {}: {}", path.display(), e))?
        .unwrap_or(Value::Object(serde_json::Map::new()));

    if is_package_json(path) {
        return Ok(value.get(PACKAGE_JSON_KEY).cloned());
    }
    Ok(Some(value))
}

fn is_package_json(path: &Path) -> bool {
    path.file_name().is_some_and(|name| name == "package.json")
}

/// Directory config discovery starts from.
pub fn working_dir() -> Result<PathBuf> {
    std::env::current_dir().into_diagnostic()
}
