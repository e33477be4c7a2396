//! Plugin packages and the registry resolving plugin names against them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use semver::{Version, VersionReq};
use serde_json::Value;
use tracing::debug;

use pagehint_plugin::{ConnectorFactory, Formatter, ParserFactory, RuleFactory};

use crate::config::ConfigSource;
use crate::error::LoadError;

/// Version of the running engine, checked against package requirements.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The kinds of plugin a package can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PluginKind {
    Connector,
    Rule,
    Parser,
    Formatter,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::Connector => "connector",
            PluginKind::Rule => "rule",
            PluginKind::Parser => "parser",
            PluginKind::Formatter => "formatter",
        }
    }

    /// Qualified name used in missing/incompatible lists, e.g. `rule-no-http`.
    pub fn qualify(&self, name: &str) -> String {
        format!("{}-{}", self.as_str(), name)
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named bundle of plugins and shareable configurations.
#[derive(Clone, Default)]
pub struct PluginPackage {
    name: String,
    engine: Option<String>,
    connectors: BTreeMap<String, Arc<dyn ConnectorFactory>>,
    rules: BTreeMap<String, Arc<dyn RuleFactory>>,
    parsers: BTreeMap<String, Arc<dyn ParserFactory>>,
    formatters: BTreeMap<String, Arc<dyn Formatter>>,
    configurations: BTreeMap<String, Value>,
    dependencies: Vec<PluginPackage>,
}

impl PluginPackage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Declares the engine versions this package works with (a semver range).
    pub fn with_engine(mut self, requirement: impl Into<String>) -> Self {
        self.engine = Some(requirement.into());
        self
    }

    pub fn with_connector(
        mut self,
        name: impl Into<String>,
        factory: impl ConnectorFactory + 'static,
    ) -> Self {
        self.connectors.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn with_rule(mut self, name: impl Into<String>, factory: impl RuleFactory + 'static) -> Self {
        self.rules.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn with_parser(
        mut self,
        name: impl Into<String>,
        factory: impl ParserFactory + 'static,
    ) -> Self {
        self.parsers.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn with_formatter(
        mut self,
        name: impl Into<String>,
        formatter: impl Formatter + 'static,
    ) -> Self {
        self.formatters.insert(name.into(), Arc::new(formatter));
        self
    }

    /// Adds a shareable configuration usable from `extends`.
    pub fn with_configuration(mut self, name: impl Into<String>, config: Value) -> Self {
        self.configurations.insert(name.into(), config);
        self
    }

    /// Adds a package this one depends on.
    pub fn with_dependency(mut self, package: PluginPackage) -> Self {
        self.dependencies.push(package);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> Option<&str> {
        self.engine.as_deref()
    }

    pub fn connector(&self, name: &str) -> Option<&Arc<dyn ConnectorFactory>> {
        self.connectors.get(name)
    }

    pub fn rule(&self, name: &str) -> Option<&Arc<dyn RuleFactory>> {
        self.rules.get(name)
    }

    pub fn parser(&self, name: &str) -> Option<&Arc<dyn ParserFactory>> {
        self.parsers.get(name)
    }

    pub fn formatter(&self, name: &str) -> Option<&Arc<dyn Formatter>> {
        self.formatters.get(name)
    }

    pub fn configuration(&self, name: &str) -> Option<&Value> {
        self.configurations.get(name)
    }

    /// Rules in name order.
    pub fn rules(&self) -> impl Iterator<Item = (&str, &Arc<dyn RuleFactory>)> {
        self.rules.iter().map(|(name, factory)| (name.as_str(), factory))
    }

    pub fn dependencies(&self) -> &[PluginPackage] {
        &self.dependencies
    }

    /// Returns whether this package provides a plugin of `kind` named `name`.
    pub fn provides(&self, kind: PluginKind, name: &str) -> bool {
        match kind {
            PluginKind::Connector => self.connectors.contains_key(name),
            PluginKind::Rule => self.rules.contains_key(name),
            PluginKind::Parser => self.parsers.contains_key(name),
            PluginKind::Formatter => self.formatters.contains_key(name),
        }
    }

    /// Checks the engine requirement. Packages without one accept any engine.
    pub fn is_compatible_with(&self, engine: &Version) -> Result<bool, LoadError> {
        let Some(requirement) = &self.engine else {
            return Ok(true);
        };

        let requirement = VersionReq::parse(requirement).map_err(|e| {
            LoadError::plugin(
                &self.name,
                format!("invalid engine requirement '{}': {}", requirement, e),
            )
        })?;

        Ok(requirement.matches(engine))
    }
}

impl fmt::Debug for PluginPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginPackage")
            .field("name", &self.name)
            .field("engine", &self.engine)
            .field("connectors", &self.connectors.keys().collect::<Vec<_>>())
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .field("parsers", &self.parsers.keys().collect::<Vec<_>>())
            .field("formatters", &self.formatters.keys().collect::<Vec<_>>())
            .field("configurations", &self.configurations.keys().collect::<Vec<_>>())
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// Outcome of resolving one plugin name.
#[derive(Debug)]
pub enum Resolution<'a> {
    /// Found in a compatible package.
    Found(&'a PluginPackage),
    /// Only provided by packages requiring another engine version.
    Incompatible(&'a PluginPackage),
    /// No package provides the name.
    Missing,
}

/// Every package available to a run.
#[derive(Debug, Clone)]
pub struct PluginRegistry {
    builtin: PluginPackage,
    installed: Vec<PluginPackage>,
    engine_version: Version,
}

impl PluginRegistry {
    /// Creates a registry around the builtin package.
    pub fn new(builtin: PluginPackage) -> Self {
        Self {
            builtin,
            installed: Vec::new(),
            engine_version: Version::parse(ENGINE_VERSION).unwrap_or_else(|_| Version::new(0, 0, 0)),
        }
    }

    /// Adds an installed package, searched after the builtin one.
    pub fn with_installed(mut self, package: PluginPackage) -> Self {
        self.installed.push(package);
        self
    }

    /// Overrides the engine version requirements are checked against.
    pub fn with_engine_version(mut self, version: Version) -> Self {
        self.engine_version = version;
        self
    }

    pub fn builtin(&self) -> &PluginPackage {
        &self.builtin
    }

    pub fn installed(&self) -> &[PluginPackage] {
        &self.installed
    }

    pub fn engine_version(&self) -> &Version {
        &self.engine_version
    }

    /// Packages in resolution order: builtin, installed, then the
    /// dependencies of the configuration packages named in `extends`.
    pub fn search_order<'a>(&'a self, extends: &[String]) -> Vec<&'a PluginPackage> {
        let mut order: Vec<&PluginPackage> = Vec::with_capacity(self.installed.len() + 1);
        order.push(&self.builtin);
        order.extend(self.installed.iter());

        for name in extends {
            let owner = order
                .iter()
                .copied()
                .find(|package| package.name() == name || package.configuration(name).is_some());
            if let Some(owner) = owner {
                let mut dependencies = Vec::new();
                collect_dependencies(owner, &mut dependencies);
                for dependency in dependencies {
                    if !order.iter().any(|p| std::ptr::eq(*p, dependency)) {
                        debug!(
                            "Adding '{}' to the search roots via extends '{}'",
                            dependency.name(),
                            name
                        );
                        order.push(dependency);
                    }
                }
            }
        }

        order
    }

    /// Resolves a plugin name.
    ///
    /// The first compatible package providing it wins. A name only provided
    /// by incompatible packages is reported as such.
    pub fn resolve<'a>(
        &'a self,
        kind: PluginKind,
        name: &str,
        extends: &[String],
    ) -> Result<Resolution<'a>, LoadError> {
        let mut incompatible = None;

        for package in self.search_order(extends) {
            if !package.provides(kind, name) {
                continue;
            }
            if package.is_compatible_with(&self.engine_version)? {
                return Ok(Resolution::Found(package));
            }
            debug!(
                "Package '{}' provides {} '{}' but requires engine {}",
                package.name(),
                kind,
                name,
                package.engine().unwrap_or("*")
            );
            incompatible.get_or_insert(package);
        }

        Ok(match incompatible {
            Some(package) => Resolution::Incompatible(package),
            None => Resolution::Missing,
        })
    }
}

fn collect_dependencies<'a>(package: &'a PluginPackage, out: &mut Vec<&'a PluginPackage>) {
    for dependency in package.dependencies() {
        out.push(dependency);
        collect_dependencies(dependency, out);
    }
}

impl ConfigSource for PluginRegistry {
    fn load_configuration(&self, name: &str) -> Option<Value> {
        let mut packages = vec![&self.builtin];
        packages.extend(self.installed.iter());
        for package in packages.clone() {
            collect_dependencies(package, &mut packages);
        }

        packages
            .into_iter()
            .find_map(|package| package.configuration(name).cloned())
    }
}
