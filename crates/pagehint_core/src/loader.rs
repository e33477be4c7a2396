//! Resource loading: resolves every plugin a configuration names.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use pagehint_plugin::{ConnectorFactory, Formatter, ParserFactory, RuleFactory, RuleMeta};

use crate::config::ResolvedConfig;
use crate::error::LoadError;
use crate::registry::{PluginKind, PluginRegistry, Resolution};

/// A resolved rule.
#[derive(Clone)]
pub struct RuleDescriptor {
    pub name: String,
    /// Package the rule was found in.
    pub package: String,
    pub meta: RuleMeta,
    pub factory: Arc<dyn RuleFactory>,
}

/// A resolved parser.
#[derive(Clone)]
pub struct ParserDescriptor {
    pub name: String,
    pub package: String,
    /// Derived events the parser may emit.
    pub emits: Vec<String>,
    pub factory: Arc<dyn ParserFactory>,
}

/// A resolved formatter.
#[derive(Clone)]
pub struct FormatterDescriptor {
    pub name: String,
    pub package: String,
    pub formatter: Arc<dyn Formatter>,
}

/// A resolved connector.
#[derive(Clone)]
pub struct ConnectorDescriptor {
    pub name: String,
    pub package: String,
    pub factory: Arc<dyn ConnectorFactory>,
}

macro_rules! impl_descriptor_debug {
    ($($ty:ident),*) => {
        $(
            impl fmt::Debug for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.debug_struct(stringify!($ty))
                        .field("name", &self.name)
                        .field("package", &self.package)
                        .finish_non_exhaustive()
                }
            }
        )*
    };
}

impl_descriptor_debug!(ParserDescriptor, FormatterDescriptor, ConnectorDescriptor);

impl fmt::Debug for RuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleDescriptor")
            .field("name", &self.name)
            .field("package", &self.package)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Everything a run needs, plus what couldn't be resolved.
#[derive(Debug, Clone, Default)]
pub struct PluginSet {
    pub connector: Option<ConnectorDescriptor>,
    pub rules: Vec<RuleDescriptor>,
    pub parsers: Vec<ParserDescriptor>,
    pub formatters: Vec<FormatterDescriptor>,
    /// Qualified names (`rule-foo`) no package provides.
    pub missing: Vec<String>,
    /// Qualified names only provided by packages for another engine version.
    pub incompatible: Vec<String>,
}

impl PluginSet {
    /// Returns whether nothing is missing or incompatible.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.incompatible.is_empty()
    }

    pub fn rule(&self, name: &str) -> Option<&RuleDescriptor> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    pub fn parser(&self, name: &str) -> Option<&ParserDescriptor> {
        self.parsers.iter().find(|parser| parser.name == name)
    }

    pub fn formatter(&self, name: &str) -> Option<&FormatterDescriptor> {
        self.formatters.iter().find(|formatter| formatter.name == name)
    }
}

/// Resolves the connector, rules, parsers and formatters of `config`.
///
/// Missing or incompatible plugins are recorded in the result. Only malformed
/// packages fail.
pub fn load(config: &ResolvedConfig, registry: &PluginRegistry) -> Result<PluginSet, LoadError> {
    let mut set = PluginSet::default();
    let extends = &config.extends;

    let lookup = |kind: PluginKind, name: &str, set: &mut PluginSet| {
        let resolution = registry.resolve(kind, name, extends)?;
        Ok::<_, LoadError>(match resolution {
            Resolution::Found(package) => Some(package),
            Resolution::Incompatible(package) => {
                info!(
                    "{} '{}' from '{}' is incompatible with engine {}",
                    kind,
                    name,
                    package.name(),
                    registry.engine_version()
                );
                set.incompatible.push(kind.qualify(name));
                None
            }
            Resolution::Missing => {
                debug!("{} '{}' not found", kind, name);
                set.missing.push(kind.qualify(name));
                None
            }
        })
    };

    let connector_name = &config.connector.name;
    if let Some(package) = lookup(PluginKind::Connector, connector_name, &mut set)? {
        if let Some(factory) = package.connector(connector_name) {
            set.connector = Some(ConnectorDescriptor {
                name: connector_name.clone(),
                package: package.name().to_string(),
                factory: factory.clone(),
            });
        }
    }

    for rule in &config.rules {
        let Some(package) = lookup(PluginKind::Rule, &rule.name, &mut set)? else {
            continue;
        };
        let Some(factory) = package.rule(&rule.name) else {
            continue;
        };

        let meta = factory.meta();
        if let Some(schema) = &meta.schema {
            jsonschema::validator_for(schema).map_err(|e| {
                LoadError::plugin(
                    &rule.name,
                    format!("invalid options schema: {}", e),
                )
            })?;
        }

        set.rules.push(RuleDescriptor {
            name: rule.name.clone(),
            package: package.name().to_string(),
            meta,
            factory: factory.clone(),
        });
    }

    for name in &config.parsers {
        let Some(package) = lookup(PluginKind::Parser, name, &mut set)? else {
            continue;
        };
        if let Some(factory) = package.parser(name) {
            set.parsers.push(ParserDescriptor {
                name: name.clone(),
                package: package.name().to_string(),
                emits: factory.emits(),
                factory: factory.clone(),
            });
        }
    }

    for name in &config.formatters {
        let Some(package) = lookup(PluginKind::Formatter, name, &mut set)? else {
            continue;
        };
        if let Some(formatter) = package.formatter(name) {
            set.formatters.push(FormatterDescriptor {
                name: name.clone(),
                package: package.name().to_string(),
                formatter: formatter.clone(),
            });
        }
    }

    debug!(
        "Loaded {} rules, {} parsers, {} formatters ({} missing, {} incompatible)",
        set.rules.len(),
        set.parsers.len(),
        set.formatters.len(),
        set.missing.len(),
        set.incompatible.len()
    );

    Ok(set)
}
