//! Configuration resolution.
//!
//! A raw configuration goes through these steps before the engine sees it:
//!
//! 1. Shape validation against the embedded `schemas/v1/config.json`.
//! 2. `extends` composition, recursively, left to right, user config last.
//! 3. Connector, rule severity and formatter normalization.
//! 4. `ignoredUrls` compilation into case-insensitive matchers.
//! 5. Defaults (`rulesTimeout`, `browserslist`) and overrides.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use jsonschema::Validator;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use pagehint_plugin::Severity;

use crate::error::ConfigError;
use crate::loader::PluginSet;
use crate::merge::merge_all;

// Embed the schema
const SCHEMA_JSON: &str = include_str!("../../../schemas/v1/config.json");
static CONFIG_SCHEMA: OnceLock<Validator> = OnceLock::new();

/// Timeout applied to each rule handler when `rulesTimeout` is unset or zero.
pub const DEFAULT_RULES_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Sentinel rule name in `ignoredUrls` meaning "every rule".
pub const ALL_RULES: &str = "all";

/// Loads shareable configurations referenced from `extends`.
pub trait ConfigSource {
    /// Returns the raw configuration registered under `name`.
    fn load_configuration(&self, name: &str) -> Option<Value>;
}

/// A source without any shareable configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConfigSource;

impl ConfigSource for NoConfigSource {
    fn load_configuration(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// Raw user configuration, as found in `.pagehintrc`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<ConnectorSetting>,

    #[serde(default)]
    pub parsers: Vec<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub formatters: Vec<String>,

    /// Rule name to `severity` or `[severity, options]`.
    #[serde(default)]
    pub rules: Map<String, Value>,

    #[serde(default)]
    pub extends: Vec<String>,

    #[serde(default)]
    pub ignored_urls: Vec<IgnoredUrl>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub browserslist: Vec<String>,

    /// Per-rule timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_timeout: Option<u64>,
}

/// Connector configured either by bare name or with options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConnectorSetting {
    Name(String),
    Config(ConnectorConfig),
}

/// Normalized connector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default = "empty_object")]
    pub options: Value,
}

impl ConnectorConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: empty_object(),
        }
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// An `ignoredUrls` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgnoredUrl {
    /// Regular expression matched case-insensitively against resources.
    pub domain: String,
    /// Rules the pattern applies to. `all` (or `*`) means every rule.
    pub rules: Vec<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// A rule entry with its severity normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleConfig {
    pub name: String,
    pub severity: Severity,
    /// `null` when the rule was configured without options.
    pub options: Value,
}

impl RuleConfig {
    /// Normalizes `severity` or `[severity, options...]`.
    pub fn normalize(name: &str, setting: &Value) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidSeverity {
            rule: name.to_string(),
            value: setting.to_string(),
        };

        let (severity, options) = match setting {
            Value::Array(items) => {
                let severity = items
                    .first()
                    .and_then(Severity::from_value)
                    .ok_or_else(invalid)?;
                let options = match &items[1..] {
                    [] => Value::Null,
                    [single] => single.clone(),
                    rest => Value::Array(rest.to_vec()),
                };
                (severity, options)
            }
            other => (Severity::from_value(other).ok_or_else(invalid)?, Value::Null),
        };

        Ok(Self {
            name: name.to_string(),
            severity,
            options,
        })
    }

    /// Serializes back to the configuration form.
    pub fn to_value(&self) -> Value {
        let severity = Value::String(self.severity.as_str().to_string());
        if self.options.is_null() {
            severity
        } else {
            Value::Array(vec![severity, self.options.clone()])
        }
    }
}

/// Normalizes every entry of a `rules` map, preserving its order.
pub fn normalize_rules(rules: &Map<String, Value>) -> Result<Vec<RuleConfig>, ConfigError> {
    rules
        .iter()
        .map(|(name, setting)| RuleConfig::normalize(name, setting))
        .collect()
}

/// Inverse of [`normalize_rules`].
pub fn rules_to_value(rules: &[RuleConfig]) -> Map<String, Value> {
    rules
        .iter()
        .map(|rule| (rule.name.clone(), rule.to_value()))
        .collect()
}

/// Compiled `ignoredUrls`: rule name (or `all`) to ordered matchers.
#[derive(Debug, Clone, Default)]
pub struct IgnoredUrls {
    patterns: BTreeMap<String, Vec<Regex>>,
}

impl IgnoredUrls {
    /// Compiles the `ignoredUrls` entries.
    pub fn compile(entries: &[IgnoredUrl]) -> Result<Self, ConfigError> {
        let mut patterns: BTreeMap<String, Vec<Regex>> = BTreeMap::new();

        for entry in entries {
            let regex = RegexBuilder::new(&entry.domain)
                .case_insensitive(true)
                .build()
                .map_err(|e| ConfigError::InvalidIgnoredUrl {
                    pattern: entry.domain.clone(),
                    reason: e.to_string(),
                })?;

            for rule in &entry.rules {
                let rule = if rule == "*" { ALL_RULES } else { rule.as_str() };
                patterns
                    .entry(rule.to_string())
                    .or_default()
                    .push(regex.clone());
            }
        }

        Ok(Self { patterns })
    }

    /// Returns whether reports from `rule` about `resource` must be dropped.
    pub fn is_ignored(&self, rule: &str, resource: &str) -> bool {
        [rule, ALL_RULES]
            .iter()
            .filter_map(|key| self.patterns.get(*key))
            .flatten()
            .any(|regex| regex.is_match(resource))
    }

    /// Returns the matchers registered under `rule` (not including `all`).
    pub fn patterns(&self, rule: &str) -> &[Regex] {
        self.patterns.get(rule).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Values supplied on the command line that win over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Sets `connector.options.watch`.
    pub watch: Option<bool>,
    /// Replaces the formatter list.
    pub formatters: Option<Vec<String>>,
    /// Replaces `rulesTimeout`.
    pub rules_timeout: Option<Duration>,
}

/// The composed, normalized configuration the engine runs with.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub connector: ConnectorConfig,
    pub parsers: Vec<String>,
    pub formatters: Vec<String>,
    /// Rules in configuration order.
    pub rules: Vec<RuleConfig>,
    /// Every configuration package visited while composing, in visit order.
    pub extends: Vec<String>,
    pub ignored_urls: IgnoredUrls,
    pub browserslist: Vec<String>,
    pub rules_timeout: Duration,
}

impl ResolvedConfig {
    /// Resolves a raw configuration.
    ///
    /// `raw` is `None` when no configuration could be found.
    pub fn resolve(
        raw: Option<Value>,
        overrides: &ConfigOverrides,
        source: &dyn ConfigSource,
    ) -> Result<Self, ConfigError> {
        let raw = raw.ok_or(ConfigError::NotFound)?;

        validate_shape(&raw)?;

        debug!("Composing configuration from extends");
        let mut visited = Vec::new();
        let composed = compose(raw, source, &mut Vec::new(), &mut visited)?;

        let user: UserConfig = serde_json::from_value(composed)
            .map_err(|e| ConfigError::shape(format!("Invalid config: {}", e)))?;

        Self::from_user_config(user, visited, overrides)
    }

    /// Resolves a configuration that doesn't use `extends`.
    pub fn from_value(raw: Value) -> Result<Self, ConfigError> {
        Self::resolve(Some(raw), &ConfigOverrides::default(), &NoConfigSource)
    }

    fn from_user_config(
        user: UserConfig,
        extends: Vec<String>,
        overrides: &ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut connector = match user.connector {
            Some(ConnectorSetting::Name(name)) => ConnectorConfig::new(name),
            Some(ConnectorSetting::Config(config)) => config,
            None => return Err(ConfigError::shape("A connector is required")),
        };
        if connector.name.is_empty() {
            return Err(ConfigError::shape("The connector needs a name"));
        }
        if !connector.options.is_object() {
            connector.options = empty_object();
        }
        if let (Some(watch), Value::Object(options)) = (overrides.watch, &mut connector.options) {
            options.insert("watch".to_string(), Value::Bool(watch));
        }

        let rules = normalize_rules(&user.rules)?;
        let ignored_urls = IgnoredUrls::compile(&user.ignored_urls)?;

        let rules_timeout = match (overrides.rules_timeout, user.rules_timeout) {
            (Some(timeout), _) if !timeout.is_zero() => timeout,
            (_, Some(ms)) if ms > 0 => Duration::from_millis(ms),
            _ => DEFAULT_RULES_TIMEOUT,
        };

        let formatters = overrides.formatters.clone().unwrap_or(user.formatters);

        let browserslist = if user.browserslist.is_empty() {
            vec!["defaults".to_string()]
        } else {
            user.browserslist
        };

        Ok(Self {
            connector,
            parsers: user.parsers,
            formatters,
            rules,
            extends,
            ignored_urls,
            browserslist,
            rules_timeout,
        })
    }

    /// Looks a rule up by name.
    pub fn rule(&self, name: &str) -> Option<&RuleConfig> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    /// Rules that aren't `off`, in configuration order.
    pub fn enabled_rules(&self) -> impl Iterator<Item = &RuleConfig> {
        self.rules.iter().filter(|rule| rule.severity.is_enabled())
    }

    /// Validates every rule's options against the schema its plugin declares.
    ///
    /// Returns every offending rule at once.
    pub fn validate_rule_options(&self, plugins: &PluginSet) -> Result<(), ConfigError> {
        let mut invalid = Vec::new();

        for rule in &self.rules {
            if rule.options.is_null() {
                continue;
            }
            let Some(descriptor) = plugins.rule(&rule.name) else {
                continue;
            };
            let Some(schema) = descriptor.meta.schema.as_ref() else {
                continue;
            };

            let valid = match jsonschema::validator_for(schema) {
                Ok(validator) => {
                    let errors: Vec<String> = validator
                        .iter_errors(&rule.options)
                        .map(|e| format!("{} at {}", e, e.instance_path()))
                        .collect();
                    for error in &errors {
                        warn!("Invalid options for rule '{}': {}", rule.name, error);
                    }
                    errors.is_empty()
                }
                Err(e) => {
                    warn!("Rule '{}' declares an invalid schema: {}", rule.name, e);
                    false
                }
            };

            if !valid {
                invalid.push(rule.name.clone());
            }
        }

        if invalid.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::RuleOptionSchemaInvalid { rules: invalid })
        }
    }
}

/// Validates the raw shape of one configuration file.
pub fn validate_shape(value: &Value) -> Result<(), ConfigError> {
    let schema = CONFIG_SCHEMA.get_or_init(|| {
        let schema_json: Value =
            serde_json::from_str(SCHEMA_JSON).expect("Invalid embedded config schema");
        Validator::new(&schema_json).expect("Invalid config schema compilation")
    });

    if let Err(e) = schema.validate(value) {
        return Err(ConfigError::shape(format!(
            "Config validation failed: {} at {}",
            e,
            e.instance_path()
        )));
    }

    Ok(())
}

fn extends_of(value: &Value) -> Vec<String> {
    value
        .get("extends")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Inlines `extends` recursively. `stack` holds the packages currently being
/// composed; `visited` collects every package seen.
fn compose(
    value: Value,
    source: &dyn ConfigSource,
    stack: &mut Vec<String>,
    visited: &mut Vec<String>,
) -> Result<Value, ConfigError> {
    let extends = extends_of(&value);
    if extends.is_empty() {
        return Ok(value);
    }

    let mut layers = Vec::with_capacity(extends.len() + 1);
    for name in extends {
        if stack.contains(&name) {
            let mut chain = stack.clone();
            chain.push(name);
            return Err(ConfigError::CircularExtends { chain });
        }

        debug!("Loading configuration package '{}'", name);
        let loaded =
            source
                .load_configuration(&name)
                .ok_or_else(|| ConfigError::ExtendsNotFound {
                    name: name.clone(),
                    reason: "not found".to_string(),
                })?;

        validate_shape(&loaded).map_err(|e| ConfigError::ExtendsNotFound {
            name: name.clone(),
            reason: format!("not a valid configuration ({})", e),
        })?;

        if !visited.contains(&name) {
            visited.push(name.clone());
        }
        stack.push(name);
        let composed = compose(loaded, source, stack, visited)?;
        stack.pop();

        layers.push(composed);
    }
    layers.push(value);

    Ok(merge_all(layers))
}
