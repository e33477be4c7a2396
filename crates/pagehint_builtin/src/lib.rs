//! # pagehint_builtin
//!
//! Plugins shipped with pagehint:
//!
//! | Kind | Name |
//! |------|------|
//! | connector | `local` |
//! | parser | `typescript-config` |
//! | rule | `typescript-config-is-valid` |
//! | formatter | `json`, `summary` |
//!
//! plus the `web-recommended` shareable configuration.

pub mod connector;
pub mod formatter;
pub mod parser;
pub mod rule;

use serde_json::{Value, json};

use pagehint_core::PluginPackage;

use crate::connector::LocalConnectorFactory;
use crate::formatter::{JsonFormatter, SummaryFormatter};
use crate::parser::TypeScriptConfigParser;
use crate::rule::TypeScriptConfigIsValid;

/// Name of the builtin package.
pub const PACKAGE_NAME: &str = "builtin";

/// Shareable configuration enabling every builtin plugin.
pub fn web_recommended() -> Value {
    json!({
        "connector": { "name": "local", "options": {} },
        "parsers": ["typescript-config"],
        "formatters": ["summary"],
        "rules": {
            "typescript-config-is-valid": "warning"
        }
    })
}

/// The builtin plugin package.
pub fn package() -> PluginPackage {
    PluginPackage::new(PACKAGE_NAME)
        .with_connector("local", LocalConnectorFactory)
        .with_parser("typescript-config", TypeScriptConfigParser)
        .with_rule("typescript-config-is-valid", TypeScriptConfigIsValid)
        .with_formatter("json", JsonFormatter)
        .with_formatter("summary", SummaryFormatter)
        .with_configuration("web-recommended", web_recommended())
}
