//! Builtin parsers.

pub mod typescript_config;

pub use typescript_config::TypeScriptConfigParser;
