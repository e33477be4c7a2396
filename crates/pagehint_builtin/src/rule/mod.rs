//! Builtin rules.

pub mod typescript_config_is_valid;

pub use typescript_config_is_valid::TypeScriptConfigIsValid;
