//! Builtin formatters.

mod json;
mod summary;

pub use json::JsonFormatter;
pub use summary::SummaryFormatter;
