//! Builtin connectors.

pub mod local;

pub use local::{LocalConnector, LocalConnectorFactory, LocalOptions, ResourceKind};
