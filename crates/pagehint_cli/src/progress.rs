//! Lifecycle progress messages, logged at debug level.

use std::sync::Arc;

use pagehint_core::AnyListener;
use pagehint_plugin::event::{
    SCAN_END, SCAN_START, TARGETFETCH_END, TARGETFETCH_START, TRAVERSE_END, TRAVERSE_START,
    matches,
};
use pagehint_plugin::Event;
use tracing::debug;

/// Message for a lifecycle event, if it has one.
pub fn message(event: &Event) -> Option<String> {
    let name = event.name();
    let resource = event.resource();
    let message = if matches(SCAN_START, name) {
        format!("Analyzing {}", resource)
    } else if matches(TARGETFETCH_START, name) {
        format!("Downloading {}", resource)
    } else if matches(TARGETFETCH_END, name) {
        format!("{} downloaded", resource)
    } else if matches(TRAVERSE_START, name) {
        "Traversing the DOM".to_string()
    } else if matches(TRAVERSE_END, name) {
        "Traversing finished".to_string()
    } else if matches(SCAN_END, name) {
        "Finishing...".to_string()
    } else {
        return None;
    };
    Some(message)
}

/// Listener to install with `Engine::prepend_any`.
pub fn listener() -> AnyListener {
    Arc::new(|event: &Event| {
        if let Some(message) = message(event) {
            debug!("{}", message);
        }
    })
}
