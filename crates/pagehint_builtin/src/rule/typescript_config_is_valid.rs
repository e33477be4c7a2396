//! `typescript-config-is-valid`: reports a `tsconfig.json` that isn't valid
//! JSON or doesn't match the TypeScript configuration schema.

use std::sync::Arc;

use tracing::debug;

use pagehint_plugin::{
    Category, Event, HandlerMap, PluginError, RuleContext, RuleFactory, RuleMeta,
};

use crate::parser::typescript_config::{INVALID_JSON, INVALID_SCHEMA, SchemaError};

/// Groups schema errors by path, keeping the order paths first appear in.
pub fn group_by_path(errors: Vec<SchemaError>) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for error in errors {
        match groups.iter_mut().find(|(path, _)| *path == error.path) {
            Some((_, messages)) => messages.push(error.message),
            None => groups.push((error.path, vec![error.message])),
        }
    }
    groups
}

fn describe(path: &str, messages: &[String]) -> String {
    if path.is_empty() {
        messages.join("; ")
    } else {
        format!("'{}': {}", path, messages.join("; "))
    }
}

fn invalid_json(context: &RuleContext, event: &Event) {
    debug!("Validating rule {}", context.id());
    let message = event
        .data_payload()
        .and_then(|data| data.get("error"))
        .and_then(|error| error.as_str())
        .unwrap_or("Invalid JSON");
    context.report(event.resource(), None, message);
}

fn invalid_schema(context: &RuleContext, event: &Event) -> Result<(), serde_json::Error> {
    debug!("Validating rule {}", context.id());
    let errors: Vec<SchemaError> = match event.data_payload().and_then(|data| data.get("errors")) {
        Some(errors) => serde_json::from_value(errors.clone())?,
        None => Vec::new(),
    };

    for (path, messages) in group_by_path(errors) {
        context.report(event.resource(), None, describe(&path, &messages));
    }
    Ok(())
}

/// Factory for `typescript-config-is-valid`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TypeScriptConfigIsValid;

impl RuleFactory for TypeScriptConfigIsValid {
    fn meta(&self) -> RuleMeta {
        RuleMeta::new(Category::Interoperability)
            .with_description(
                "Reports an invalid TypeScript configuration file (`tsconfig.json`)",
            )
            .with_recommended(false)
            .with_local_files(true)
    }

    fn create(&self, context: RuleContext) -> HandlerMap {
        let on_invalid_json = {
            let context = context.clone();
            move |event: Arc<Event>| {
                invalid_json(&context, &event);
                async { Ok::<(), PluginError>(()) }
            }
        };

        let on_invalid_schema = move |event: Arc<Event>| {
            let result = invalid_schema(&context, &event);
            async move { result.map_err(PluginError::from) }
        };

        HandlerMap::new()
            .on(INVALID_JSON, on_invalid_json)
            .on(INVALID_SCHEMA, on_invalid_schema)
    }
}
