//! `tsconfig.json` parser.
//!
//! Watches fetched resources for a `tsconfig.json`, parses it and validates
//! it against the embedded schema. Emits:
//!
//! - `parse::typescript-config` with `{ config }` when it is valid,
//! - `invalid-json::typescript-config` with `{ error }` when it isn't JSON,
//! - `invalid-schema::typescript-config` with `{ config, errors }` when it
//!   doesn't match the schema (every subscriber awaited concurrently),
//! - `notfound::typescript-config` on `scan::end` if none was fetched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use pagehint_plugin::event::{FETCH_END, SCAN_END, SCAN_START, TARGETFETCH_END};
use pagehint_plugin::{Event, HandlerMap, ParserContext, ParserFactory, PluginError};

pub const PARSE: &str = "parse::typescript-config";
pub const INVALID_JSON: &str = "invalid-json::typescript-config";
pub const INVALID_SCHEMA: &str = "invalid-schema::typescript-config";
pub const NOT_FOUND: &str = "notfound::typescript-config";

const FILE_NAME: &str = "tsconfig.json";

// Embed the schema
const SCHEMA_JSON: &str = include_str!("../../../../schemas/v1/tsconfig.json");
static TSCONFIG_SCHEMA: OnceLock<Validator> = OnceLock::new();

/// One schema violation, as carried by `invalid-schema::typescript-config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaError {
    /// JSON pointer to the offending value (empty for the document root).
    pub path: String,
    pub message: String,
}

fn schema() -> &'static Validator {
    TSCONFIG_SCHEMA.get_or_init(|| {
        let schema_json: Value =
            serde_json::from_str(SCHEMA_JSON).expect("Invalid embedded tsconfig schema");
        Validator::new(&schema_json).expect("Invalid tsconfig schema compilation")
    })
}

/// Validates a parsed `tsconfig.json`.
pub fn schema_errors(config: &Value) -> Vec<SchemaError> {
    schema()
        .iter_errors(config)
        .map(|e| SchemaError {
            path: e.instance_path().to_string(),
            message: e.to_string(),
        })
        .collect()
}

/// Returns whether `resource` points at a `tsconfig.json`.
pub fn is_typescript_config(resource: &str) -> bool {
    let path = resource.split(['?', '#']).next().unwrap_or(resource);
    path.rsplit('/').next() == Some(FILE_NAME)
}

/// Factory for the `typescript-config` parser.
#[derive(Debug, Default, Clone, Copy)]
pub struct TypeScriptConfigParser;

impl ParserFactory for TypeScriptConfigParser {
    fn emits(&self) -> Vec<String> {
        [PARSE, INVALID_JSON, INVALID_SCHEMA, NOT_FOUND]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn create(&self, context: ParserContext) -> HandlerMap {
        let found = Arc::new(AtomicBool::new(false));

        let on_fetch = {
            let context = context.clone();
            let found = found.clone();
            move |event: Arc<Event>| {
                let context = context.clone();
                let found = found.clone();
                async move { parse(&context, &found, &event).await }
            }
        };

        let on_start = {
            let found = found.clone();
            move |_: Arc<Event>| {
                found.store(false, Ordering::Relaxed);
                async { Ok::<(), PluginError>(()) }
            }
        };

        let on_end = move |event: Arc<Event>| {
            let context = context.clone();
            let found = found.clone();
            async move {
                if !found.load(Ordering::Relaxed) {
                    debug!("No {} found for {}", FILE_NAME, event.resource());
                    context
                        .emit(Event::data(NOT_FOUND, event.resource(), Value::Null))
                        .await;
                }
                Ok::<(), PluginError>(())
            }
        };

        HandlerMap::new()
            .on(SCAN_START, on_start)
            .on(FETCH_END, on_fetch.clone())
            .on(TARGETFETCH_END, on_fetch)
            .on(SCAN_END, on_end)
    }
}

async fn parse(
    context: &ParserContext,
    found: &AtomicBool,
    event: &Event,
) -> Result<(), PluginError> {
    let Some(fetch) = event.fetch_end() else {
        return Ok(());
    };
    if !is_typescript_config(&fetch.resource) {
        return Ok(());
    }

    found.store(true, Ordering::Relaxed);
    let resource = fetch.resource.as_str();
    debug!("Parsing {}", resource);

    let config: Value = match serde_json::from_str(&fetch.response.body.content) {
        Ok(config) => config,
        Err(e) => {
            context
                .emit(Event::data(
                    INVALID_JSON,
                    resource,
                    json!({ "error": e.to_string() }),
                ))
                .await;
            return Ok(());
        }
    };

    let errors = schema_errors(&config);
    if !errors.is_empty() {
        debug!("{} has {} schema errors", resource, errors.len());
        let payload = json!({ "config": config, "errors": errors });
        context
            .emit_async(Event::data(INVALID_SCHEMA, resource, payload))
            .await;
        return Ok(());
    }

    context
        .emit(Event::data(PARSE, resource, json!({ "config": config })))
        .await;
    Ok(())
}
