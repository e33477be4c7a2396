//! Lifecycle events relayed by the engine.
//!
//! Event names are hierarchical, `::`-delimited strings. A subscription to
//! `fetch::end` also receives `fetch::end::script`, but a subscription to
//! `fetch::end::script` does not receive a plain `fetch::end`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Segment separator inside event names.
pub const SEPARATOR: &str = "::";

pub const SCAN_START: &str = "scan::start";
pub const SCAN_END: &str = "scan::end";
pub const FETCH_START: &str = "fetch::start";
pub const FETCH_END: &str = "fetch::end";
pub const FETCH_ERROR: &str = "fetch::error";
pub const TARGETFETCH_START: &str = "targetfetch::start";
pub const TARGETFETCH_END: &str = "targetfetch::end";
pub const TRAVERSE_START: &str = "traverse::start";
pub const TRAVERSE_DOWN: &str = "traverse::down";
pub const TRAVERSE_UP: &str = "traverse::up";
pub const TRAVERSE_END: &str = "traverse::end";

/// Root segments of the events a connector may emit.
pub const LIFECYCLE_ROOTS: &[&str] = &[
    "scan",
    "fetch",
    "targetfetch",
    "manifestfetch",
    "traverse",
    "element",
];

/// Returns every segment prefix of `name`, shortest first.
///
/// `"fetch::end::script"` yields `"fetch"`, `"fetch::end"` and
/// `"fetch::end::script"`.
pub fn segment_prefixes(name: &str) -> impl Iterator<Item = &str> {
    name.match_indices(SEPARATOR)
        .map(move |(idx, _)| &name[..idx])
        .chain(std::iter::once(name))
}

/// Returns whether a subscription to `subscription` receives `event_name`.
pub fn matches(subscription: &str, event_name: &str) -> bool {
    match event_name.strip_prefix(subscription) {
        Some("") => true,
        Some(rest) => rest.starts_with(SEPARATOR),
        None => false,
    }
}

/// Returns the first segment of an event name.
pub fn root(name: &str) -> &str {
    name.split(SEPARATOR).next().unwrap_or(name)
}

/// Returns whether every `::`-delimited segment of `name` is non-empty.
pub fn is_well_formed(name: &str) -> bool {
    !name.is_empty() && name.split(SEPARATOR).all(|segment| !segment.is_empty())
}

/// A named event with its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    name: String,
    payload: EventPayload,
}

impl Event {
    /// Creates a new event.
    pub fn new(name: impl Into<String>, payload: impl Into<EventPayload>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }

    /// Event carrying only a resource, used for `scan::*` and `traverse::*`.
    pub fn scan(name: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::new(
            name,
            ScanEvent {
                resource: resource.into(),
            },
        )
    }

    /// Derived event carrying arbitrary data, used by parsers.
    pub fn data(
        name: impl Into<String>,
        resource: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self::new(
            name,
            DataEvent {
                resource: resource.into(),
                data,
            },
        )
    }

    /// Returns the event name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the payload.
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Returns the resource the event is about.
    pub fn resource(&self) -> &str {
        self.payload.resource()
    }

    /// Returns the fetch result when this is a `fetch::end` style event.
    pub fn fetch_end(&self) -> Option<&FetchEnd> {
        match &self.payload {
            EventPayload::FetchEnd(fetch) => Some(fetch),
            _ => None,
        }
    }

    /// Returns the derived data when this is a parser event.
    pub fn data_payload(&self) -> Option<&serde_json::Value> {
        match &self.payload {
            EventPayload::Data(event) => Some(&event.data),
            _ => None,
        }
    }
}

/// Event payloads, one variant per event kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EventPayload {
    /// `scan::start`, `scan::end`.
    Scan(ScanEvent),
    /// `fetch::start`, `targetfetch::start`.
    FetchStart(FetchStart),
    /// `fetch::end::*`, `targetfetch::end`.
    FetchEnd(FetchEnd),
    /// `fetch::error`.
    FetchError(FetchError),
    /// `traverse::*`, `element::*`.
    Traverse(TraverseEvent),
    /// Events emitted by parsers.
    Data(DataEvent),
}

impl EventPayload {
    /// Returns the resource the payload is about.
    pub fn resource(&self) -> &str {
        match self {
            EventPayload::Scan(e) => &e.resource,
            EventPayload::FetchStart(e) => &e.resource,
            EventPayload::FetchEnd(e) => &e.resource,
            EventPayload::FetchError(e) => &e.resource,
            EventPayload::Traverse(e) => &e.resource,
            EventPayload::Data(e) => &e.resource,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub resource: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchStart {
    pub resource: String,
}

/// A fetched resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchEnd {
    /// URL of the fetched resource.
    pub resource: String,
    /// The response received for it.
    pub response: Response,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status_code: u16,
    /// Header names are stored lowercase.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: ResponseBody,
}

impl Response {
    /// Looks a header up by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseBody {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchError {
    pub resource: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraverseEvent {
    pub resource: String,
    /// Short description of the element being visited, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEvent {
    pub resource: String,
    pub data: serde_json::Value,
}

macro_rules! impl_into_payload {
    ($($ty:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for EventPayload {
                fn from(value: $ty) -> Self {
                    EventPayload::$variant(value)
                }
            }
        )*
    };
}

impl_into_payload! {
    ScanEvent => Scan,
    FetchStart => FetchStart,
    FetchEnd => FetchEnd,
    FetchError => FetchError,
    TraverseEvent => Traverse,
    DataEvent => Data,
}
