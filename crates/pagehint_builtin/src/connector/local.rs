//! Connector analyzing files on disk.
//!
//! The first file is delivered as the target (`targetfetch::*`), every other
//! file as a sub-resource (`fetch::*`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use pagehint_plugin::event::{
    FETCH_END, FETCH_ERROR, FETCH_START, SCAN_END, SCAN_START, TARGETFETCH_END, TARGETFETCH_START,
};
use pagehint_plugin::{
    Connector, ConnectorFactory, Emitter, Event, FetchEnd, FetchError, FetchStart, PluginError,
    Response, ResponseBody, Url,
};

/// Options accepted by the `local` connector.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LocalOptions {
    /// Glob patterns (matched against file names and relative paths) to skip.
    pub ignore: Vec<String>,
    /// Accepted for compatibility; files are analyzed once.
    pub watch: bool,
}

/// Resource kind derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Html,
    Script,
    Css,
    Json,
    Image,
    Unknown,
}

impl ResourceKind {
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "html" | "htm" => ResourceKind::Html,
            "js" | "mjs" | "cjs" => ResourceKind::Script,
            "css" => ResourceKind::Css,
            "json" | "webmanifest" => ResourceKind::Json,
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "ico" | "avif" => ResourceKind::Image,
            _ => ResourceKind::Unknown,
        }
    }

    /// Last segment of the `fetch::end::<kind>` event.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Html => "html",
            ResourceKind::Script => "script",
            ResourceKind::Css => "css",
            ResourceKind::Json => "json",
            ResourceKind::Image => "image",
            ResourceKind::Unknown => "unknown",
        }
    }

    fn media_type(&self, path: &Path) -> &'static str {
        match self {
            ResourceKind::Html => "text/html",
            ResourceKind::Script => "text/javascript",
            ResourceKind::Css => "text/css",
            ResourceKind::Json => "application/json",
            ResourceKind::Image => match path.extension().and_then(|ext| ext.to_str()) {
                Some("svg") => "image/svg+xml",
                Some("png") => "image/png",
                Some("gif") => "image/gif",
                Some("webp") => "image/webp",
                _ => "image/*",
            },
            ResourceKind::Unknown => "application/octet-stream",
        }
    }

    /// Images are binary except SVG.
    fn is_text(&self, path: &Path) -> bool {
        *self != ResourceKind::Image || path.extension().is_some_and(|ext| ext == "svg")
    }
}

/// Creates [`LocalConnector`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalConnectorFactory;

impl ConnectorFactory for LocalConnectorFactory {
    fn create(&self, options: &serde_json::Value) -> Result<Box<dyn Connector>, PluginError> {
        let options: LocalOptions = serde_json::from_value(options.clone())
            .map_err(|e| PluginError::invalid_options(format!("local connector: {}", e)))?;
        Ok(Box::new(LocalConnector::new(options)?))
    }
}

/// Walks `file:` targets and emits one fetch per file.
#[derive(Debug)]
pub struct LocalConnector {
    ignore: GlobSet,
}

impl LocalConnector {
    pub fn new(options: LocalOptions) -> Result<Self, PluginError> {
        if options.watch {
            warn!("The local connector doesn't support watch mode; analyzing once");
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in &options.ignore {
            let glob = Glob::new(pattern).map_err(|e| {
                PluginError::invalid_options(format!("invalid ignore pattern '{}': {}", pattern, e))
            })?;
            builder.add(glob);
        }
        let ignore = builder
            .build()
            .map_err(|e| PluginError::invalid_options(e.to_string()))?;

        Ok(Self { ignore })
    }

    /// Files under `root` in a stable order, ignored ones excluded.
    fn discover(&self, root: &Path) -> Vec<PathBuf> {
        if root.is_file() {
            return vec![root.to_path_buf()];
        }

        WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| !self.is_ignored(root, path))
            .collect()
    }

    fn is_ignored(&self, root: &Path, path: &Path) -> bool {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let ignored = self.ignore.is_match(relative)
            || path
                .file_name()
                .is_some_and(|name| self.ignore.is_match(Path::new(name)));
        if ignored {
            debug!("Ignoring {}", path.display());
        }
        ignored
    }

    async fn fetch(&self, path: &Path, is_target: bool, emitter: &Arc<dyn Emitter>) {
        let Ok(url) = Url::from_file_path(path) else {
            warn!("Can't build a URL for {}", path.display());
            return;
        };
        let resource = url.to_string();
        let kind = ResourceKind::from_path(path);

        let (start, end) = if is_target {
            (TARGETFETCH_START.to_string(), TARGETFETCH_END.to_string())
        } else {
            (
                FETCH_START.to_string(),
                format!("{}::{}", FETCH_END, kind.as_str()),
            )
        };

        emitter
            .emit(Event::new(
                start,
                FetchStart {
                    resource: resource.clone(),
                },
            ))
            .await;

        let content = match tokio::fs::read(path).await {
            Ok(bytes) if kind.is_text(path) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(_) => String::new(),
            Err(e) => {
                debug!("Failed to read {}: {}", path.display(), e);
                emitter
                    .emit(Event::new(
                        FETCH_ERROR,
                        FetchError {
                            resource,
                            error: e.to_string(),
                        },
                    ))
                    .await;
                return;
            }
        };

        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            kind.media_type(path).to_string(),
        );
        headers.insert("content-length".to_string(), content.len().to_string());

        emitter
            .emit(Event::new(
                end,
                FetchEnd {
                    resource,
                    response: Response {
                        status_code: 200,
                        headers,
                        body: ResponseBody { content },
                    },
                },
            ))
            .await;
    }
}

/// File names treated as the target document of a directory.
const INDEX_FILES: &[&str] = &["index.html", "index.htm"];

/// Moves the directory's index document to the front, if it has one.
fn target_first(root: &Path, mut files: Vec<PathBuf>) -> Vec<PathBuf> {
    let index = INDEX_FILES.iter().find_map(|name| {
        let candidate = root.join(name);
        files.iter().position(|path| *path == candidate)
    });
    if let Some(index) = index {
        let target = files.remove(index);
        files.insert(0, target);
    }
    files
}

#[async_trait]
impl Connector for LocalConnector {
    async fn collect(
        &mut self,
        target: &Url,
        emitter: Arc<dyn Emitter>,
    ) -> Result<(), PluginError> {
        let root = target
            .to_file_path()
            .map_err(|_| PluginError::connector(format!("{} is not a local file URL", target)))?;
        if !root.exists() {
            return Err(PluginError::connector(format!(
                "{} doesn't exist",
                root.display()
            )));
        }

        emitter.emit(Event::scan(SCAN_START, target.as_str())).await;

        let files = target_first(&root, self.discover(&root));
        debug!("Found {} files under {}", files.len(), root.display());

        for (index, path) in files.iter().enumerate() {
            self.fetch(path, index == 0, &emitter).await;
        }

        emitter.emit(Event::scan(SCAN_END, target.as_str())).await;
        Ok(())
    }
}
