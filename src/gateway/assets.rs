//! Static content for the browser client.
//!
//! Request paths are checked component by component before the filesystem is
//! touched, and the resolved file must still lie under the canonical root.

use axum::http::header;
use axum::response::{IntoResponse, Response};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Entry page of the single-page client.
const INDEX_FILE: &str = "index.html";

/// A file read from the content root.
#[derive(Debug)]
pub struct Asset {
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl IntoResponse for Asset {
    fn into_response(self) -> Response {
        ([(header::CONTENT_TYPE, self.content_type)], self.bytes).into_response()
    }
}

/// Map a request path to a path relative to the content root.
///
/// Client routes (`/`, `/index.html`, `/app...`) map to the entry page.
/// Returns `None` for anything that could leave the root: `..`, absolute
/// components, drive prefixes.
pub fn sanitize(request_path: &str) -> Option<PathBuf> {
    if request_path == "/" || request_path == "/index.html" || request_path.starts_with("/app") {
        return Some(PathBuf::from(INDEX_FILE));
    }

    let trimmed = request_path.trim_start_matches('/');
    // A backslash is a separator on Windows; refuse it everywhere.
    if trimmed.is_empty() || trimmed.contains('\\') {
        return None;
    }

    let mut relative = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

/// Resolve and read `request_path` under `root`.
///
/// Every failure yields `None` so the caller can fall through to its 404.
pub async fn locate(root: &Path, request_path: &str) -> Option<Asset> {
    let relative = match sanitize(request_path) {
        Some(relative) => relative,
        None => {
            debug!(path = request_path, "static path rejected");
            return None;
        }
    };

    let root = tokio::fs::canonicalize(root).await.ok()?;
    let candidate = tokio::fs::canonicalize(root.join(&relative)).await.ok()?;
    // Symlinks may still point outside.
    if !candidate.starts_with(&root) {
        debug!(path = request_path, "static path escapes content root");
        return None;
    }
    if !tokio::fs::metadata(&candidate).await.ok()?.is_file() {
        return None;
    }

    match tokio::fs::read(&candidate).await {
        Ok(bytes) => Some(Asset {
            content_type: content_type(&candidate),
            bytes,
        }),
        Err(e) => {
            debug!(file = %candidate.display(), error = %e, "cannot read static file");
            None
        }
    }
}

pub fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("js") | Some("mjs") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") | Some("map") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        _ => "application/octet-stream",
    }
}
