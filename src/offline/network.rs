/// The fetch seam: anything that turns a `Request` into a `Response`
///
/// The offline cache sits on top of a `Fetch` (the network) and is itself a
/// `Fetch`, so page-side code (the image pipeline) can go through it
/// transparently.
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::http::{Method, Request, Response};
use crate::error::NetworkError;

#[async_trait]
pub trait Fetch: Send + Sync {
    /// `Err` means no response at all (offline, connection refused);
    /// HTTP error statuses are `Ok` responses.
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// A network that is always down
#[derive(Debug, Clone, Copy, Default)]
pub struct Unreachable;

#[async_trait]
impl Fetch for Unreachable {
    async fn fetch(&self, _request: &Request) -> Result<Response, NetworkError> {
        Err(NetworkError::Offline)
    }
}

/// Origin that serves a static site from a local directory
///
/// Only the request path is used; `/` and directory paths map to
/// `index.html`.
#[derive(Debug, Clone)]
pub struct SiteDirectory {
    root: PathBuf,
}

impl SiteDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a URL path to a file under the root; `None` for escaping paths
    fn file_for(&self, url_path: &str) -> Option<PathBuf> {
        let decoded = percent_encoding::percent_decode_str(url_path)
            .decode_utf8()
            .ok()?;
        let mut path = self.root.clone();
        for component in Path::new(decoded.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        if decoded.is_empty() || decoded.ends_with('/') {
            path.push("index.html");
        }
        Some(path)
    }
}

#[async_trait]
impl Fetch for SiteDirectory {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        if !request.method.is_safe() {
            return Ok(Response::new(405).with_header("allow", "GET, HEAD"));
        }

        let Some(path) = self.file_for(request.path()) else {
            return Ok(Response::new(404));
        };

        let path = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => path.join("index.html"),
            _ => path,
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!("📄 Served {} from {}", request.url, path.display());
                let response = Response::new(200).with_header("content-type", content_type_for(&path));
                if request.method == Method::Head {
                    Ok(response)
                } else {
                    Ok(response.with_body(bytes))
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Response::new(404)),
            Err(err) => Err(NetworkError::Failed {
                url: request.url.to_string(),
                reason: err.to_string(),
            }),
        }
    }
}

/// Content type by file extension
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
