/// Error types for the image pipeline and the offline cache
///
/// Each concern has its own enum; `Error` folds them together for callers
/// that drive both components (the CLI, integration code).
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("invalid url {url:?}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Configuration could not be read or written
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid root margin {0:?}")]
    RootMargin(String),

    #[error("could not determine a {0} directory")]
    NoDirectory(&'static str),
}

/// A CSS selector could not be parsed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,

    #[error("invalid selector {selector:?} at {line}:{column}: {reason}")]
    Invalid {
        selector: String,
        line: u32,
        column: u32,
        reason: String,
    },
}

/// A single image load attempt failed
///
/// Network and decode failures count against the same retry budget.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageLoadError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server answered {0}")]
    Status(u16),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("invalid data uri: {0}")]
    DataUri(String),
}

/// The network (or origin) could not produce a response
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("network unreachable")]
    Offline,

    #[error("request to {url} failed: {reason}")]
    Failed { url: String, reason: String },
}

/// Cache storage or lifecycle failure
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored headers are not valid json: {0}")]
    Headers(#[from] serde_json::Error),

    #[error("stored url {0:?} is not valid")]
    StoredUrl(String),

    #[error("failed to create cache directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("install failed for {url}: {reason}")]
    Install { url: String, reason: String },
}
