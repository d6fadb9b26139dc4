/// Offline asset cache
///
/// A worker that answers every outgoing request of the page:
/// - `http.rs` - request/response values
/// - `network.rs` - the fetch seam, site directory origin, unreachable network
/// - `storage.rs` / `sqlite.rs` - partitioned cache storage back-ends
/// - `manifest.rs` - static asset manifest
/// - `routing.rs` - request classification to strategy
/// - `strategy.rs` - cache-first, network-first, cache-then-network
/// - `worker.rs` - install, activate, fetch and background sync lifecycle
/// - `push.rs` - notification presentation

pub mod http;
pub mod manifest;
pub mod network;
pub mod push;
pub mod routing;
pub mod sqlite;
pub mod storage;
pub mod strategy;
pub mod worker;

pub use http::{Method, Request, Response};
pub use manifest::StaticManifest;
pub use network::{Fetch, SiteDirectory, Unreachable};
pub use routing::{RouteTable, Strategy};
pub use sqlite::SqliteStorage;
pub use storage::{CacheStorage, MemoryStorage, QueuedRequest};
pub use worker::{InstallReport, OfflineCache, SyncReport};
