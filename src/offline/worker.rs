/// The offline cache worker: install, activate, fetch, background sync
///
/// It runs beside the page, shares nothing with it, and answers every
/// request through the routing table. Only lifecycle operations return
/// errors; `handle_fetch` always produces a response.
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

use super::http::{resolve, Request, Response};
use super::manifest::StaticManifest;
use super::network::Fetch;
use super::push::Notification;
use super::routing::RouteTable;
use super::storage::{CacheStorage, QueuedRequest};
use super::strategy::{Outcome, StrategyContext};
use crate::config::{CacheConfig, PartitionNames};
use crate::error::{CacheError, NetworkError};

/// Result of a successful install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub cached: usize,
}

/// Result of a background sync round
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncReport {
    /// The tag was not ours; nothing ran
    pub skipped: bool,
    pub replayed: usize,
    pub still_queued: usize,
}

pub struct OfflineCache {
    scope: Url,
    config: CacheConfig,
    partitions: PartitionNames,
    manifest: StaticManifest,
    routes: RouteTable,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Fetch>,
}

impl OfflineCache {
    /// Build a worker for `scope` using the manifest listed in `config`
    pub fn new(
        scope: Url,
        config: CacheConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Fetch>,
    ) -> Self {
        let manifest = StaticManifest::new(&config.static_assets);
        let routes = RouteTable::standard(&scope, &config.api_prefix, &manifest);
        Self {
            scope,
            partitions: config.partitions(),
            config,
            manifest,
            routes,
            storage,
            network,
        }
    }

    /// Replace the static manifest (and the static route with it)
    pub fn with_manifest(mut self, manifest: StaticManifest) -> Self {
        self.routes = RouteTable::standard(&self.scope, &self.config.api_prefix, &manifest);
        self.manifest = manifest;
        self
    }

    /// Replace the routing table wholesale
    pub fn with_routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn partitions(&self) -> &PartitionNames {
        &self.partitions
    }

    pub fn manifest(&self) -> &StaticManifest {
        &self.manifest
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Pre-populate the static partition and open the other two.
    ///
    /// All or nothing: if any manifest entry cannot be fetched with a
    /// success status, or the batch cannot be stored, nothing is kept and
    /// the install fails.
    pub async fn install(&self) -> Result<InstallReport, CacheError> {
        info!("📦 Installing {} static assets", self.manifest.len());

        let mut fetched = Vec::with_capacity(self.manifest.len());
        for path in self.manifest.paths() {
            let url = resolve(&self.scope, path).map_err(|e| CacheError::Install {
                url: path.clone(),
                reason: e.to_string(),
            })?;
            let request = Request::get(url);
            let response = self
                .network
                .fetch(&request)
                .await
                .map_err(|e| CacheError::Install {
                    url: request.url.to_string(),
                    reason: e.to_string(),
                })?;
            if !response.ok() {
                return Err(CacheError::Install {
                    url: request.url.to_string(),
                    reason: format!("status {}", response.status),
                });
            }
            fetched.push((request, response));
        }

        self.storage.put_all(&self.partitions.static_name, &fetched)?;
        self.storage.open(&self.partitions.dynamic_name)?;
        self.storage.open(&self.partitions.api_name)?;

        info!("✅ Installed {} static assets", fetched.len());
        Ok(InstallReport {
            cached: fetched.len(),
        })
    }

    /// Delete every partition that does not belong to this generation.
    /// Returns the names that were deleted.
    pub fn activate(&self) -> Result<Vec<String>, CacheError> {
        let mut deleted = Vec::new();
        for name in self.storage.list_partitions()? {
            if self.partitions.contains(&name) {
                continue;
            }
            if self.storage.delete_partition(&name)? {
                info!("🧹 Deleted stale cache partition {}", name);
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    pub fn list_partitions(&self) -> Result<Vec<String>, CacheError> {
        self.storage.list_partitions()
    }

    /// Answer a request, reporting where the answer came from
    pub async fn respond(&self, request: &Request) -> Outcome {
        let route = self.routes.resolve(request);
        debug!("{} -> {} ({:?})", request.key(), route.name, route.strategy);
        let ctx = StrategyContext {
            storage: self.storage.as_ref(),
            network: self.network.as_ref(),
            partitions: &self.partitions,
        };
        ctx.run(route.strategy, request).await
    }

    /// Answer a request; never fails
    pub async fn handle_fetch(&self, request: &Request) -> Response {
        self.respond(request).await.response
    }

    /// Replay queued write requests from the api partition.
    ///
    /// Replayed requests that succeed are removed; the rest stay queued
    /// for the next trigger. A failed removal is logged and the round
    /// goes on.
    pub async fn sync(&self, tag: &str) -> Result<SyncReport, CacheError> {
        if tag != self.config.sync_tag {
            debug!("Ignoring sync tag {:?}", tag);
            return Ok(SyncReport {
                skipped: true,
                ..SyncReport::default()
            });
        }

        let partition = &self.partitions.api_name;
        let mut report = SyncReport::default();
        for QueuedRequest { id, request } in self.storage.queued(partition)? {
            match self.network.fetch(&request).await {
                Ok(response) if response.ok() => {
                    if let Err(err) = self.storage.dequeue(partition, id) {
                        warn!("⚠️  Could not dequeue {} (#{}): {}", request.key(), id, err);
                    }
                    report.replayed += 1;
                }
                Ok(response) => {
                    warn!("⚠️  Replay of {} answered {}", request.key(), response.status);
                    report.still_queued += 1;
                }
                Err(err) => {
                    error!("Failed to sync request {}: {}", request.key(), err);
                    report.still_queued += 1;
                }
            }
        }

        info!(
            "🔄 Sync complete: {} replayed, {} still queued",
            report.replayed, report.still_queued
        );
        Ok(report)
    }

    /// Decorate a push payload as a notification
    pub fn push(&self, payload: &str) -> Notification {
        Notification::from_push(&self.config.notification, payload, Utc::now())
    }

    /// Close the notification and return the URL to open, if any
    pub fn notification_click(&self, notification: &mut Notification, action: Option<&str>) -> Option<Url> {
        let target = notification.click(&self.config.notification, action)?;
        match resolve(&self.scope, target) {
            Ok(url) => Some(url),
            Err(err) => {
                warn!("⚠️  Notification target {:?} is invalid: {}", target, err);
                None
            }
        }
    }
}

#[async_trait]
impl Fetch for OfflineCache {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        Ok(self.handle_fetch(request).await)
    }
}

impl std::fmt::Debug for OfflineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineCache")
            .field("scope", &self.scope.as_str())
            .field("partitions", &self.partitions)
            .field("manifest", &self.manifest.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::storage::MemoryStorage;
    use crate::offline::strategy::{Served, OFFLINE_MESSAGE};
    use crate::testing::{FailingStorage, ScriptedNetwork};

    const ORIGIN: &str = "https://studio.example";

    fn scope() -> Url {
        Url::parse(ORIGIN).unwrap()
    }

    fn config() -> CacheConfig {
        CacheConfig {
            static_assets: vec!["/".to_string(), "/css/site.css".to_string()],
            ..CacheConfig::default()
        }
    }

    fn site_network() -> Arc<ScriptedNetwork> {
        let network = Arc::new(ScriptedNetwork::new());
        network.respond(&format!("{ORIGIN}/"), Response::new(200).with_body("<h1>Studio</h1>"));
        network.respond(&format!("{ORIGIN}/css/site.css"), Response::new(200).with_body("body{}"));
        network
    }

    fn worker(storage: Arc<MemoryStorage>, network: Arc<ScriptedNetwork>) -> OfflineCache {
        OfflineCache::new(scope(), config(), storage, network)
    }

    fn get(path: &str) -> Request {
        Request::get(resolve(&scope(), path).unwrap())
    }

    #[tokio::test]
    async fn test_install_precaches_and_serves_offline() {
        let storage = Arc::new(MemoryStorage::new());
        let network = site_network();
        let cache = worker(storage.clone(), network.clone());

        assert_eq!(cache.install().await.unwrap(), InstallReport { cached: 2 });
        assert_eq!(
            cache.list_partitions().unwrap(),
            vec!["api-cache-v1", "dynamic-cache-v1", "static-cache-v1"]
        );

        network.set_offline(true);
        let outcome = cache.respond(&get("/css/site.css")).await;
        assert_eq!(outcome.served, Served::Cache("static-cache-v1".to_string()));
        assert_eq!(outcome.response.status, 200);
        assert_eq!(outcome.response.text(), "body{}");
    }

    #[tokio::test]
    async fn test_install_is_all_or_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(ScriptedNetwork::new());
        network.respond(&format!("{ORIGIN}/"), Response::new(200));
        let cache = worker(storage.clone(), network);

        let err = cache.install().await.unwrap_err();
        assert!(matches!(err, CacheError::Install { ref url, .. } if url.ends_with("/css/site.css")));
        assert!(storage.list_partitions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_activate_evicts_old_generations() {
        let storage = Arc::new(MemoryStorage::new());
        let network = site_network();

        let old = OfflineCache::new(
            scope(),
            CacheConfig {
                generation: "v0".to_string(),
                ..config()
            },
            storage.clone(),
            network.clone(),
        );
        old.install().await.unwrap();
        assert_eq!(network.count(&format!("{ORIGIN}/css/site.css")), 1);

        let current = worker(storage.clone(), network.clone());
        let deleted = current.activate().unwrap();
        assert_eq!(deleted, vec!["api-cache-v0", "dynamic-cache-v0", "static-cache-v0"]);
        assert!(current.list_partitions().unwrap().is_empty());

        let outcome = current.respond(&get("/css/site.css")).await;
        assert_eq!(outcome.served, Served::Network);
        assert_eq!(network.count(&format!("{ORIGIN}/css/site.css")), 2);

        current.install().await.unwrap();
        current.activate().unwrap();
        assert_eq!(
            current.list_partitions().unwrap(),
            vec!["api-cache-v1", "dynamic-cache-v1", "static-cache-v1"]
        );
    }

    #[tokio::test]
    async fn test_offline_api_without_cache_gets_payload() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(ScriptedNetwork::new());
        network.set_offline(true);
        let cache = worker(storage, network);

        let response = cache.handle_fetch(&get("/api/ai/recommendations")).await;
        assert_eq!(response.status, 503);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["error"], OFFLINE_MESSAGE);
        assert!(body["timestamp"].as_str().unwrap().parse::<chrono::DateTime<Utc>>().is_ok());
    }

    #[tokio::test]
    async fn test_sync_replays_queued_requests() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(ScriptedNetwork::new());
        let cache = worker(storage.clone(), network.clone());
        let chat_url = format!("{ORIGIN}/api/ai/chat");
        let book_url = format!("{ORIGIN}/api/ai/book");

        network.set_offline(true);
        cache
            .handle_fetch(&Request::post(Url::parse(&chat_url).unwrap(), "{}"))
            .await;
        cache
            .handle_fetch(&Request::post(Url::parse(&book_url).unwrap(), "{}"))
            .await;
        assert_eq!(storage.queued("api-cache-v1").unwrap().len(), 2);

        let still_offline = cache.sync("sync-api-requests").await.unwrap();
        assert_eq!(still_offline.still_queued, 2);

        network.set_offline(false);
        network.respond(&chat_url, Response::new(200));
        network.respond(&book_url, Response::new(500));
        let report = cache.sync("sync-api-requests").await.unwrap();
        assert_eq!(
            report,
            SyncReport {
                skipped: false,
                replayed: 1,
                still_queued: 1
            }
        );
        let remaining = storage.queued("api-cache-v1").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].request.url.as_str(), book_url);

        let other = cache.sync("some-other-tag").await.unwrap();
        assert!(other.skipped);
    }

    #[tokio::test]
    async fn test_sync_replays_every_submission_to_one_endpoint() {
        let storage = Arc::new(MemoryStorage::new());
        let network = Arc::new(ScriptedNetwork::new());
        let cache = worker(storage.clone(), network.clone());
        let chat_url = Url::parse(&format!("{ORIGIN}/api/ai/chat")).unwrap();

        network.set_offline(true);
        cache
            .handle_fetch(&Request::post(chat_url.clone(), r#"{"m":"first"}"#))
            .await;
        cache
            .handle_fetch(&Request::post(chat_url.clone(), r#"{"m":"second"}"#))
            .await;
        assert_eq!(storage.queued("api-cache-v1").unwrap().len(), 2);

        network.set_offline(false);
        network.respond(chat_url.as_str(), Response::new(200));
        let report = cache.sync("sync-api-requests").await.unwrap();
        assert_eq!(report.replayed, 2);
        assert_eq!(report.still_queued, 0);
        assert!(storage.queued("api-cache-v1").unwrap().is_empty());

        let replayed: Vec<_> = network
            .requests()
            .into_iter()
            .filter(|r| r.url == chat_url)
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .collect();
        assert_eq!(
            replayed,
            vec![
                r#"{"m":"first"}"#,
                r#"{"m":"second"}"#,
                r#"{"m":"first"}"#,
                r#"{"m":"second"}"#,
            ]
        );
    }

    #[tokio::test]
    async fn test_sync_keeps_going_when_dequeue_fails() {
        let storage = Arc::new(FailingStorage::new());
        let network = Arc::new(ScriptedNetwork::new());
        let cache = OfflineCache::new(scope(), config(), storage.clone(), network.clone());
        let chat_url = Url::parse(&format!("{ORIGIN}/api/ai/chat")).unwrap();
        let book_url = Url::parse(&format!("{ORIGIN}/api/ai/book")).unwrap();
        storage
            .enqueue("api-cache-v1", &Request::post(chat_url.clone(), "{}"))
            .unwrap();
        storage
            .enqueue("api-cache-v1", &Request::post(book_url.clone(), "{}"))
            .unwrap();

        network.respond(chat_url.as_str(), Response::new(200));
        network.respond(book_url.as_str(), Response::new(200));
        storage.set_fail_writes(true);
        let report = cache.sync("sync-api-requests").await.unwrap();

        assert_eq!(report.replayed, 2);
        assert_eq!(network.count(chat_url.as_str()), 1);
        assert_eq!(network.count(book_url.as_str()), 1);
        assert_eq!(storage.queued("api-cache-v1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_install_stores_nothing_when_storage_fails() {
        let storage = Arc::new(FailingStorage::new());
        storage.set_fail_writes(true);
        let network = site_network();
        let cache = OfflineCache::new(scope(), config(), storage.clone(), network);

        let err = cache.install().await.unwrap_err();
        assert!(matches!(err, CacheError::Sqlite(_)));
        assert!(storage.list_partitions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_notification_click_routes_to_anchor() {
        let cache = worker(Arc::new(MemoryStorage::new()), Arc::new(ScriptedNetwork::new()));
        let mut notification = cache.push("New gown styles are in");
        assert_eq!(notification.title, "AI Assistant Update");

        let target = cache.notification_click(&mut notification, Some("explore"));
        assert_eq!(target.unwrap().as_str(), "https://studio.example/#ai-consultant");
        assert!(notification.is_closed());
    }

    #[tokio::test]
    async fn test_worker_is_a_fetch_path() {
        let storage = Arc::new(MemoryStorage::new());
        let network = site_network();
        let cache: Arc<dyn Fetch> = Arc::new(worker(storage, network));
        let response = cache.fetch(&get("/")).await.unwrap();
        assert_eq!(response.text(), "<h1>Studio</h1>");
    }
}
