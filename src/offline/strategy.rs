/// The three fetch strategies and the synthesized offline responses
///
/// Every strategy settles with a `Response`. Cache reads that fail are
/// treated as misses and cache writes are best-effort; neither ever aborts
/// the response returned to the page.
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::http::{Request, Response};
use super::network::Fetch;
use super::routing::Strategy;
use super::storage::CacheStorage;
use crate::config::PartitionNames;

pub const OFFLINE_MESSAGE: &str = "You are offline. Please check your connection and try again.";

const SERVICE_UNAVAILABLE: u16 = 503;

/// Where a response came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Served {
    Cache(String),
    Network,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub response: Response,
    pub served: Served,
}

impl Outcome {
    fn cache(partition: &str, response: Response) -> Self {
        Self {
            response,
            served: Served::Cache(partition.to_string()),
        }
    }

    fn network(response: Response) -> Self {
        Self {
            response,
            served: Served::Network,
        }
    }

    fn offline(response: Response) -> Self {
        Self {
            response,
            served: Served::Offline,
        }
    }
}

/// What a strategy needs: storage, network and partition names
pub struct StrategyContext<'a> {
    pub storage: &'a dyn CacheStorage,
    pub network: &'a dyn Fetch,
    pub partitions: &'a PartitionNames,
}

impl StrategyContext<'_> {
    pub async fn run(&self, strategy: Strategy, request: &Request) -> Outcome {
        match strategy {
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::CacheThenNetwork => self.cache_then_network(request).await,
        }
    }

    /// Static assets: never revalidated once cached
    pub async fn cache_first(&self, request: &Request) -> Outcome {
        let partition = &self.partitions.static_name;
        if let Some(cached) = self.lookup(partition, request) {
            return Outcome::cache(partition, cached);
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    self.store(partition, request, &response);
                }
                Outcome::network(response)
            }
            Err(err) => {
                debug!("Static miss and network failed for {}: {}", request.url, err);
                Outcome::offline(offline_fallback(request))
            }
        }
    }

    /// API traffic: freshest answer wins, cache only when offline
    pub async fn network_first(&self, request: &Request) -> Outcome {
        let partition = &self.partitions.api_name;
        match self.network.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    self.store(partition, request, &response);
                }
                Outcome::network(response)
            }
            Err(err) => {
                debug!("Network failed for {}: {}", request.url, err);
                if let Some(cached) = self.lookup(partition, request) {
                    return Outcome::cache(partition, cached);
                }
                if !request.method.is_safe() {
                    self.queue(partition, request);
                }
                Outcome::offline(offline_api_response(Utc::now()))
            }
        }
    }

    /// Everything else: any cached copy, then the network
    pub async fn cache_then_network(&self, request: &Request) -> Outcome {
        for partition in [&self.partitions.static_name, &self.partitions.dynamic_name] {
            if let Some(cached) = self.lookup(partition, request) {
                return Outcome::cache(partition, cached);
            }
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    self.store(&self.partitions.dynamic_name, request, &response);
                }
                Outcome::network(response)
            }
            Err(err) => {
                debug!("Dynamic miss and network failed for {}: {}", request.url, err);
                Outcome::offline(offline_fallback(request))
            }
        }
    }

    /// Cached response; storage errors count as a miss.
    /// Only GET requests are ever answered from a partition.
    fn lookup(&self, partition: &str, request: &Request) -> Option<Response> {
        if !request.method.is_safe() {
            return None;
        }
        match self.storage.lookup(partition, request) {
            Ok(found) => found,
            Err(err) => {
                warn!("⚠️  Cache read failed in {} for {}: {}", partition, request.url, err);
                None
            }
        }
    }

    /// Best-effort write of a successful GET response
    fn store(&self, partition: &str, request: &Request, response: &Response) {
        if !request.method.is_safe() {
            return;
        }
        if let Err(err) = self.storage.put(partition, request, response) {
            warn!("⚠️  Cache write failed in {} for {}: {}", partition, request.url, err);
        }
    }

    /// Keep a failed write request for background resync
    fn queue(&self, partition: &str, request: &Request) {
        match self.storage.enqueue(partition, request) {
            Ok(id) => debug!("Queued {} for resync (#{})", request.key(), id),
            Err(err) => warn!("⚠️  Could not queue {}: {}", request.key(), err),
        }
    }
}

#[derive(Serialize)]
struct OfflinePayload<'a> {
    error: &'a str,
    timestamp: String,
}

/// 503 JSON body for API requests that cannot be answered
pub fn offline_api_response(now: DateTime<Utc>) -> Response {
    let payload = OfflinePayload {
        error: OFFLINE_MESSAGE,
        timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    // Serializing two strings cannot fail.
    let body = serde_json::to_vec(&payload).unwrap_or_default();
    Response::new(SERVICE_UNAVAILABLE)
        .with_header("content-type", "application/json")
        .with_body(body)
}

/// 503 inline HTML for navigations that cannot be answered
pub fn offline_document_response() -> Response {
    Response::new(SERVICE_UNAVAILABLE)
        .with_header("content-type", "text/html")
        .with_body(format!(r#"<div class="offline-message">{OFFLINE_MESSAGE}</div>"#))
}

/// 503 plain text for any other resource that cannot be answered
pub fn offline_text_response() -> Response {
    Response::new(SERVICE_UNAVAILABLE)
        .with_header("content-type", "text/plain; charset=utf-8")
        .with_body(OFFLINE_MESSAGE)
}

fn offline_fallback(request: &Request) -> Response {
    if request.is_document() {
        offline_document_response()
    } else {
        offline_text_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::http::resolve;
    use crate::offline::storage::MemoryStorage;
    use crate::testing::{FailingStorage, ScriptedNetwork};
    use url::Url;

    fn scope() -> Url {
        Url::parse("https://studio.example/").unwrap()
    }

    fn get(path: &str) -> Request {
        Request::get(resolve(&scope(), path).unwrap())
    }

    fn names() -> PartitionNames {
        PartitionNames::for_generation("v1")
    }

    #[tokio::test]
    async fn test_cache_first_fills_then_never_revalidates() {
        let storage = MemoryStorage::new();
        let network = ScriptedNetwork::new();
        let partitions = names();
        network.respond("https://studio.example/css/site.css", Response::new(200).with_body("v1"));
        let ctx = StrategyContext { storage: &storage, network: &network, partitions: &partitions };

        let first = ctx.cache_first(&get("/css/site.css")).await;
        assert_eq!(first.served, Served::Network);

        network.respond("https://studio.example/css/site.css", Response::new(200).with_body("v2"));
        let second = ctx.cache_first(&get("/css/site.css")).await;
        assert_eq!(second.served, Served::Cache("static-cache-v1".to_string()));
        assert_eq!(second.response.text(), "v1");
        assert_eq!(network.count("https://studio.example/css/site.css"), 1);
    }

    #[tokio::test]
    async fn test_error_statuses_are_returned_but_not_cached() {
        let storage = MemoryStorage::new();
        let network = ScriptedNetwork::new();
        let partitions = names();
        let ctx = StrategyContext { storage: &storage, network: &network, partitions: &partitions };

        let missing = ctx.cache_then_network(&get("/missing.png")).await;
        assert_eq!(missing.response.status, 404);
        assert_eq!(storage.lookup("dynamic-cache-v1", &get("/missing.png")).unwrap(), None);
    }

    #[tokio::test]
    async fn test_network_first_prefers_live_then_cache_then_payload() {
        let storage = MemoryStorage::new();
        let network = ScriptedNetwork::new();
        let partitions = names();
        let url = "https://studio.example/api/ai/styles";
        network.respond(url, Response::new(200).with_body(r#"["ballgown"]"#));
        let ctx = StrategyContext { storage: &storage, network: &network, partitions: &partitions };

        let live = ctx.network_first(&get("/api/ai/styles")).await;
        assert_eq!(live.served, Served::Network);

        network.set_offline(true);
        let cached = ctx.network_first(&get("/api/ai/styles")).await;
        assert_eq!(cached.served, Served::Cache("api-cache-v1".to_string()));
        assert_eq!(cached.response.text(), r#"["ballgown"]"#);

        let unknown = ctx.network_first(&get("/api/ai/other")).await;
        assert_eq!(unknown.served, Served::Offline);
        assert_eq!(unknown.response.status, 503);
    }

    #[tokio::test]
    async fn test_failed_writes_are_queued() {
        let storage = MemoryStorage::new();
        let network = ScriptedNetwork::new();
        network.set_offline(true);
        let partitions = names();
        let ctx = StrategyContext { storage: &storage, network: &network, partitions: &partitions };

        let chat = Request::post(resolve(&scope(), "/api/ai/chat").unwrap(), "{}");
        let outcome = ctx.network_first(&chat).await;
        assert_eq!(outcome.response.status, 503);
        let queued = storage.queued("api-cache-v1").unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].request, chat);
        assert!(storage.requests("api-cache-v1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_then_network_offline_fallbacks() {
        let storage = MemoryStorage::new();
        let network = ScriptedNetwork::new();
        network.set_offline(true);
        let partitions = names();
        let ctx = StrategyContext { storage: &storage, network: &network, partitions: &partitions };

        let page = get("/gallery.html").with_header("accept", "text/html");
        let outcome = ctx.cache_then_network(&page).await;
        assert_eq!(outcome.response.status, 503);
        assert_eq!(outcome.response.content_type(), Some("text/html"));
        assert!(outcome.response.text().contains("offline-message"));

        let script = ctx.cache_then_network(&get("/js/gallery.js")).await;
        assert_eq!(script.response.status, 503);
        assert_eq!(script.served, Served::Offline);
    }

    #[tokio::test]
    async fn test_cache_then_network_checks_static_before_dynamic() {
        let storage = MemoryStorage::new();
        let network = ScriptedNetwork::new();
        let partitions = names();
        let page = get("/about.html");
        storage
            .put("dynamic-cache-v1", &page, &Response::new(200).with_body("dynamic"))
            .unwrap();
        storage
            .put("static-cache-v1", &page, &Response::new(200).with_body("static"))
            .unwrap();
        let ctx = StrategyContext { storage: &storage, network: &network, partitions: &partitions };

        let outcome = ctx.cache_then_network(&page).await;
        assert_eq!(outcome.response.text(), "static");
        assert!(network.requests().is_empty());
    }

    #[tokio::test]
    async fn test_storage_failures_never_block_network_answers() {
        let storage = FailingStorage::broken();
        let network = ScriptedNetwork::new();
        let partitions = names();
        network.respond("https://studio.example/css/site.css", Response::new(200).with_body("body{}"));
        network.respond("https://studio.example/api/ai/styles", Response::new(200).with_body("[]"));
        network.respond("https://studio.example/gallery.html", Response::new(200).with_body("<h1>Gallery</h1>"));
        let ctx = StrategyContext { storage: &storage, network: &network, partitions: &partitions };

        let css = ctx.cache_first(&get("/css/site.css")).await;
        assert_eq!(css.served, Served::Network);
        assert_eq!(css.response.status, 200);
        assert_eq!(css.response.text(), "body{}");

        let api = ctx.network_first(&get("/api/ai/styles")).await;
        assert_eq!(api.served, Served::Network);
        assert_eq!(api.response.status, 200);

        let page = ctx.cache_then_network(&get("/gallery.html")).await;
        assert_eq!(page.served, Served::Network);
        assert_eq!(page.response.text(), "<h1>Gallery</h1>");

        // Nothing was written, so a second read still goes to the network
        ctx.cache_first(&get("/css/site.css")).await;
        assert_eq!(network.count("https://studio.example/css/site.css"), 2);
    }

    #[tokio::test]
    async fn test_storage_failures_offline_still_get_payloads() {
        let storage = FailingStorage::broken();
        let network = ScriptedNetwork::new();
        network.set_offline(true);
        let partitions = names();
        let ctx = StrategyContext { storage: &storage, network: &network, partitions: &partitions };

        let css = ctx.cache_first(&get("/css/site.css")).await;
        assert_eq!(css.served, Served::Offline);
        assert_eq!(css.response.status, 503);
        assert_eq!(css.response.text(), OFFLINE_MESSAGE);

        let api = ctx.network_first(&get("/api/ai/styles")).await;
        assert_eq!(api.served, Served::Offline);
        assert_eq!(api.response.status, 503);
        assert_eq!(api.response.content_type(), Some("application/json"));

        let chat = Request::post(resolve(&scope(), "/api/ai/chat").unwrap(), "{}");
        let queued = ctx.network_first(&chat).await;
        assert_eq!(queued.served, Served::Offline);
        assert_eq!(queued.response.status, 503);

        let page = get("/gallery.html").with_header("accept", "text/html");
        let document = ctx.cache_then_network(&page).await;
        assert_eq!(document.served, Served::Offline);
        assert_eq!(document.response.status, 503);
        assert_eq!(document.response.content_type(), Some("text/html"));
    }

    #[test]
    fn test_offline_api_payload_shape() {
        let now = "2026-06-01T10:30:00Z".parse::<DateTime<Utc>>().unwrap();
        let response = offline_api_response(now);
        assert_eq!(response.status, 503);
        assert_eq!(response.content_type(), Some("application/json"));

        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["error"], OFFLINE_MESSAGE);
        assert_eq!(body["timestamp"], "2026-06-01T10:30:00.000Z");
    }
}
