/// Partitioned cache storage
///
/// A partition holds two things:
/// - cached responses, keyed by request identity (method + URL), where a
///   newer response replaces the older one
/// - a resync queue of failed write requests, where every enqueue is its
///   own entry even when method, URL and body repeat
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use super::http::{Request, RequestKey, Response};
use crate::error::CacheError;

/// Identity of a queued request within its partition
pub type QueueId = i64;

/// A request waiting for background resync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRequest {
    pub id: QueueId,
    pub request: Request,
}

/// Storage back-end for the offline cache
///
/// Writes to a partition that does not exist yet create it, like opening a
/// cache by name does.
pub trait CacheStorage: Send + Sync {
    /// Create the partition if it does not exist
    fn open(&self, partition: &str) -> Result<(), CacheError>;

    /// Names of every partition, sorted
    fn list_partitions(&self) -> Result<Vec<String>, CacheError>;

    /// Drop a partition with its responses and queue; `false` if it did
    /// not exist
    fn delete_partition(&self, partition: &str) -> Result<bool, CacheError>;

    /// Insert or overwrite the response for `request`'s identity
    fn put(&self, partition: &str, request: &Request, response: &Response) -> Result<(), CacheError>;

    /// Store every pair or none of them
    fn put_all(&self, partition: &str, entries: &[(Request, Response)]) -> Result<(), CacheError>;

    /// Stored response for `request`'s identity, if any
    fn lookup(&self, partition: &str, request: &Request) -> Result<Option<Response>, CacheError>;

    /// Every request with a stored response in the partition
    fn requests(&self, partition: &str) -> Result<Vec<Request>, CacheError>;

    /// Remove one response; `false` if it was not there
    fn delete(&self, partition: &str, request: &Request) -> Result<bool, CacheError>;

    /// Append `request` to the partition's resync queue
    fn enqueue(&self, partition: &str, request: &Request) -> Result<QueueId, CacheError>;

    /// Queued requests, oldest first
    fn queued(&self, partition: &str) -> Result<Vec<QueuedRequest>, CacheError>;

    /// Remove a queued request; `false` if it was already gone
    fn dequeue(&self, partition: &str, id: QueueId) -> Result<bool, CacheError>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    request: Request,
    response: Response,
}

#[derive(Debug, Default)]
struct Partition {
    entries: BTreeMap<RequestKey, CacheEntry>,
    queue: BTreeMap<QueueId, Request>,
}

/// Process-local storage, lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryStorage {
    partitions: Mutex<BTreeMap<String, Partition>>,
    last_queue_id: AtomicI64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStorage for MemoryStorage {
    fn open(&self, partition: &str) -> Result<(), CacheError> {
        self.partitions
            .lock()
            .entry(partition.to_string())
            .or_default();
        Ok(())
    }

    fn list_partitions(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.partitions.lock().keys().cloned().collect())
    }

    fn delete_partition(&self, partition: &str) -> Result<bool, CacheError> {
        Ok(self.partitions.lock().remove(partition).is_some())
    }

    fn put(&self, partition: &str, request: &Request, response: &Response) -> Result<(), CacheError> {
        self.partitions
            .lock()
            .entry(partition.to_string())
            .or_default()
            .entries
            .insert(
                request.key(),
                CacheEntry {
                    request: request.clone(),
                    response: response.clone(),
                },
            );
        Ok(())
    }

    fn put_all(&self, partition: &str, entries: &[(Request, Response)]) -> Result<(), CacheError> {
        let mut partitions = self.partitions.lock();
        let stored = &mut partitions.entry(partition.to_string()).or_default().entries;
        for (request, response) in entries {
            stored.insert(
                request.key(),
                CacheEntry {
                    request: request.clone(),
                    response: response.clone(),
                },
            );
        }
        Ok(())
    }

    fn lookup(&self, partition: &str, request: &Request) -> Result<Option<Response>, CacheError> {
        Ok(self
            .partitions
            .lock()
            .get(partition)
            .and_then(|p| p.entries.get(&request.key()))
            .map(|entry| entry.response.clone()))
    }

    fn requests(&self, partition: &str) -> Result<Vec<Request>, CacheError> {
        Ok(self
            .partitions
            .lock()
            .get(partition)
            .map(|p| p.entries.values().map(|e| e.request.clone()).collect())
            .unwrap_or_default())
    }

    fn delete(&self, partition: &str, request: &Request) -> Result<bool, CacheError> {
        Ok(self
            .partitions
            .lock()
            .get_mut(partition)
            .is_some_and(|p| p.entries.remove(&request.key()).is_some()))
    }

    fn enqueue(&self, partition: &str, request: &Request) -> Result<QueueId, CacheError> {
        let id = self.last_queue_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.partitions
            .lock()
            .entry(partition.to_string())
            .or_default()
            .queue
            .insert(id, request.clone());
        Ok(id)
    }

    fn queued(&self, partition: &str) -> Result<Vec<QueuedRequest>, CacheError> {
        Ok(self
            .partitions
            .lock()
            .get(partition)
            .map(|p| {
                p.queue
                    .iter()
                    .map(|(&id, request)| QueuedRequest {
                        id,
                        request: request.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn dequeue(&self, partition: &str, id: QueueId) -> Result<bool, CacheError> {
        Ok(self
            .partitions
            .lock()
            .get_mut(partition)
            .is_some_and(|p| p.queue.remove(&id).is_some()))
    }
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behaviour every `CacheStorage` must share; run against each back-end.

    use super::*;
    use url::Url;

    fn request(path: &str) -> Request {
        Request::get(Url::parse("https://studio.example/").unwrap().join(path).unwrap())
    }

    fn chat(body: &str) -> Request {
        Request::post(Url::parse("https://studio.example/api/ai/chat").unwrap(), body.to_string())
            .with_header("content-type", "application/json")
    }

    pub fn partitions_are_created_listed_and_deleted(storage: &dyn CacheStorage) {
        storage.open("static-cache-v1").unwrap();
        storage.open("dynamic-cache-v1").unwrap();
        storage.open("static-cache-v1").unwrap();
        assert_eq!(
            storage.list_partitions().unwrap(),
            vec!["dynamic-cache-v1".to_string(), "static-cache-v1".to_string()]
        );

        assert!(storage.delete_partition("dynamic-cache-v1").unwrap());
        assert!(!storage.delete_partition("dynamic-cache-v1").unwrap());
        assert_eq!(storage.list_partitions().unwrap(), vec!["static-cache-v1".to_string()]);
    }

    pub fn entries_are_overwritten_and_isolated(storage: &dyn CacheStorage) {
        let css = request("/css/site.css");
        let first = Response::new(200).with_body("a{}");
        let second = Response::new(200)
            .with_header("content-type", "text/css")
            .with_body("b{}");

        storage.put("static-cache-v1", &css, &first).unwrap();
        storage.put("static-cache-v1", &css, &second).unwrap();

        assert_eq!(storage.lookup("static-cache-v1", &css).unwrap(), Some(second));
        assert_eq!(storage.lookup("dynamic-cache-v1", &css).unwrap(), None);
        assert_eq!(storage.requests("static-cache-v1").unwrap(), vec![css.clone()]);

        assert!(storage.delete("static-cache-v1", &css).unwrap());
        assert_eq!(storage.lookup("static-cache-v1", &css).unwrap(), None);
        assert!(!storage.delete("static-cache-v1", &css).unwrap());
    }

    pub fn put_all_stores_every_entry(storage: &dyn CacheStorage) {
        let page = request("/");
        let css = request("/css/site.css");
        let entries = vec![
            (page.clone(), Response::new(200).with_body("<h1>Studio</h1>")),
            (css.clone(), Response::new(200).with_body("body{}")),
        ];
        storage.put_all("static-cache-v1", &entries).unwrap();

        assert_eq!(storage.list_partitions().unwrap(), vec!["static-cache-v1".to_string()]);
        assert_eq!(
            storage.lookup("static-cache-v1", &css).unwrap().map(|r| r.text()),
            Some("body{}".to_string())
        );
        assert_eq!(storage.requests("static-cache-v1").unwrap().len(), 2);
        assert!(storage.lookup("static-cache-v1", &page).unwrap().is_some());
    }

    pub fn queued_requests_keep_every_submission(storage: &dyn CacheStorage) {
        let first = chat(r#"{"m":"first"}"#);
        let second = chat(r#"{"m":"second"}"#);
        let first_id = storage.enqueue("api-cache-v1", &first).unwrap();
        let second_id = storage.enqueue("api-cache-v1", &second).unwrap();
        let again_id = storage.enqueue("api-cache-v1", &first).unwrap();
        assert!(first_id < second_id && second_id < again_id);

        // Queued writes are not cached responses
        assert_eq!(storage.lookup("api-cache-v1", &first).unwrap(), None);
        assert!(storage.requests("api-cache-v1").unwrap().is_empty());
        assert_eq!(storage.list_partitions().unwrap(), vec!["api-cache-v1".to_string()]);

        let queued = storage.queued("api-cache-v1").unwrap();
        let bodies: Vec<_> = queued.iter().map(|q| q.request.body.clone()).collect();
        assert_eq!(bodies, vec![first.body.clone(), second.body.clone(), first.body.clone()]);
        assert_eq!(queued[0].request, first);

        assert!(storage.dequeue("api-cache-v1", first_id).unwrap());
        assert!(!storage.dequeue("api-cache-v1", first_id).unwrap());
        let left: Vec<_> = storage
            .queued("api-cache-v1")
            .unwrap()
            .into_iter()
            .map(|q| q.id)
            .collect();
        assert_eq!(left, vec![second_id, again_id]);
    }

    pub fn deleting_a_partition_drops_its_entries(storage: &dyn CacheStorage) {
        let page = request("/index.html");
        storage
            .put("static-cache-v0", &page, &Response::new(200))
            .unwrap();
        storage.enqueue("static-cache-v0", &chat("{}")).unwrap();
        storage.delete_partition("static-cache-v0").unwrap();
        storage.open("static-cache-v0").unwrap();
        assert_eq!(storage.lookup("static-cache-v0", &page).unwrap(), None);
        assert!(storage.requests("static-cache-v0").unwrap().is_empty());
        assert!(storage.queued("static-cache-v0").unwrap().is_empty());
    }
}
