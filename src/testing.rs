/// Scripted collaborators for tests
///
/// The network and image doubles record every request so tests can assert
/// on what was fetched. `FailingStorage` wraps a real back-end and fails
/// reads or writes on demand.
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::{CacheError, ImageLoadError, NetworkError};
use crate::images::fetch::{ImageFetcher, LoadedImage};
use crate::offline::http::{Request, Response};
use crate::offline::network::Fetch;
use crate::offline::storage::{CacheStorage, MemoryStorage, QueueId, QueuedRequest};

/// Network with canned responses per URL; unknown URLs answer 404
#[derive(Debug, Default)]
pub(crate) struct ScriptedNetwork {
    responses: Mutex<HashMap<String, Response>>,
    offline: Mutex<bool>,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: Response) {
        self.responses.lock().insert(url.to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    /// Requests made for `url`, including ones made while offline
    pub fn count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.as_str() == url)
            .count()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Fetch for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        self.requests.lock().push(request.clone());
        if *self.offline.lock() {
            return Err(NetworkError::Offline);
        }
        Ok(self
            .responses
            .lock()
            .get(request.url.as_str())
            .cloned()
            .unwrap_or_else(|| Response::new(404)))
    }
}

/// Image source where every URL loads (10x10) unless told otherwise
#[derive(Debug, Default)]
pub(crate) struct ScriptedImages {
    /// `None` fails forever, `Some(n)` fails the next `n` attempts
    failures: Mutex<HashMap<String, Option<u32>>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_always(&self, url: &str) {
        self.failures.lock().insert(url.to_string(), None);
    }

    pub fn fail_times(&self, url: &str, times: u32) {
        self.failures.lock().insert(url.to_string(), Some(times));
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn count(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.as_str() == url).count()
    }
}

#[async_trait]
impl ImageFetcher for ScriptedImages {
    async fn fetch_image(&self, url: &str) -> Result<LoadedImage, ImageLoadError> {
        self.requests.lock().push(url.to_string());
        match self.failures.lock().get_mut(url) {
            Some(None) => return Err(ImageLoadError::Status(404)),
            Some(Some(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                return Err(ImageLoadError::Network("connection reset".to_string()));
            }
            _ => {}
        }
        Ok(LoadedImage {
            url: url.to_string(),
            width: 10,
            height: 10,
        })
    }
}

/// Memory storage that can be told to fail like a full disk.
/// Partition management always works; entry reads and writes fail while
/// the matching switch is on.
#[derive(Debug, Default)]
pub(crate) struct FailingStorage {
    inner: MemoryStorage,
    fail_reads: Mutex<bool>,
    fail_writes: Mutex<bool>,
}

impl FailingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every entry read and write from the start
    pub fn broken() -> Self {
        let storage = Self::new();
        storage.set_fail_reads(true);
        storage.set_fail_writes(true);
        storage
    }

    pub fn set_fail_reads(&self, fail: bool) {
        *self.fail_reads.lock() = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    fn check(switch: &Mutex<bool>) -> Result<(), CacheError> {
        if *switch.lock() {
            return Err(CacheError::Sqlite(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
                Some("database or disk is full".to_string()),
            )));
        }
        Ok(())
    }

    fn read(&self) -> Result<(), CacheError> {
        Self::check(&self.fail_reads)
    }

    fn write(&self) -> Result<(), CacheError> {
        Self::check(&self.fail_writes)
    }
}

impl CacheStorage for FailingStorage {
    fn open(&self, partition: &str) -> Result<(), CacheError> {
        self.inner.open(partition)
    }

    fn list_partitions(&self) -> Result<Vec<String>, CacheError> {
        self.inner.list_partitions()
    }

    fn delete_partition(&self, partition: &str) -> Result<bool, CacheError> {
        self.inner.delete_partition(partition)
    }

    fn put(&self, partition: &str, request: &Request, response: &Response) -> Result<(), CacheError> {
        self.write()?;
        self.inner.put(partition, request, response)
    }

    fn put_all(&self, partition: &str, entries: &[(Request, Response)]) -> Result<(), CacheError> {
        self.write()?;
        self.inner.put_all(partition, entries)
    }

    fn lookup(&self, partition: &str, request: &Request) -> Result<Option<Response>, CacheError> {
        self.read()?;
        self.inner.lookup(partition, request)
    }

    fn requests(&self, partition: &str) -> Result<Vec<Request>, CacheError> {
        self.read()?;
        self.inner.requests(partition)
    }

    fn delete(&self, partition: &str, request: &Request) -> Result<bool, CacheError> {
        self.write()?;
        self.inner.delete(partition, request)
    }

    fn enqueue(&self, partition: &str, request: &Request) -> Result<QueueId, CacheError> {
        self.write()?;
        self.inner.enqueue(partition, request)
    }

    fn queued(&self, partition: &str) -> Result<Vec<QueuedRequest>, CacheError> {
        self.read()?;
        self.inner.queued(partition)
    }

    fn dequeue(&self, partition: &str, id: QueueId) -> Result<bool, CacheError> {
        self.write()?;
        self.inner.dequeue(partition, id)
    }
}
