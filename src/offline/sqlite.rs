use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

use super::http::{Headers, Method, Request, Response};
use super::storage::{CacheStorage, QueueId, QueuedRequest};
use crate::error::CacheError;

/// SQLite-backed cache storage.
/// Partitions and entries survive process restarts, so a new process can
/// serve the previous generation's cache until activation replaces it.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteStorage {
    /// Open (or create) the cache database at `path`.
    pub fn open_path(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CacheError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        info!("📁 Cache database opened at: {}", path.display());

        let storage = SqliteStorage {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// A throwaway database that lives as long as this value
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let storage = SqliteStorage {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        };
        storage.init_schema()?;
        Ok(storage)
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Create tables and indexes if they don't exist.
    fn init_schema(&self) -> Result<(), CacheError> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS partitions (
                name            TEXT PRIMARY KEY,
                created_at      INTEGER NOT NULL
            )",
            [],
        )?;

        // One row per partition/request identity
        conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                partition        TEXT NOT NULL,
                method           TEXT NOT NULL,
                url              TEXT NOT NULL,
                request_headers  TEXT NOT NULL,
                request_body     BLOB NOT NULL,
                status           INTEGER NOT NULL,
                response_headers TEXT NOT NULL,
                response_body    BLOB NOT NULL,
                stored_at        INTEGER NOT NULL,
                PRIMARY KEY (partition, method, url)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entries_stored_at
             ON entries(partition, stored_at)",
            [],
        )?;

        // Failed writes waiting for resync; one row per submission
        conn.execute(
            "CREATE TABLE IF NOT EXISTS queue (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                partition        TEXT NOT NULL,
                method           TEXT NOT NULL,
                url              TEXT NOT NULL,
                request_headers  TEXT NOT NULL,
                request_body     BLOB NOT NULL,
                queued_at        INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_queue_partition ON queue(partition, id)",
            [],
        )?;

        debug!("✅ Cache schema initialized");
        Ok(())
    }

    fn ensure_partition(conn: &Connection, partition: &str) -> Result<(), CacheError> {
        conn.execute(
            "INSERT OR IGNORE INTO partitions (name, created_at) VALUES (?1, ?2)",
            params![partition, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn insert_entry(
        conn: &Connection,
        partition: &str,
        request: &Request,
        response: &Response,
    ) -> Result<(), CacheError> {
        conn.execute(
            "INSERT OR REPLACE INTO entries
                (partition, method, url, request_headers, request_body,
                 status, response_headers, response_body, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                partition,
                request.method.as_str(),
                request.url.as_str(),
                request.headers.to_json()?,
                request.body.as_ref(),
                response.status,
                response.headers.to_json()?,
                response.body.as_ref(),
                Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    fn decode_request(
        method: String,
        url: String,
        headers: String,
        body: Vec<u8>,
    ) -> Result<Request, CacheError> {
        let url = Url::parse(&url).map_err(|_| CacheError::StoredUrl(url.clone()))?;
        let method: Method = method.parse().unwrap_or(Method::Get);
        Ok(Request {
            method,
            url,
            headers: Headers::from_json(&headers)?,
            body: Bytes::from(body),
        })
    }
}

impl CacheStorage for SqliteStorage {
    fn open(&self, partition: &str) -> Result<(), CacheError> {
        Self::ensure_partition(&self.conn.lock(), partition)
    }

    fn list_partitions(&self) -> Result<Vec<String>, CacheError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name FROM partitions ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn delete_partition(&self, partition: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entries WHERE partition = ?1", [partition])?;
        tx.execute("DELETE FROM queue WHERE partition = ?1", [partition])?;
        let removed = tx.execute("DELETE FROM partitions WHERE name = ?1", [partition])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn put(&self, partition: &str, request: &Request, response: &Response) -> Result<(), CacheError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        Self::ensure_partition(&tx, partition)?;
        Self::insert_entry(&tx, partition, request, response)?;
        tx.commit()?;
        Ok(())
    }

    fn put_all(&self, partition: &str, entries: &[(Request, Response)]) -> Result<(), CacheError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        Self::ensure_partition(&tx, partition)?;
        for (request, response) in entries {
            Self::insert_entry(&tx, partition, request, response)?;
        }
        tx.commit()?;
        debug!("Stored {} entries in {}", entries.len(), partition);
        Ok(())
    }

    fn lookup(&self, partition: &str, request: &Request) -> Result<Option<Response>, CacheError> {
        let conn = self.conn.lock();
        let row: Option<(u16, String, Vec<u8>)> = conn
            .query_row(
                "SELECT status, response_headers, response_body FROM entries
                 WHERE partition = ?1 AND method = ?2 AND url = ?3",
                params![partition, request.method.as_str(), request.url.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match row {
            Some((status, headers, body)) => Ok(Some(Response {
                status,
                headers: Headers::from_json(&headers)?,
                body: Bytes::from(body),
            })),
            None => Ok(None),
        }
    }

    fn requests(&self, partition: &str) -> Result<Vec<Request>, CacheError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT method, url, request_headers, request_body FROM entries
             WHERE partition = ?1
             ORDER BY stored_at, url",
        )?;

        let rows = stmt
            .query_map([partition], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<Vec<(String, String, String, Vec<u8>)>, _>>()?;

        rows.into_iter()
            .map(|(method, url, headers, body)| Self::decode_request(method, url, headers, body))
            .collect()
    }

    fn delete(&self, partition: &str, request: &Request) -> Result<bool, CacheError> {
        let removed = self.conn.lock().execute(
            "DELETE FROM entries WHERE partition = ?1 AND method = ?2 AND url = ?3",
            params![partition, request.method.as_str(), request.url.as_str()],
        )?;
        Ok(removed > 0)
    }

    fn enqueue(&self, partition: &str, request: &Request) -> Result<QueueId, CacheError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        Self::ensure_partition(&tx, partition)?;
        tx.execute(
            "INSERT INTO queue (partition, method, url, request_headers, request_body, queued_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                partition,
                request.method.as_str(),
                request.url.as_str(),
                request.headers.to_json()?,
                request.body.as_ref(),
                Utc::now().timestamp(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    fn queued(&self, partition: &str) -> Result<Vec<QueuedRequest>, CacheError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, method, url, request_headers, request_body FROM queue
             WHERE partition = ?1
             ORDER BY id",
        )?;

        let rows = stmt
            .query_map([partition], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<Result<Vec<(QueueId, String, String, String, Vec<u8>)>, _>>()?;

        rows.into_iter()
            .map(|(id, method, url, headers, body)| {
                Ok(QueuedRequest {
                    id,
                    request: Self::decode_request(method, url, headers, body)?,
                })
            })
            .collect()
    }

    fn dequeue(&self, partition: &str, id: QueueId) -> Result<bool, CacheError> {
        let removed = self.conn.lock().execute(
            "DELETE FROM queue WHERE partition = ?1 AND id = ?2",
            params![partition, id],
        )?;
        Ok(removed > 0)
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("db_path", &self.db_path)
            .finish()
    }
}
