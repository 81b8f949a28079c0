//! # Async API
//!
//! [`Shardlite`] wraps a [`ShardedTable`] and its connection behind Tokio
//! channels, so async applications can use the engine without blocking the
//! runtime.
//!
//! ## The SQLite Challenge
//!
//! SQLite's `Connection` uses `RefCell` internally, making it `!Sync`: it
//! cannot be shared across threads even inside an `Arc`. The engine itself is
//! `Sync`, but every call needs a connection.
//!
//! Our solution: **one dedicated thread with async channels**
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Tokio Runtime                      │
//! │   task1 ─┐                                          │
//! │   task2 ─┼─ tokio::sync::mpsc ───────────┐          │
//! │   task3 ─┘   (async send)                │          │
//! └──────────────────────────────────────────┼──────────┘
//!                                            ▼
//!                               ┌─────────────────────┐
//!                               │ Dedicated OS Thread │
//!                               │  ┌───────────────┐  │
//!                               │  │ ShardedTable  │  │
//!                               │  │ + Connection  │  │ ← owned, not shared
//!                               │  └───────────────┘  │
//!                               └─────────────────────┘
//! ```
//!
//! Each request carries a `tokio::sync::oneshot` sender; the worker executes
//! against its private connection and sends the result back. The handle is
//! `Clone`, so any number of tasks can share one table service.
//!
//! A single worker also serializes writes, which suits SQLite's
//! single-writer nature. Once the service has shut down, every pending and
//! future call resolves to [`Error::ServiceStopped`].

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::condition::Condition;
use crate::engine::ShardedTable;
use crate::error::{Error, Result};
use crate::record::Record;
use crate::registry::ShardInfo;

/// Size of the request channel.
const REQUEST_CHANNEL_SIZE: usize = 1024;

// =============================================================================
// Requests
// =============================================================================

/// One operation for the worker thread, with its response channel.
enum Request {
    Initialize {
        resp: oneshot::Sender<Result<()>>,
    },
    Insert {
        record: Record,
        resp: oneshot::Sender<Result<()>>,
    },
    BatchInsert {
        records: Vec<Record>,
        resp: oneshot::Sender<Result<()>>,
    },
    Find {
        condition: Condition,
        offset: usize,
        limit: usize,
        resp: oneshot::Sender<Result<(Vec<Record>, u64)>>,
    },
    FindOne {
        condition: Condition,
        resp: oneshot::Sender<Result<Option<Record>>>,
    },
    Count {
        condition: Condition,
        resp: oneshot::Sender<Result<u64>>,
    },
    Invalidate {
        condition: Condition,
        resp: oneshot::Sender<Result<()>>,
    },
    Shards {
        resp: oneshot::Sender<Result<Vec<ShardInfo>>>,
    },
    Shutdown,
}

// =============================================================================
// Shardlite - The Main Async Handle
// =============================================================================

/// Async handle to one sharded logical table.
///
/// # Thread Safety
///
/// `Shardlite` is `Clone`, `Send`, and `Sync`. Share it across tasks freely;
/// all clones talk to the same worker thread and the same database.
///
/// # Example
///
/// ```rust,no_run
/// use shardlite::{Condition, MemoryIndexStore, ModuloStrategy, Record, ShardedTable, Shardlite};
///
/// #[tokio::main]
/// async fn main() -> shardlite::Result<()> {
///     let table = ShardedTable::new("orders", ModuloStrategy::new(4), MemoryIndexStore::new())
///         .with_create_table("(id INTEGER PRIMARY KEY, user TEXT, total INTEGER)");
///     let db = Shardlite::open("orders.db", table).await?;
///     db.initialize().await?;
///
///     db.insert(Record::new().with("id", 1i64).with("user", "ada").with("total", 95i64))
///         .await?;
///
///     let (page, total) = db
///         .find(Condition::new().order_by("total", true), 0, 20)
///         .await?;
///     println!("{} orders, showing {}", total, page.len());
///
///     db.shutdown().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Shardlite {
    /// Channel to the worker thread.
    tx: mpsc::Sender<Request>,

    /// Worker join handle, taken by whichever clone shuts down.
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Shardlite {
    /// Opens (or creates) a database file and starts the table service.
    ///
    /// The connection is opened in WAL mode with a busy timeout, then handed
    /// to the worker thread.
    pub async fn open<P: AsRef<Path>>(path: P, table: ShardedTable) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::with_connection(conn, table)
    }

    /// Starts the table service on a fresh in-memory database.
    ///
    /// The data lives exactly as long as the service. Primarily for tests.
    pub async fn open_in_memory(table: ShardedTable) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, table)
    }

    /// Starts the table service on an existing connection.
    ///
    /// The connection moves to the worker thread; this is the escape hatch
    /// for callers with their own pragmas or attached databases.
    pub fn with_connection(conn: Connection, table: ShardedTable) -> Result<Self> {
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_SIZE);

        let worker = thread::Builder::new()
            .name(format!("shardlite-{}", table.name()))
            .spawn(move || run_worker(conn, table, rx))
            .map_err(|e| Error::Schema(format!("failed to spawn shard worker: {}", e)))?;

        Ok(Self {
            tx,
            worker: Arc::new(Mutex::new(Some(worker))),
        })
    }

    /// Creates the shard registry. Idempotent; call once before first use.
    pub async fn initialize(&self) -> Result<()> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Request::Initialize { resp })
            .await
            .map_err(|_| Error::ServiceStopped)?;
        rx.await.map_err(|_| Error::ServiceStopped)?
    }

    /// Inserts one record into its shard.
    pub async fn insert(&self, record: Record) -> Result<()> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Request::Insert { record, resp })
            .await
            .map_err(|_| Error::ServiceStopped)?;
        rx.await.map_err(|_| Error::ServiceStopped)?
    }

    /// Inserts many records in one transaction; all or nothing.
    pub async fn batch_insert(&self, records: Vec<Record>) -> Result<()> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Request::BatchInsert { records, resp })
            .await
            .map_err(|_| Error::ServiceStopped)?;
        rx.await.map_err(|_| Error::ServiceStopped)?
    }

    /// Ordered, paginated query across all shards.
    ///
    /// Returns the requested page and the total number of matches.
    pub async fn find(
        &self,
        condition: Condition,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Record>, u64)> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Request::Find {
                condition,
                offset,
                limit,
                resp,
            })
            .await
            .map_err(|_| Error::ServiceStopped)?;
        rx.await.map_err(|_| Error::ServiceStopped)?
    }

    /// First record matching the condition, or `None`.
    pub async fn find_one(&self, condition: Condition) -> Result<Option<Record>> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Request::FindOne { condition, resp })
            .await
            .map_err(|_| Error::ServiceStopped)?;
        rx.await.map_err(|_| Error::ServiceStopped)?
    }

    /// Number of matching rows across all shards.
    pub async fn count(&self, condition: Condition) -> Result<u64> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Request::Count { condition, resp })
            .await
            .map_err(|_| Error::ServiceStopped)?;
        rx.await.map_err(|_| Error::ServiceStopped)?
    }

    /// Drops the index entry for a query shape; the next `find` rebuilds it.
    pub async fn invalidate(&self, condition: Condition) -> Result<()> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Request::Invalidate { condition, resp })
            .await
            .map_err(|_| Error::ServiceStopped)?;
        rx.await.map_err(|_| Error::ServiceStopped)?
    }

    /// The registered shards of the logical table.
    pub async fn shards(&self) -> Result<Vec<ShardInfo>> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Request::Shards { resp })
            .await
            .map_err(|_| Error::ServiceStopped)?;
        rx.await.map_err(|_| Error::ServiceStopped)?
    }

    /// Shuts the service down.
    ///
    /// The worker finishes the requests already queued ahead of the shutdown
    /// marker, then exits; this call waits for it. Calls made through any
    /// clone afterwards fail with [`Error::ServiceStopped`].
    pub async fn shutdown(self) {
        let _ = self.tx.send(Request::Shutdown).await;
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.join();
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Request loop on the dedicated thread. Runs until the shutdown marker or
/// until every handle is gone.
fn run_worker(mut conn: Connection, table: ShardedTable, mut rx: mpsc::Receiver<Request>) {
    tracing::debug!(logical = %table.name(), "shard worker started");

    while let Some(request) = rx.blocking_recv() {
        match request {
            Request::Initialize { resp } => {
                let _ = resp.send(table.initialize(&conn));
            }
            Request::Insert { record, resp } => {
                let _ = resp.send(table.insert(&mut conn, &record));
            }
            Request::BatchInsert { records, resp } => {
                let _ = resp.send(table.batch_insert(&mut conn, &records));
            }
            Request::Find {
                condition,
                offset,
                limit,
                resp,
            } => {
                let _ = resp.send(table.find(&conn, &condition, offset, limit));
            }
            Request::FindOne { condition, resp } => {
                let _ = resp.send(table.find_one(&conn, &condition));
            }
            Request::Count { condition, resp } => {
                let _ = resp.send(table.count(&conn, &condition));
            }
            Request::Invalidate { condition, resp } => {
                let _ = resp.send(table.invalidate_index(&conn, &condition));
            }
            Request::Shards { resp } => {
                let _ = resp.send(table.shards(&conn));
            }
            Request::Shutdown => break,
        }
    }

    tracing::debug!(logical = %table.name(), "shard worker stopped");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Filter;
    use crate::store::MemoryIndexStore;
    use crate::strategy::ModuloStrategy;

    fn test_table() -> ShardedTable {
        ShardedTable::new("events", ModuloStrategy::new(4), MemoryIndexStore::new())
            .with_create_table("(id INTEGER PRIMARY KEY, name TEXT, created_ms INTEGER)")
    }

    async fn test_db() -> Shardlite {
        let db = Shardlite::open_in_memory(test_table()).await.unwrap();
        db.initialize().await.unwrap();
        db
    }

    fn record(id: i64, name: &str) -> Record {
        Record::new()
            .with("id", id)
            .with("name", name)
            .with("created_ms", 1_000 + id)
    }

    #[tokio::test]
    async fn test_open_and_shutdown() {
        let db = test_db().await;
        db.shutdown().await;
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let db = test_db().await;

        for id in 1..=10 {
            db.insert(record(id, "event")).await.unwrap();
        }

        let (page, total) = db
            .find(Condition::new().order_by("id", true), 0, 3)
            .await
            .unwrap();
        assert_eq!(total, 10);
        let ids: Vec<i64> = page.iter().map(|r| r.int("id")).collect();
        assert_eq!(ids, [10, 9, 8]);

        db.shutdown().await;
    }

    #[tokio::test]
    async fn test_batch_insert_spans_shards() {
        let db = test_db().await;

        let records: Vec<Record> = (1..=8).map(|id| record(id, "batch")).collect();
        db.batch_insert(records).await.unwrap();

        assert_eq!(db.count(Condition::new()).await.unwrap(), 8);
        assert_eq!(db.shards().await.unwrap().len(), 4);

        db.shutdown().await;
    }

    #[tokio::test]
    async fn test_find_one() {
        let db = test_db().await;
        db.insert(record(3, "needle")).await.unwrap();
        db.insert(record(4, "hay")).await.unwrap();

        let hit = db
            .find_one(Condition::new().filter(Filter::eq("name", "needle")))
            .await
            .unwrap();
        assert_eq!(hit.unwrap().int("id"), 3);

        let miss = db
            .find_one(Condition::new().filter(Filter::eq("name", "nothing")))
            .await
            .unwrap();
        assert!(miss.is_none());

        db.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalidate_refreshes_results() {
        let db = test_db().await;
        db.insert(record(1, "a")).await.unwrap();

        let cond = Condition::new().order_by("id", false);
        let (_, total) = db.find(cond.clone(), 0, 10).await.unwrap();
        assert_eq!(total, 1);

        db.insert(record(2, "b")).await.unwrap();
        db.invalidate(cond.clone()).await.unwrap();

        let (_, total) = db.find(cond, 0, 10).await.unwrap();
        assert_eq!(total, 2);

        db.shutdown().await;
    }

    #[tokio::test]
    async fn test_clone_and_share() {
        let db = test_db().await;

        let db1 = db.clone();
        let h1 = tokio::spawn(async move {
            for id in 1..=5 {
                db1.insert(record(id, "task1")).await.unwrap();
            }
        });

        let db2 = db.clone();
        let h2 = tokio::spawn(async move {
            for id in 6..=10 {
                db2.insert(record(id, "task2")).await.unwrap();
            }
        });

        h1.await.unwrap();
        h2.await.unwrap();

        assert_eq!(db.count(Condition::new()).await.unwrap(), 10);
        db.shutdown().await;
    }

    #[tokio::test]
    async fn test_calls_fail_after_shutdown() {
        let db = test_db().await;
        let other = db.clone();
        db.shutdown().await;

        let err = other.count(Condition::new()).await.unwrap_err();
        assert!(matches!(err, Error::ServiceStopped));
        let err = other.insert(record(1, "late")).await.unwrap_err();
        assert!(matches!(err, Error::ServiceStopped));
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("events.db");

        let db = Shardlite::open(&path, test_table()).await.unwrap();
        db.initialize().await.unwrap();
        for id in 1..=6 {
            db.insert(record(id, "persisted")).await.unwrap();
        }
        db.shutdown().await;

        // a fresh service over the same file sees the rows and the registry
        let db = Shardlite::open(&path, test_table()).await.unwrap();
        db.initialize().await.unwrap();
        assert_eq!(db.shards().await.unwrap().len(), 4);

        let (page, total) = db
            .find(Condition::new().order_by("id", false), 0, 10)
            .await
            .unwrap();
        assert_eq!(total, 6);
        let ids: Vec<i64> = page.iter().map(|r| r.int("id")).collect();
        assert_eq!(ids, [1, 2, 3, 4, 5, 6]);

        db.shutdown().await;
    }
}
