//! # Shard Registry
//!
//! Each logical table keeps a bookkeeping table listing its physical shards.
//! The registry is how readers discover which shard tables exist: queries fan
//! out over the registered shards, never over a naming convention.
//!
//! ```text
//! Logical table "example", modulo strategy over 4 shards:
//!
//!   example_shards               example_0001   example_0002  ...
//!   ┌────┬─────────┬──────────┐  ┌────┬──────┐  ┌────┬──────┐
//!   │ id │ name    │ shard    │  │ id │ name │  │ id │ name │
//!   ├────┼─────────┼──────────┤  ├────┼──────┤  ├────┼──────┤
//!   │ 1  │ example │ ex._0001 │  │ 1  │ ...  │  │ 2  │ ...  │
//!   │ 2  │ example │ ex._0002 │  │ 5  │ ...  │  │ 6  │ ...  │
//!   └────┴─────────┴──────────┘  └────┴──────┘  └────┴──────┘
//! ```
//!
//! ## Consistency
//!
//! `ensure_shard_table` runs CREATE TABLE plus the registry insert in one
//! transaction, and both statements are idempotent (`IF NOT EXISTS`,
//! `ON CONFLICT DO NOTHING`). Two writers racing to provision the same shard
//! both succeed; exactly one registry row results. A shard table is only ever
//! visible to readers after its registry row committed.

use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection};

use crate::condition::quote_ident;
use crate::error::Result;

// =============================================================================
// Registry DDL
// =============================================================================

/// Name of the registry table for a logical table.
pub(crate) fn registry_table(name: &str) -> String {
    format!("{}_shards", name)
}

/// DDL for one logical table's registry.
///
/// # Columns
///
/// - `id`: Auto-increment row id
/// - `name`: The logical table name (every row of one registry repeats it;
///   cheap, and it makes the table self-describing)
/// - `shard`: The physical shard table name, e.g. `example_0003`
/// - `created_ms` / `updated_ms`: Unix milliseconds
fn create_registry_sql(registry: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {} (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL,
    shard      TEXT NOT NULL,
    created_ms INTEGER NOT NULL,
    updated_ms INTEGER NOT NULL
)
"#,
        quote_ident(registry)
    )
}

/// Unique index: one registry row per (logical, physical) pair. Also what
/// `ensure_shard_table`'s ON CONFLICT clause resolves against.
fn create_registry_unique_index_sql(registry: &str) -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} (name, shard)",
        quote_ident(&format!("{}_name_shard", registry)),
        quote_ident(registry)
    )
}

/// Lookup index on the logical name.
fn create_registry_name_index_sql(registry: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} (name)",
        quote_ident(&format!("{}_name", registry)),
        quote_ident(registry)
    )
}

// =============================================================================
// Shard Info
// =============================================================================

/// One registered shard of a logical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInfo {
    /// Registry row id.
    pub id: i64,
    /// Logical table name.
    pub name: String,
    /// Physical shard table name.
    pub table: String,
    /// When the shard was registered (unix millis).
    pub created_ms: i64,
    /// Last registry update (unix millis).
    pub updated_ms: i64,
}

/// Current wall-clock time as unix milliseconds.
pub(crate) fn current_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// =============================================================================
// Registry Operations
// =============================================================================

/// Create the registry table and its indexes for a logical table.
///
/// Idempotent; runs inside one transaction. Must be called once before any
/// insert or query touches the logical table.
pub(crate) fn initialize(conn: &Connection, name: &str) -> Result<()> {
    let registry = registry_table(name);
    let batch = format!(
        "BEGIN;\n{};\n{};\n{};\nCOMMIT;",
        create_registry_sql(&registry),
        create_registry_unique_index_sql(&registry),
        create_registry_name_index_sql(&registry),
    );
    conn.execute_batch(&batch)?;
    tracing::debug!(logical = %name, registry = %registry, "initialized shard registry");
    Ok(())
}

/// Provision a shard table if it is not registered yet.
///
/// Checks the registry first; on a miss, creates the physical table and the
/// registry row in one transaction. Returns the new registry row, or `None`
/// when the shard was already registered.
///
/// `ddl_body` is the parenthesized column list of the CREATE TABLE statement,
/// e.g. `"(id INTEGER PRIMARY KEY, name TEXT)"`.
pub(crate) fn ensure_shard_table(
    conn: &mut Connection,
    name: &str,
    shard_table: &str,
    ddl_body: &str,
) -> Result<Option<ShardInfo>> {
    let registry = registry_table(name);

    let registered = match conn.query_row(
        &format!(
            "SELECT 1 FROM {} WHERE name = ? AND shard = ?",
            quote_ident(&registry)
        ),
        params![name, shard_table],
        |_| Ok(()),
    ) {
        Ok(()) => true,
        Err(rusqlite::Error::QueryReturnedNoRows) => false,
        Err(e) => return Err(e.into()),
    };
    if registered {
        return Ok(None);
    }

    let now_ms = current_time_ms();
    let tx = conn.transaction()?;
    tx.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} {}",
        quote_ident(shard_table),
        ddl_body
    ))?;
    let inserted = tx.execute(
        &format!(
            "INSERT INTO {} (name, shard, created_ms, updated_ms)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (name, shard) DO NOTHING",
            quote_ident(&registry)
        ),
        params![name, shard_table, now_ms, now_ms],
    )?;
    let id = tx.last_insert_rowid();
    tx.commit()?;

    if inserted == 0 {
        return Ok(None);
    }
    tracing::info!(logical = %name, shard = %shard_table, "provisioned shard table");
    Ok(Some(ShardInfo {
        id,
        name: name.to_string(),
        table: shard_table.to_string(),
        created_ms: now_ms,
        updated_ms: now_ms,
    }))
}

/// All registered shards of a logical table, ordered by shard name.
///
/// The ordering makes fan-out deterministic: every enumeration of the same
/// registry visits shards in the same sequence.
pub(crate) fn list_shards(conn: &Connection, name: &str) -> Result<Vec<ShardInfo>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, name, shard, created_ms, updated_ms
         FROM {} WHERE name = ? ORDER BY shard",
        quote_ident(&registry_table(name))
    ))?;

    let rows = stmt.query_map(params![name], |row| {
        Ok(ShardInfo {
            id: row.get(0)?,
            name: row.get(1)?,
            table: row.get(2)?,
            created_ms: row.get(3)?,
            updated_ms: row.get(4)?,
        })
    })?;

    let mut shards = Vec::new();
    for row in rows {
        shards.push(row?);
    }
    Ok(shards)
}

// =============================================================================
// Shard Cache
// =============================================================================

/// Read-through cache of one logical table's shard list.
///
/// The engine consults the registry on every query; re-reading a table that
/// changes only when a shard is first provisioned would be wasted work. The
/// cache loads once, and only [`ShardCache::note`] (after a successful
/// provision) or [`ShardCache::invalidate`] changes it. External registry
/// writes become visible after an invalidate.
#[derive(Debug, Default)]
pub(crate) struct ShardCache {
    inner: RwLock<Option<Vec<ShardInfo>>>,
}

impl ShardCache {
    /// The shard list, loading from the registry on first use.
    pub(crate) fn load(&self, conn: &Connection, name: &str) -> Result<Vec<ShardInfo>> {
        {
            let cached = self.inner.read().expect("shard cache lock poisoned");
            if let Some(shards) = cached.as_ref() {
                return Ok(shards.clone());
            }
        }
        let shards = list_shards(conn, name)?;
        let mut cached = self.inner.write().expect("shard cache lock poisoned");
        *cached = Some(shards.clone());
        Ok(shards)
    }

    /// Record a newly provisioned shard without a registry round trip.
    ///
    /// Keeps the cached list in shard-name order. A no-op when the cache has
    /// not been loaded yet; the next load sees the new row anyway.
    pub(crate) fn note(&self, info: ShardInfo) {
        let mut cached = self.inner.write().expect("shard cache lock poisoned");
        if let Some(shards) = cached.as_mut() {
            if !shards.iter().any(|s| s.table == info.table) {
                shards.push(info);
                shards.sort_by(|a, b| a.table.cmp(&b.table));
            }
        }
    }

    /// Drop the cached list; the next load re-reads the registry.
    pub(crate) fn invalidate(&self) {
        let mut cached = self.inner.write().expect("shard cache lock poisoned");
        *cached = None;
    }
}

// =============================================================================
// Tests
// =============================================================================
