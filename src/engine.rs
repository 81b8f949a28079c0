//! # Sharded Table Engine
//!
//! [`ShardedTable`] ties the pieces together: one logical table whose rows
//! live in many physical shard tables, routed by a strategy, queried through
//! an index store.
//!
//! ```text
//!            Insert(record)                     Find(condition, page)
//!                 │                                     │
//!                 ▼                                     ▼
//!          ┌─────────────┐  suffix             ┌─────────────────┐ miss
//!          │  Strategy   │───────┐             │   IndexStore    │──────┐
//!          └─────────────┘       │             └─────────────────┘      │
//!                                ▼                      ▲               ▼
//!          ┌──────────────────────────────┐             │      ┌────────────────┐
//!          │ example_0001 … example_0004  │─────────────┴──────│  index build   │
//!          │    (physical shard tables)   │  page by pk, 2000  │  per shard     │
//!          └──────────────────────────────┘                    └────────────────┘
//! ```
//!
//! ## Read Path
//!
//! `find` answers ordered, paginated queries: on an index miss it scans every
//! registered shard in primary-key order and feeds the store; the store then
//! serves the total count and the requested page of items; finally the engine
//! re-fetches the full rows with one `IN (...)` query per origin shard and
//! reassembles them in page order. `find_one` and `count` skip the index and
//! fan out over the shards directly.
//!
//! ## Concurrency
//!
//! The engine is `Sync`: strategies and stores are `Send + Sync`, the shard
//! cache sits behind an `RwLock`, and a per-fingerprint mutex gates index
//! builds so the same query shape is never built twice concurrently. SQLite
//! connections are not `Sync`, so each calling thread brings its own
//! connection (the async facade in [`crate::api`] dedicates one thread and
//! one connection to a table).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use rusqlite::{params_from_iter, Connection};

use crate::condition::{quote_ident, Condition, Filter, Fingerprint};
use crate::error::{Error, Result};
use crate::record::{Record, Value};
use crate::registry::{self, ShardCache, ShardInfo};
use crate::store::{IndexStore, Item};
use crate::strategy::ShardStrategy;

/// Rows fetched per page while building the index.
///
/// Each build query selects at most this many rows, ordered by primary key,
/// continuing from the last key seen. Large enough to amortize query
/// overhead, small enough to keep memory per page modest.
pub const INDEX_BUILD_PAGE_SIZE: usize = 2000;

/// Bound NULL for absent columns in multi-row inserts.
static NULL_VALUE: Value = Value::Null;

// =============================================================================
// Engine
// =============================================================================

/// One logical table spread over physical shard tables.
///
/// Construction names the logical table and supplies the two pluggable
/// pieces; everything else has defaults:
///
/// ```rust,no_run
/// use shardlite::{MemoryIndexStore, ModuloStrategy, ShardedTable};
///
/// let table = ShardedTable::new("example", ModuloStrategy::new(4), MemoryIndexStore::new())
///     .with_primary_key("id")
///     .with_create_table("(id INTEGER PRIMARY KEY, name TEXT, created_ms INTEGER)");
/// ```
///
/// Methods borrow a [`rusqlite::Connection`]; mutating operations take it
/// `&mut` because they run transactions.
pub struct ShardedTable {
    /// Logical table name; shard tables are `{name}_{suffix}`.
    name: String,
    /// Primary-key column of the shard tables.
    primary_key: String,
    /// Column the strategy reads to route a record.
    shard_column: String,
    /// CREATE TABLE body for auto-provisioning, e.g. `"(id INTEGER, ...)"`.
    /// `None` disables provisioning; shard tables must then pre-exist.
    create_table: Option<String>,
    strategy: Box<dyn ShardStrategy>,
    store: Box<dyn IndexStore>,
    /// Read-through cache of the registry.
    shards: ShardCache,
    /// Per-fingerprint gates so each query shape builds at most once at a time.
    build_locks: Mutex<HashMap<Fingerprint, Arc<Mutex<()>>>>,
}

impl ShardedTable {
    /// An engine for logical table `name` with the given routing strategy and
    /// index store. Primary key and shard column both default to `"id"`;
    /// auto-provisioning starts disabled.
    pub fn new(
        name: impl Into<String>,
        strategy: impl ShardStrategy + 'static,
        store: impl IndexStore + 'static,
    ) -> Self {
        ShardedTable {
            name: name.into(),
            primary_key: "id".to_string(),
            shard_column: "id".to_string(),
            create_table: None,
            strategy: Box::new(strategy),
            store: Box::new(store),
            shards: ShardCache::default(),
            build_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Use a different primary-key column.
    ///
    /// The shard column follows the primary key unless it was set to
    /// something else with [`ShardedTable::with_shard_column`].
    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        if self.shard_column == self.primary_key {
            self.shard_column = column.clone();
        }
        self.primary_key = column;
        self
    }

    /// Route records by a different column than the primary key.
    pub fn with_shard_column(mut self, column: impl Into<String>) -> Self {
        self.shard_column = column.into();
        self
    }

    /// Enable shard-table auto-provisioning. `ddl_body` is the parenthesized
    /// column list used to create each shard table on first write.
    pub fn with_create_table(mut self, ddl_body: impl Into<String>) -> Self {
        self.create_table = Some(ddl_body.into());
        self
    }

    /// The logical table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create the shard registry for this logical table. Idempotent; must run
    /// before the first insert or query.
    pub fn initialize(&self, conn: &Connection) -> Result<()> {
        registry::initialize(conn, &self.name)
    }

    /// The registered shards, through the cache.
    pub fn shards(&self, conn: &Connection) -> Result<Vec<ShardInfo>> {
        self.shards.load(conn, &self.name)
    }

    /// Drop the cached shard list; the next operation re-reads the registry.
    /// Needed after another process registers shards.
    pub fn refresh_shards(&self) {
        self.shards.invalidate();
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Insert one record into its shard.
    pub fn insert(&self, conn: &mut Connection, record: &Record) -> Result<()> {
        if record.is_empty() {
            return Err(Error::Schema("cannot insert an empty record".to_string()));
        }
        let table = self.route(conn, record)?;

        let columns: Vec<&str> = record.columns().collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&table),
            column_list(&columns),
            placeholders(columns.len())
        );
        conn.execute(&sql, params_from_iter(record.iter().map(|(_, v)| v)))?;
        Ok(())
    }

    /// Insert many records, atomically.
    ///
    /// Records are partitioned by computed shard table (relative order kept
    /// within each partition), shard tables are provisioned as needed, and
    /// all inserts run in one transaction - a failure writes no rows, though
    /// shard tables provisioned along the way remain. Each partition becomes
    /// one multi-row INSERT over the union of its records' columns; a record
    /// missing one of those columns binds NULL.
    pub fn batch_insert(&self, conn: &mut Connection, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut batches: BTreeMap<String, Vec<&Record>> = BTreeMap::new();
        for record in records {
            if record.is_empty() {
                return Err(Error::Schema("cannot insert an empty record".to_string()));
            }
            let table = self.route(conn, record)?;
            batches.entry(table).or_default().push(record);
        }

        let tx = conn.transaction()?;
        for (table, batch) in &batches {
            let mut column_set: BTreeSet<&str> = BTreeSet::new();
            for record in batch {
                column_set.extend(record.columns());
            }
            let columns: Vec<&str> = column_set.into_iter().collect();

            let row = format!("({})", placeholders(columns.len()));
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                quote_ident(table),
                column_list(&columns),
                vec![row; batch.len()].join(", ")
            );

            let mut bind: Vec<&Value> = Vec::with_capacity(columns.len() * batch.len());
            for record in batch {
                for column in &columns {
                    bind.push(record.get(column).unwrap_or(&NULL_VALUE));
                }
            }
            tx.execute(&sql, params_from_iter(bind))?;
        }
        tx.commit()?;

        tracing::debug!(
            logical = %self.name,
            records = records.len(),
            shards = batches.len(),
            "batch insert committed"
        );
        Ok(())
    }

    /// Compute a record's shard table, provisioning it when configured.
    fn route(&self, conn: &mut Connection, record: &Record) -> Result<String> {
        let suffix = self.strategy.shard_suffix(record, &self.shard_column)?;
        let table = format!("{}_{}", self.name, suffix);

        if let Some(ddl_body) = &self.create_table {
            if let Some(info) = registry::ensure_shard_table(conn, &self.name, &table, ddl_body)? {
                self.shards.note(info);
            }
        }
        Ok(table)
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Ordered, paginated query across all shards.
    ///
    /// Returns the `[offset, offset+limit)` page of matching records plus the
    /// total match count. An offset at or past the end yields an empty page
    /// with the true total. The first call for a query shape builds its index
    /// entry; later calls serve straight from the store.
    pub fn find(
        &self,
        conn: &Connection,
        condition: &Condition,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Record>, u64)> {
        let cond = condition.with_primary_key(&self.primary_key);

        if !self.store.exist(conn, &self.name, &cond)? {
            self.build_index_once(conn, &cond)?;
        }

        let total = self.store.count(conn, &self.name, &cond)?;
        let items = self.store.get(conn, &self.name, &cond, offset, limit)?;
        let records = self.fetch_by_items(conn, &cond, &items)?;
        Ok((records, total))
    }

    /// First record matching the condition, or `None`.
    ///
    /// Scans shards in registry order and returns on the first hit; shards
    /// after the hit are never queried. The index is not consulted.
    pub fn find_one(&self, conn: &Connection, condition: &Condition) -> Result<Option<Record>> {
        let cond = condition.with_primary_key(&self.primary_key);
        let shards = self.shards.load(conn, &self.name)?;

        for shard in &shards {
            let mut sql = format!(
                "SELECT {} FROM {}",
                cond.select_list(None),
                quote_ident(&shard.table)
            );
            let mut bind = Vec::new();
            if let Some((where_sql, params)) = cond.where_clause() {
                sql.push_str(" WHERE ");
                sql.push_str(&where_sql);
                bind = params;
            }
            if let Some(group_sql) = cond.group_clause() {
                sql.push_str(" GROUP BY ");
                sql.push_str(&group_sql);
            }
            if let Some(order_sql) = cond.order_clause() {
                sql.push_str(" ORDER BY ");
                sql.push_str(&order_sql);
            }
            sql.push_str(" LIMIT 1");

            match conn.query_row(&sql, params_from_iter(bind.iter()), |row| {
                Ok(Record::from_row(row))
            }) {
                Ok(record) => return Ok(Some(record?)),
                Err(rusqlite::Error::QueryReturnedNoRows) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Number of matching rows across all shards: per-shard filtered counts,
    /// summed. Grouping and projection do not affect the count.
    pub fn count(&self, conn: &Connection, condition: &Condition) -> Result<u64> {
        let shards = self.shards.load(conn, &self.name)?;
        let mut total = 0u64;
        for shard in &shards {
            let mut sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&shard.table));
            let mut bind = Vec::new();
            if let Some((where_sql, params)) = condition.where_clause() {
                sql.push_str(" WHERE ");
                sql.push_str(&where_sql);
                bind = params;
            }
            let rows: i64 = conn.query_row(&sql, params_from_iter(bind.iter()), |row| row.get(0))?;
            total += rows.max(0) as u64;
        }
        Ok(total)
    }

    /// Drop the index entry for a query shape.
    ///
    /// Writes do not update indexes automatically; callers that mutated shard
    /// rows invalidate affected shapes, and the next `find` rebuilds.
    pub fn invalidate_index(&self, conn: &Connection, condition: &Condition) -> Result<()> {
        let cond = condition.with_primary_key(&self.primary_key);
        self.store.del(conn, &self.name, &cond)
    }

    // =========================================================================
    // Index Build
    // =========================================================================

    /// Build the index for a shape, at most once across concurrent callers.
    fn build_index_once(&self, conn: &Connection, cond: &Condition) -> Result<()> {
        let fingerprint = cond.fingerprint(&self.name);
        let gate = {
            let mut locks = self.build_locks.lock().expect("build lock table poisoned");
            Arc::clone(locks.entry(fingerprint).or_default())
        };
        let _guard = gate.lock().expect("build gate poisoned");

        // another caller may have finished the build while we waited
        if self.store.exist(conn, &self.name, cond)? {
            return Ok(());
        }
        self.build_index(conn, cond)
    }

    /// Scan every registered shard and feed the store.
    fn build_index(&self, conn: &Connection, cond: &Condition) -> Result<()> {
        // primary key + order + group columns, deduplicated, first wins
        let mut columns: Vec<&str> = Vec::with_capacity(1 + cond.order.len() + cond.group.len());
        columns.push(cond.primary_key.as_str());
        for key in &cond.order {
            if !columns.contains(&key.column.as_str()) {
                columns.push(&key.column);
            }
        }
        for group in &cond.group {
            if !columns.contains(&group.as_str()) {
                columns.push(group);
            }
        }

        let shards = self.shards.load(conn, &self.name)?;
        tracing::debug!(
            logical = %self.name,
            fingerprint = %cond.fingerprint(&self.name),
            shards = shards.len(),
            "building shard index"
        );

        let mut indexed = 0usize;
        for shard in &shards {
            indexed += self.build_shard_index(conn, &shard.table, &columns, cond)?;
        }
        if indexed == 0 {
            // record the empty result so the next find does not re-scan
            self.store.put(conn, &self.name, cond, Vec::new())?;
        }

        tracing::debug!(logical = %self.name, items = indexed, "shard index built");
        Ok(())
    }

    /// Page one shard in primary-key order, putting items page by page.
    ///
    /// Each page selects rows with `pk > last_seen` under the condition's
    /// filter; an empty page ends the shard. Cross-shard ordering is the
    /// store's job, so shards can build in any sequence.
    fn build_shard_index(
        &self,
        conn: &Connection,
        table: &str,
        columns: &[&str],
        cond: &Condition,
    ) -> Result<usize> {
        let select_list = column_list(columns);
        let mut last_key: Option<Value> = None;
        let mut indexed = 0usize;

        loop {
            let mut filter = cond.filter.clone();
            if let Some(last) = &last_key {
                let continuation = Filter::gt(cond.primary_key.clone(), last.clone());
                filter = Some(match filter {
                    Some(existing) => Filter::and([existing, continuation]),
                    None => continuation,
                });
            }

            let mut sql = format!("SELECT {} FROM {}", select_list, quote_ident(table));
            let mut bind = Vec::new();
            if let Some(filter) = &filter {
                let mut where_sql = String::new();
                filter.render(&mut where_sql, &mut bind);
                sql.push_str(" WHERE ");
                sql.push_str(&where_sql);
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&quote_ident(&cond.primary_key));
            sql.push_str(" LIMIT ");
            sql.push_str(&INDEX_BUILD_PAGE_SIZE.to_string());

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(bind.iter()), |row| {
                Ok(Record::from_row(row))
            })?;
            let mut page = Vec::new();
            for row in rows {
                page.push(row??);
            }
            if page.is_empty() {
                break;
            }

            let mut items = Vec::with_capacity(page.len());
            for record in &page {
                items.push(Item::from_record(record, cond, table)?);
            }
            last_key = items.last().map(|item| item.primary_key.clone());
            indexed += items.len();
            self.store.put(conn, &self.name, cond, items)?;
        }

        tracing::trace!(shard = %table, items = indexed, "indexed shard");
        Ok(indexed)
    }

    // =========================================================================
    // Materialization
    // =========================================================================

    /// Fetch full records for a page of items, preserving item order.
    ///
    /// Primary keys are grouped by origin shard, fetched with one `IN (...)`
    /// query per shard, then reassembled in the items' order through a
    /// key-indexed map. An item whose row has vanished since the index was
    /// built is skipped.
    fn fetch_by_items(
        &self,
        conn: &Connection,
        cond: &Condition,
        items: &[Item],
    ) -> Result<Vec<Record>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_shard: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();
        for item in items {
            by_shard
                .entry(item.shard_table.as_str())
                .or_default()
                .push(&item.primary_key);
        }

        let select_list = cond.select_list(Some(&cond.primary_key));
        let mut fetched: HashMap<Vec<u8>, Record> = HashMap::with_capacity(items.len());

        for (table, keys) in &by_shard {
            let sql = format!(
                "SELECT {} FROM {} WHERE {} IN ({})",
                select_list,
                quote_ident(table),
                quote_ident(&cond.primary_key),
                placeholders(keys.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(keys.iter().copied()), |row| {
                Ok(Record::from_row(row))
            })?;
            for row in rows {
                let record = row??;
                let key = record
                    .get(&cond.primary_key)
                    .map(Value::canonical_key)
                    .ok_or_else(|| Error::MissingPrimaryKey {
                        table: table.to_string(),
                        column: cond.primary_key.clone(),
                    })?;
                fetched.insert(key, record);
            }
        }

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            if let Some(record) = fetched.remove(&item.primary_key.canonical_key()) {
                results.push(record);
            }
        }
        Ok(results)
    }
}

/// `"a", "b", "c"` from column names.
fn column_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `?, ?, ?` for `n` bind parameters.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

// =============================================================================
// Tests
// =============================================================================
