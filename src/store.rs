//! # Index Stores
//!
//! A cross-shard query needs a global view: "order by id descending, rows 10
//! to 20" cannot be answered from any single shard. The index store holds
//! that view - per query shape, a list of [`Item`]s, each remembering a row's
//! primary key, its origin shard table, and the column values the query
//! orders or groups by.
//!
//! ```text
//! Find(filter, order, group)
//!        │ fingerprint
//!        ▼
//! ┌──────────────────┐   miss   ┌─────────────────────────────┐
//! │   IndexStore     │◄─────────│ engine rebuild: page shards │
//! │ shape → [Item]   │   put    │ in primary-key order        │
//! └──────────────────┘          └─────────────────────────────┘
//!        │ get(offset, limit)
//!        ▼
//!   sorted page of Items → engine fetches full rows per origin shard
//! ```
//!
//! Two implementations ship: an in-process [`MemoryIndexStore`] that sorts
//! with the value comparator, and a read-only [`TableIndexStore`] over an
//! index table maintained by an external process.

use std::collections::HashMap;
use std::sync::RwLock;

use rusqlite::{params, params_from_iter, Connection};

use crate::compare::compare_records;
use crate::condition::{quote_ident, Condition, Fingerprint, SortKey};
use crate::error::{Error, Result};
use crate::record::{Record, Value};

// =============================================================================
// Items
// =============================================================================

/// One indexed row: enough to sort, count, and find the full row again.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// The row's primary key value.
    pub primary_key: Value,
    /// Physical shard table the row lives in.
    pub shard_table: String,
    /// Sort order the item was indexed under.
    pub order: Vec<SortKey>,
    /// Grouping columns the item was indexed under.
    pub group: Vec<String>,
    /// Values of the order columns, for comparator-driven sorting.
    pub order_values: Record,
    /// Values of the grouping columns.
    pub group_values: Record,
}

impl Item {
    /// Build an item from a scanned row.
    ///
    /// # Errors
    ///
    /// [`Error::MissingPrimaryKey`] if the row lacks the condition's key
    /// column or holds NULL there - a keyless item could never be fetched
    /// back.
    pub(crate) fn from_record(
        record: &Record,
        condition: &Condition,
        origin_table: &str,
    ) -> Result<Item> {
        let primary_key = match record.get(&condition.primary_key) {
            Some(value) if !value.is_null() => value.clone(),
            _ => {
                return Err(Error::MissingPrimaryKey {
                    table: origin_table.to_string(),
                    column: condition.primary_key.clone(),
                });
            }
        };

        Ok(Item {
            primary_key,
            shard_table: origin_table.to_string(),
            order: condition.order.clone(),
            group: condition.group.clone(),
            order_values: project(record, condition.order.iter().map(|k| k.column.as_str())),
            group_values: project(record, condition.group.iter().map(String::as_str)),
        })
    }
}

/// Copy the named columns out of a record, skipping absent ones.
fn project<'a>(record: &Record, columns: impl Iterator<Item = &'a str>) -> Record {
    columns
        .filter_map(|c| record.get(c).map(|v| (c.to_string(), v.clone())))
        .collect()
}

// =============================================================================
// Store Trait
// =============================================================================

/// Cache of index items, keyed by query-shape fingerprint.
///
/// Every method receives the connection and the logical table name alongside
/// the condition; the memory store ignores the connection, the table store
/// ignores nothing. The condition is always the engine's stamped copy, so
/// `condition.fingerprint(name)` and the primary-key column are well-defined.
pub trait IndexStore: Send + Sync {
    /// Whether an index entry exists for this query shape.
    fn exist(&self, conn: &Connection, name: &str, condition: &Condition) -> Result<bool>;

    /// Total number of indexed items for this query shape.
    fn count(&self, conn: &Connection, name: &str, condition: &Condition) -> Result<u64>;

    /// The `[offset, offset+limit)` page of items in query order.
    ///
    /// An offset at or past the end yields an empty page.
    fn get(
        &self,
        conn: &Connection,
        name: &str,
        condition: &Condition,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Item>>;

    /// Append items to this query shape's entry, creating it if absent.
    fn put(
        &self,
        conn: &Connection,
        name: &str,
        condition: &Condition,
        items: Vec<Item>,
    ) -> Result<()>;

    /// Drop this query shape's entry.
    fn del(&self, conn: &Connection, name: &str, condition: &Condition) -> Result<()>;
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-process index store.
///
/// Entries live in a `HashMap` behind an `RwLock`; reads snapshot and sort
/// without blocking each other, writes serialize. `get` sorts with the value
/// comparator, so the order matches what the shards' own ORDER BY would
/// produce, shard boundaries notwithstanding.
///
/// Grouped queries are refused: a flat item list cannot aggregate, and a
/// silently empty answer would be worse than an error.
#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    entries: RwLock<HashMap<Fingerprint, Vec<Item>>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        MemoryIndexStore::default()
    }
}

impl IndexStore for MemoryIndexStore {
    fn exist(&self, _conn: &Connection, name: &str, condition: &Condition) -> Result<bool> {
        let entries = self.entries.read().expect("index store lock poisoned");
        Ok(entries.contains_key(&condition.fingerprint(name)))
    }

    fn count(&self, _conn: &Connection, name: &str, condition: &Condition) -> Result<u64> {
        let entries = self.entries.read().expect("index store lock poisoned");
        Ok(entries
            .get(&condition.fingerprint(name))
            .map_or(0, |items| items.len() as u64))
    }

    fn get(
        &self,
        _conn: &Connection,
        name: &str,
        condition: &Condition,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Item>> {
        if !condition.group.is_empty() {
            return Err(Error::Unsupported {
                store: "memory".to_string(),
                operation: "group by".to_string(),
            });
        }

        let entries = self.entries.read().expect("index store lock poisoned");
        let items = match entries.get(&condition.fingerprint(name)) {
            Some(items) => items,
            None => return Ok(Vec::new()),
        };

        // Sort a snapshot of references; the stored order stays untouched and
        // concurrent readers are never blocked by each other's sorts.
        let mut sorted: Vec<&Item> = items.iter().collect();
        if !condition.order.is_empty() {
            let mut sort_err: Option<Error> = None;
            sorted.sort_by(|a, b| {
                match compare_records(&a.order_values, &b.order_values, &condition.order) {
                    Ok(ordering) => ordering,
                    Err(e) => {
                        if sort_err.is_none() {
                            sort_err = Some(e);
                        }
                        std::cmp::Ordering::Equal
                    }
                }
            });
            if let Some(e) = sort_err {
                return Err(e);
            }
        }

        let start = offset.min(sorted.len());
        let end = offset.saturating_add(limit).min(sorted.len());
        Ok(sorted[start..end].iter().map(|item| (*item).clone()).collect())
    }

    fn put(
        &self,
        _conn: &Connection,
        name: &str,
        condition: &Condition,
        items: Vec<Item>,
    ) -> Result<()> {
        let mut entries = self.entries.write().expect("index store lock poisoned");
        entries
            .entry(condition.fingerprint(name))
            .or_default()
            .extend(items);
        Ok(())
    }

    fn del(&self, _conn: &Connection, name: &str, condition: &Condition) -> Result<()> {
        let mut entries = self.entries.write().expect("index store lock poisoned");
        entries.remove(&condition.fingerprint(name));
        Ok(())
    }
}

// =============================================================================
// Table Store
// =============================================================================

/// Read-only store over a pre-built index table.
///
/// Some deployments maintain the cross-shard index out of band - an ETL job,
/// a trigger pipeline - as a real table holding the primary key, the origin
/// shard, and the order/group columns. This store serves pages straight from
/// that table with SQL, delegating filter, grouping, and order to SQLite.
///
/// The table is somebody else's to write: `put` faults so a rebuild attempt
/// surfaces loudly instead of forking the index, and `del` is a harmless
/// no-op.
#[derive(Debug, Clone)]
pub struct TableIndexStore {
    /// The backing index table.
    table: String,
    /// Column of `table` holding each row's origin shard table name.
    shard_column: String,
}

impl TableIndexStore {
    /// A store over `table`, expecting the origin shard in `shard_table`.
    pub fn new(table: impl Into<String>) -> Self {
        TableIndexStore {
            table: table.into(),
            shard_column: "shard_table".to_string(),
        }
    }

    /// Use a different origin-shard column.
    pub fn with_shard_column(mut self, column: impl Into<String>) -> Self {
        self.shard_column = column.into();
        self
    }

    fn table_present(&self, conn: &Connection) -> Result<bool> {
        match conn.query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
            params![self.table],
            |_| Ok(()),
        ) {
            Ok(()) => Ok(true),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl IndexStore for TableIndexStore {
    fn exist(&self, conn: &Connection, _name: &str, _condition: &Condition) -> Result<bool> {
        if !self.table_present(conn)? {
            return Ok(false);
        }
        let rows: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(&self.table)),
            [],
            |row| row.get(0),
        )?;
        Ok(rows > 0)
    }

    fn count(&self, conn: &Connection, _name: &str, condition: &Condition) -> Result<u64> {
        let mut sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&self.table));
        let mut bind = Vec::new();
        if let Some((where_sql, params)) = condition.where_clause() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
            bind = params;
        }
        let rows: i64 = conn.query_row(&sql, params_from_iter(bind.iter()), |row| row.get(0))?;
        Ok(rows.max(0) as u64)
    }

    fn get(
        &self,
        conn: &Connection,
        _name: &str,
        condition: &Condition,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Item>> {
        let mut sql = format!("SELECT * FROM {}", quote_ident(&self.table));
        let mut bind = Vec::new();
        if let Some((where_sql, params)) = condition.where_clause() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
            bind = params;
        }
        if let Some(group_sql) = condition.group_clause() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&group_sql);
        }
        if let Some(order_sql) = condition.order_clause() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_sql);
        }
        sql.push_str(" LIMIT ? OFFSET ?");
        bind.push(Value::Int(limit as i64));
        bind.push(Value::Int(offset as i64));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bind.iter()), |row| Ok(Record::from_row(row)))?;

        let mut items = Vec::new();
        for row in rows {
            let record = row??;
            let mut item = Item::from_record(&record, condition, &self.table)?;
            // origin shard comes from the index row, not from the table name
            item.shard_table = record.text(&self.shard_column);
            items.push(item);
        }
        Ok(items)
    }

    fn put(
        &self,
        _conn: &Connection,
        _name: &str,
        _condition: &Condition,
        _items: Vec<Item>,
    ) -> Result<()> {
        Err(Error::Unsupported {
            store: "table".to_string(),
            operation: "put".to_string(),
        })
    }

    fn del(&self, _conn: &Connection, _name: &str, _condition: &Condition) -> Result<()> {
        // the external maintainer owns the data
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Filter;

    fn conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn item(pk: i64, shard: &str, order_col: &str, order_val: impl Into<Value>) -> Item {
        Item {
            primary_key: Value::Int(pk),
            shard_table: shard.to_string(),
            order: vec![SortKey::asc(order_col)],
            group: Vec::new(),
            order_values: Record::new().with(order_col, order_val),
            group_values: Record::new(),
        }
    }

    #[test]
    fn test_memory_put_appends() {
        let conn = conn();
        let store = MemoryIndexStore::new();
        let cond = Condition::new().with_primary_key("id");

        assert!(!store.exist(&conn, "t", &cond).unwrap());

        store
            .put(&conn, "t", &cond, vec![item(1, "t_0001", "id", 1i64)])
            .unwrap();
        store
            .put(&conn, "t", &cond, vec![item(2, "t_0002", "id", 2i64)])
            .unwrap();

        assert!(store.exist(&conn, "t", &cond).unwrap());
        assert_eq!(store.count(&conn, "t", &cond).unwrap(), 2);
    }

    #[test]
    fn test_memory_get_sorts_and_pages() {
        let conn = conn();
        let store = MemoryIndexStore::new();
        let cond = Condition::new().order_by("id", true).with_primary_key("id");

        // inserted out of order, across shards
        let items: Vec<Item> = [3i64, 1, 2]
            .iter()
            .map(|&n| item(n, if n % 2 == 0 { "t_0002" } else { "t_0001" }, "id", n))
            .collect();
        store.put(&conn, "t", &cond, items).unwrap();

        let page = store.get(&conn, "t", &cond, 0, 10).unwrap();
        let ids: Vec<i64> = page
            .iter()
            .map(|i| match &i.primary_key {
                Value::Int(v) => *v,
                other => panic!("unexpected key {:?}", other),
            })
            .collect();
        assert_eq!(ids, [3, 2, 1]);

        // window inside the set
        let page = store.get(&conn, "t", &cond, 1, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].primary_key, Value::Int(2));

        // limit clamps to the end
        let page = store.get(&conn, "t", &cond, 2, 10).unwrap();
        assert_eq!(page.len(), 1);

        // offset past the end is an empty page
        assert!(store.get(&conn, "t", &cond, 99, 10).unwrap().is_empty());
    }

    #[test]
    fn test_memory_unsorted_get_keeps_insertion_order() {
        let conn = conn();
        let store = MemoryIndexStore::new();
        let cond = Condition::new().with_primary_key("id");

        store
            .put(
                &conn,
                "t",
                &cond,
                vec![item(5, "t_0001", "id", 5i64), item(2, "t_0002", "id", 2i64)],
            )
            .unwrap();

        let page = store.get(&conn, "t", &cond, 0, 10).unwrap();
        assert_eq!(page[0].primary_key, Value::Int(5));
        assert_eq!(page[1].primary_key, Value::Int(2));
    }

    #[test]
    fn test_memory_group_is_unsupported() {
        let conn = conn();
        let store = MemoryIndexStore::new();
        let cond = Condition::new().group_by("name").with_primary_key("id");

        let err = store.get(&conn, "t", &cond, 0, 10).unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
        assert!(err.to_string().contains("memory"));
    }

    #[test]
    fn test_memory_mixed_order_types_fault() {
        let conn = conn();
        let store = MemoryIndexStore::new();
        let cond = Condition::new().order_by("k", false).with_primary_key("id");

        store
            .put(
                &conn,
                "t",
                &cond,
                vec![item(1, "t_0001", "k", 1i64), item(2, "t_0001", "k", "two")],
            )
            .unwrap();

        assert!(store.get(&conn, "t", &cond, 0, 10).is_err());
    }

    #[test]
    fn test_memory_del() {
        let conn = conn();
        let store = MemoryIndexStore::new();
        let cond = Condition::new().with_primary_key("id");

        store
            .put(&conn, "t", &cond, vec![item(1, "t_0001", "id", 1i64)])
            .unwrap();
        store.del(&conn, "t", &cond).unwrap();
        assert!(!store.exist(&conn, "t", &cond).unwrap());
        assert_eq!(store.count(&conn, "t", &cond).unwrap(), 0);
    }

    #[test]
    fn test_item_from_record_requires_key() {
        let cond = Condition::new().with_primary_key("id");

        let keyless = Record::new().with("name", "Ada");
        let err = Item::from_record(&keyless, &cond, "t_0001").unwrap_err();
        assert!(matches!(err, Error::MissingPrimaryKey { .. }));

        let null_key = Record::new().with("id", Value::Null);
        assert!(Item::from_record(&null_key, &cond, "t_0001").is_err());
    }

    fn seeded_index_table(conn: &Connection) {
        conn.execute_batch(
            r#"
CREATE TABLE example_index (
    id          INTEGER,
    name        TEXT,
    shard_table TEXT
);
INSERT INTO example_index (id, name, shard_table) VALUES
    (1, 'Ada',   'example_0001'),
    (2, 'Grace', 'example_0002'),
    (3, 'Ada',   'example_0003');
"#,
        )
        .unwrap();
    }

    #[test]
    fn test_table_store_exist() {
        let conn = conn();
        let store = TableIndexStore::new("example_index");
        let cond = Condition::new().with_primary_key("id");

        // missing table
        assert!(!store.exist(&conn, "example", &cond).unwrap());

        // empty table
        conn.execute_batch("CREATE TABLE example_index (id INTEGER, shard_table TEXT)")
            .unwrap();
        assert!(!store.exist(&conn, "example", &cond).unwrap());

        conn.execute(
            "INSERT INTO example_index (id, shard_table) VALUES (1, 'example_0001')",
            [],
        )
        .unwrap();
        assert!(store.exist(&conn, "example", &cond).unwrap());
    }

    #[test]
    fn test_table_store_get_and_count() {
        let conn = conn();
        seeded_index_table(&conn);
        let store = TableIndexStore::new("example_index");
        let cond = Condition::new()
            .filter(Filter::eq("name", "Ada"))
            .order_by("id", true)
            .with_primary_key("id");

        assert_eq!(store.count(&conn, "example", &cond).unwrap(), 2);

        let items = store.get(&conn, "example", &cond, 0, 10).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].primary_key, Value::Int(3));
        assert_eq!(items[0].shard_table, "example_0003");
        assert_eq!(items[1].primary_key, Value::Int(1));
        assert_eq!(items[1].shard_table, "example_0001");
    }

    #[test]
    fn test_table_store_pagination() {
        let conn = conn();
        seeded_index_table(&conn);
        let store = TableIndexStore::new("example_index");
        let cond = Condition::new().order_by("id", false).with_primary_key("id");

        let items = store.get(&conn, "example", &cond, 1, 1).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].primary_key, Value::Int(2));

        assert!(store.get(&conn, "example", &cond, 9, 5).unwrap().is_empty());
    }

    #[test]
    fn test_table_store_rejects_put() {
        let conn = conn();
        let store = TableIndexStore::new("example_index");
        let cond = Condition::new().with_primary_key("id");

        let err = store
            .put(&conn, "example", &cond, Vec::new())
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));

        // del is a harmless no-op
        store.del(&conn, "example", &cond).unwrap();
    }
}
