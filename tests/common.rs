#![allow(dead_code)]

use rusqlite::Connection;
use shardlite::{MemoryIndexStore, ModuloStrategy, Record, ShardedTable};

/// Shard-table DDL shared by most suites.
pub const PEOPLE_DDL: &str = "(id INTEGER PRIMARY KEY, name TEXT, created_ms INTEGER)";

/// Names cycle over the seeded ids, so every name lands in several shards.
pub const NAMES: [&str; 5] = ["alice", "bob", "carol", "dave", "erin"];

pub fn people_table(shards: u32) -> ShardedTable {
    ShardedTable::new("people", ModuloStrategy::new(shards), MemoryIndexStore::new())
        .with_create_table(PEOPLE_DDL)
}

pub fn open_conn() -> Connection {
    Connection::open_in_memory().expect("open in-memory connection")
}

/// Person `id`: name cycles through [`NAMES`], `created_ms` decreases as `id`
/// grows - ordering by `created_ms` ascending is ordering by `id` descending.
pub fn person(id: i64) -> Record {
    Record::new()
        .with("id", id)
        .with("name", NAMES[(id - 1) as usize % NAMES.len()])
        .with("created_ms", 10_000 - id * 10)
}

pub fn seed_people(table: &ShardedTable, conn: &mut Connection, n: i64) {
    table.initialize(conn).expect("initialize registry");
    let records: Vec<Record> = (1..=n).map(person).collect();
    table.batch_insert(conn, &records).expect("seed people");
}

pub fn ids(records: &[Record]) -> Vec<i64> {
    records.iter().map(|r| r.int("id")).collect()
}

pub fn rows_in(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| {
        row.get(0)
    })
    .expect("count rows")
}
