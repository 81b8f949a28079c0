//! # Shardlite - Horizontal Sharding for SQLite
//!
//! Shardlite spreads the rows of one logical table across many physical
//! shard tables and answers ordered, paginated queries over all of them as
//! if they were one. It provides:
//!
//! - **Pluggable routing**: a strategy maps each record to its shard table
//! - **Shard registry**: provisioned tables are tracked and enumerable
//! - **Cross-shard queries**: ordered, filtered, paginated, with totals
//! - **Secondary indexes**: per-query-shape item caches, rebuilt on demand
//! - **Async facade**: a `Clone`-able Tokio handle over a dedicated thread
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Async API (Shardlite)                      │
//! │              (insert, batch_insert, find, count)                │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Engine (ShardedTable)                       │
//! │                                                                 │
//! │  ┌─────────────┐  ┌──────────────┐  ┌───────────────────────┐  │
//! │  │  Strategy   │  │   Registry   │  │      IndexStore       │  │
//! │  │  (routing)  │  │ (shard list) │  │ (ordered item cache)  │  │
//! │  └─────────────┘  └──────────────┘  └───────────────────────┘  │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           SQLite                                │
//! │            example_0001  example_0002  example_0003 ...         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! These invariants are enforced throughout the codebase and must never be violated:
//!
//! 1. **Stable routing**: a record's shard depends only on its shard-column value
//! 2. **Registered visibility**: queries see exactly the shards in the registry
//! 3. **Deterministic fan-out**: shards enumerate in shard-name order everywhere
//! 4. **Page math**: `find` returns the `[offset, offset+limit)` window of the
//!    totally ordered match set, plus the true total
//! 5. **One build per shape**: a query shape's index builds at most once until
//!    it is invalidated, even under concurrent readers
//!
//! ## Module Organization
//!
//! - [`error`]: Custom error types for all failure modes
//! - [`record`]: Loosely typed rows ([`Value`], [`Record`]) and SQL mapping
//! - [`compare`]: Closed comparator over values and multi-key record ordering
//! - [`condition`]: Query descriptions (filter, order, group) and fingerprints
//! - [`registry`]: Shard registry DDL, provisioning, and the shard cache
//! - [`strategy`]: Routing strategies ([`ModuloStrategy`], closures)
//! - [`store`]: Index stores (in-memory and table-backed)
//! - [`engine`]: The sharded table engine (main synchronous entry point)
//! - [`api`]: Async API (main entry point)

// =============================================================================
// Module Declarations
// =============================================================================
// Rust pattern: `mod` declares a module, making its contents available.
// Public modules (`pub mod`) are part of the library's API.

/// Error types for shardlite operations.
///
/// This module defines all error variants that can occur while routing,
/// indexing, or querying. Using a single error enum simplifies error
/// handling for callers.
pub mod error;

/// Loosely typed records.
///
/// This module defines [`Value`] and [`Record`]: the row representation that
/// flows between callers, the engine, and SQLite. Accessors coerce the way
/// dynamic row data is usually consumed; comparison does not.
pub mod record;

/// Value and record ordering.
///
/// This module implements the closed comparator used for index ordering:
/// same-type values compare, everything else is a type error rather than an
/// arbitrary ordering.
pub mod compare;

/// Query conditions.
///
/// This module describes what a query wants - projection, filter, order,
/// grouping - independently of any shard, and fingerprints the shape for
/// index-cache lookup.
pub mod condition;

/// Shard registry.
///
/// This module owns the `{name}_shards` table: the durable list of
/// provisioned shard tables, plus the engine's read-through cache of it.
pub mod registry;

/// Routing strategies.
///
/// This module defines the [`ShardStrategy`] trait and the built-in modulo
/// strategy. Closures with the right signature are strategies too.
pub mod strategy;

/// Index stores.
///
/// This module defines the [`IndexStore`] trait and two implementations:
/// a process-local in-memory store and a read-only adapter over an
/// externally maintained index table.
pub mod store;

/// The sharded table engine.
///
/// This module ties routing, the registry, and the index store together
/// into [`ShardedTable`]: insert and batch-insert on the write path,
/// find / find_one / count on the read path.
///
/// The main synchronous entry point is [`ShardedTable`](engine::ShardedTable).
pub mod engine;

/// Async API for shardlite.
///
/// This module wraps the engine and its SQLite connection behind Tokio
/// channels on a dedicated thread, enabling non-blocking usage from async
/// applications.
///
/// The main entry point is [`Shardlite`](api::Shardlite).
pub mod api;

// =============================================================================
// Re-exports
// =============================================================================
// Rust pattern: Re-export commonly used types at the crate root for convenience.
// Users can write `use shardlite::Record` instead of `use shardlite::record::Record`.

pub use api::Shardlite;
pub use engine::ShardedTable;
pub use error::{Error, Result};

// Re-export the query vocabulary
pub use condition::{Condition, Filter, Fingerprint, SortKey};
pub use record::{Record, Value};

// Re-export the pluggable pieces
pub use registry::ShardInfo;
pub use store::{IndexStore, Item, MemoryIndexStore, TableIndexStore};
pub use strategy::{ModuloStrategy, ShardStrategy};
