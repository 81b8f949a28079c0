//! # Error Handling for Shardlite
//!
//! This module defines the error types used throughout shardlite. We use a single
//! error enum ([`Error`]) to represent all possible failure modes, which simplifies
//! error handling for library users.
//!
//! ## Rust Pattern: thiserror
//!
//! We use the `thiserror` crate to derive `std::error::Error` implementations.
//! This provides:
//! - Automatic `Display` implementation from the `#[error(...)]` attributes
//! - Automatic `From` implementations from the `#[from]` attributes
//! - Proper error source chaining via `#[source]`
//!
//! ## Why a Single Error Type?
//!
//! Libraries commonly choose between:
//! 1. **Single enum** (our choice): Easy to match on, simple function signatures
//! 2. **Separate error types per module**: More precise, but verbose
//!
//! For shardlite, a single enum works well because every public operation sits
//! on top of the same SQLite connection: most failures are either a SQLite
//! error or a small set of sharding-specific faults, and users typically want
//! to handle them uniformly (log and propagate).
//!
//! ## What Is NOT an Error
//!
//! Two conditions are deliberately absent from this enum:
//!
//! - **Not found**: a `FindOne` that matches nothing returns `Ok(None)`.
//!   Absence is a normal answer, not a failure.
//! - **Index exhaustion**: the index build loop pages each shard until a page
//!   comes back empty. The empty page terminates the loop; it never surfaces
//!   as an error value.

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in shardlite operations.
///
/// Each variant represents a distinct failure mode. The `#[error(...)]`
/// attribute defines the `Display` message shown when the error is printed.
///
/// # Example
///
/// ```rust,ignore
/// use shardlite::{Error, Result};
///
/// fn example() -> Result<()> {
///     // Errors can be created directly
///     let err = Error::TypeMismatch {
///         left: "integer".to_string(),
///         right: "text".to_string(),
///     };
///
///     // Or propagated with ?
///     some_operation()?;
///
///     Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Input Faults (caller supplied something unorderable or unroutable)
    // =========================================================================

    /// Two values of different types were compared.
    ///
    /// # When This Happens
    ///
    /// The comparator orders values of the *same* type only: integers with
    /// integers, text with text, and so on. Sorting index items whose order
    /// column holds mixed types (for example an `id` that is an integer in one
    /// shard and text in another) raises this fault instead of inventing an
    /// arbitrary cross-type order.
    ///
    /// `NULL` participates in no order, so comparing it to anything (including
    /// another `NULL`) also raises this fault.
    ///
    /// # Recovery
    ///
    /// Fix the shard tables so the ordered column has one storage class, or
    /// order by a different column.
    #[error("cannot compare {left} with {right}")]
    TypeMismatch {
        /// Type name of the left operand
        left: String,
        /// Type name of the right operand
        right: String,
    },

    /// The shard strategy could not compute a suffix for a record.
    ///
    /// # When This Happens
    ///
    /// The modulo strategy reads the shard column as an integer. A record that
    /// is missing the column, or holds a value with no integer form (text that
    /// does not parse, a float, a boolean), cannot be routed.
    ///
    /// # Recovery
    ///
    /// Routing is per-record, so nothing was written. Fix the record and retry.
    #[error("strategy error on column '{column}': {reason}")]
    Strategy {
        /// The shard column the strategy read
        column: String,
        /// Why the suffix could not be computed
        reason: String,
    },

    /// An index store was asked for an operation it does not implement.
    ///
    /// # When This Happens
    ///
    /// - The memory store is asked to serve a grouped query. Grouping needs
    ///   the backing engine's GROUP BY; a sorted slice cannot express it.
    /// - The table-backed store is asked to `put` items. That store reads an
    ///   index maintained by an external process; accepting writes would
    ///   silently fork it.
    ///
    /// # Recovery
    ///
    /// Use a store that supports the operation, or drop the grouping from the
    /// query.
    #[error("{store} index store does not support {operation}")]
    Unsupported {
        /// Which store rejected the operation
        store: String,
        /// The rejected operation
        operation: String,
    },

    // =========================================================================
    // Internal Errors (investigate the schema or the database)
    // =========================================================================

    /// A shard table returned a row without its primary key column.
    ///
    /// # When This Happens
    ///
    /// The index build selects the primary key from every shard row; the key
    /// is the one column an index item cannot exist without. A row where it
    /// is absent or NULL means the shard table's schema does not match the
    /// engine's configuration.
    #[error("shard table '{table}' returned a row without primary key '{column}'")]
    MissingPrimaryKey {
        /// The shard table that produced the row
        table: String,
        /// The configured primary key column
        column: String,
    },

    /// SQLite operation failed.
    ///
    /// # When This Happens
    ///
    /// This wraps any error from the `rusqlite` crate:
    /// - Database file is locked by another process
    /// - Disk is full
    /// - A queried shard table does not exist
    /// - SQL syntax error (indicates a bug in shardlite)
    ///
    /// The `#[from]` attribute lets the `?` operator convert rusqlite errors
    /// automatically.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema mismatch between the database and the engine configuration.
    ///
    /// # When This Happens
    ///
    /// - A shard row holds a storage class the value model has no room for
    ///   (BLOB columns are not representable)
    /// - The shard registry table was modified outside shardlite
    #[error("schema error: {0}")]
    Schema(String),

    // =========================================================================
    // Service Errors (async facade lifecycle)
    // =========================================================================

    /// The background shard service has shut down.
    ///
    /// # When This Happens
    ///
    /// A request was sent through a [`crate::Shardlite`] handle after the
    /// worker thread stopped, either because `shutdown()` was called or
    /// because every handle was dropped.
    #[error("shard service stopped")]
    ServiceStopped,
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
///
/// Defining `type Result<T> = std::result::Result<T, Error>` means functions
/// return `Result<Foo>` instead of `Result<Foo, Error>` - less typing, and the
/// standard pattern used by most Rust libraries.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
