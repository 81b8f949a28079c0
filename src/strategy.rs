//! # Shard Routing Strategies
//!
//! A strategy maps one record to the suffix of its physical shard table: the
//! engine appends `_{suffix}` to the logical table name. Strategies are
//! deterministic - the same key must always land on the same shard, or reads
//! and writes drift apart.
//!
//! The trait is object-safe and `Send + Sync` so an engine holding a boxed
//! strategy can move behind the async service facade. Plain closures
//! implement it too:
//!
//! ```rust
//! use shardlite::{Record, ShardStrategy};
//!
//! let by_parity = |record: &Record, column: &str| -> shardlite::Result<String> {
//!     Ok(if record.int(column) % 2 == 0 { "even" } else { "odd" }.to_string())
//! };
//! let record = Record::new().with("id", 3i64);
//! assert_eq!(by_parity.shard_suffix(&record, "id").unwrap(), "odd");
//! ```

use crate::error::{Error, Result};
use crate::record::Record;

/// Routes records to shard-table suffixes.
pub trait ShardStrategy: Send + Sync {
    /// Compute the shard suffix for `record`, reading `column` as the key.
    ///
    /// # Errors
    ///
    /// [`Error::Strategy`] when no suffix can be computed, e.g. the column is
    /// absent or its value has no usable form.
    fn shard_suffix(&self, record: &Record, column: &str) -> Result<String>;
}

impl<F> ShardStrategy for F
where
    F: Fn(&Record, &str) -> Result<String> + Send + Sync,
{
    fn shard_suffix(&self, record: &Record, column: &str) -> Result<String> {
        self(record, column)
    }
}

/// The reference strategy: modulo over an integer key.
///
/// The suffix is `key mod N` rendered zero-padded to four digits, with 0
/// wrapped to `N` so suffixes run `0001..=000N` and no `_0000` table exists.
/// The remainder is Euclidean, so negative keys still land in range.
///
/// # Example
///
/// ```rust
/// use shardlite::{ModuloStrategy, Record, ShardStrategy};
///
/// let strategy = ModuloStrategy::new(4);
/// let record = Record::new().with("id", 7i64);
/// assert_eq!(strategy.shard_suffix(&record, "id").unwrap(), "0003");
/// ```
#[derive(Debug, Clone)]
pub struct ModuloStrategy {
    shards: u32,
}

impl ModuloStrategy {
    /// A strategy that spreads keys over `shards` tables.
    ///
    /// # Panics
    ///
    /// Panics if `shards` is zero.
    pub fn new(shards: u32) -> Self {
        assert!(shards > 0, "shard count must be positive");
        ModuloStrategy { shards }
    }

    /// Number of shard tables this strategy spreads over.
    pub fn shards(&self) -> u32 {
        self.shards
    }
}

impl ShardStrategy for ModuloStrategy {
    fn shard_suffix(&self, record: &Record, column: &str) -> Result<String> {
        let value = record.get(column).ok_or_else(|| Error::Strategy {
            column: column.to_string(),
            reason: "record is missing the shard column".to_string(),
        })?;
        let key = value.as_integer().ok_or_else(|| Error::Strategy {
            column: column.to_string(),
            reason: format!("{} value has no integer form", value.type_name()),
        })?;

        let shards = i64::from(self.shards);
        let mut slot = key.rem_euclid(shards);
        if slot == 0 {
            slot = shards;
        }
        Ok(format!("{:04}", slot))
    }
}
