//! # Query Conditions
//!
//! A [`Condition`] is the structured query shape the engine accepts: a
//! projection, an optional boolean filter, a multi-key sort order, and a
//! grouping list. Conditions arrive already structured - shardlite has no SQL
//! parser - and render themselves into parameterized SQL fragments when a
//! shard or the index table is queried.
//!
//! ## Fingerprints
//!
//! The index store caches one item list per *query shape*. The shape is the
//! logical table name plus filter, order, and grouping; the selected columns
//! and the pagination window deliberately do not participate, so paging
//! through a result set reuses one index entry. The fingerprint is an
//! xxh3-64 hash over a canonical byte encoding of that shape.

use std::fmt;

use xxhash_rust::xxh3::xxh3_64;

use crate::record::Value;

// =============================================================================
// Identifier Quoting
// =============================================================================

/// Quote an identifier for SQLite (double quotes, doubled internally).
///
/// Table and column names come from engine configuration and condition
/// construction, not from end-user strings, but quoting keeps names with
/// spaces or keywords working.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// =============================================================================
// Sort Keys
// =============================================================================

/// One key of a multi-key sort order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Column to order by.
    pub column: String,
    /// True for descending.
    pub descending: bool,
}

impl SortKey {
    /// Ascending order on a column.
    pub fn asc(column: impl Into<String>) -> Self {
        SortKey {
            column: column.into(),
            descending: false,
        }
    }

    /// Descending order on a column.
    pub fn desc(column: impl Into<String>) -> Self {
        SortKey {
            column: column.into(),
            descending: true,
        }
    }

    /// SQL fragment, e.g. `"id" DESC`.
    fn sql(&self) -> String {
        if self.descending {
            format!("{} DESC", quote_ident(&self.column))
        } else {
            quote_ident(&self.column)
        }
    }
}

// =============================================================================
// Filters
// =============================================================================

/// Comparison operator of a filter leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CmpOp {
    fn sql(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
        }
    }

    /// Tag byte for the canonical encoding.
    fn tag(self) -> u8 {
        match self {
            CmpOp::Eq => 1,
            CmpOp::Ne => 2,
            CmpOp::Gt => 3,
            CmpOp::Ge => 4,
            CmpOp::Lt => 5,
            CmpOp::Le => 6,
        }
    }
}

/// A boolean filter over one table's columns: comparisons and conjunctions.
///
/// # Example
///
/// ```rust
/// use shardlite::Filter;
///
/// let f = Filter::and([
///     Filter::eq("name", "Ada"),
///     Filter::gt("id", 10i64),
/// ]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column op value`.
    Cmp {
        column: String,
        op: CmpOp,
        value: Value,
    },
    /// All sub-filters must hold.
    And(Vec<Filter>),
}

impl Filter {
    /// `column = value`.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::cmp(column, CmpOp::Eq, value)
    }

    /// `column <> value`.
    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::cmp(column, CmpOp::Ne, value)
    }

    /// `column > value`.
    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::cmp(column, CmpOp::Gt, value)
    }

    /// `column >= value`.
    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::cmp(column, CmpOp::Ge, value)
    }

    /// `column < value`.
    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::cmp(column, CmpOp::Lt, value)
    }

    /// `column <= value`.
    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::cmp(column, CmpOp::Le, value)
    }

    /// Conjunction of filters.
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    fn cmp(column: impl Into<String>, op: CmpOp, value: impl Into<Value>) -> Self {
        Filter::Cmp {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Render to a SQL predicate, pushing bind values onto `params`.
    pub(crate) fn render(&self, sql: &mut String, params: &mut Vec<Value>) {
        match self {
            Filter::Cmp { column, op, value } => {
                sql.push_str(&quote_ident(column));
                sql.push(' ');
                sql.push_str(op.sql());
                sql.push_str(" ?");
                params.push(value.clone());
            }
            Filter::And(filters) => {
                if filters.is_empty() {
                    // an empty conjunction is vacuously true
                    sql.push_str("1 = 1");
                    return;
                }
                sql.push('(');
                for (idx, filter) in filters.iter().enumerate() {
                    if idx > 0 {
                        sql.push_str(" AND ");
                    }
                    filter.render(sql, params);
                }
                sql.push(')');
            }
        }
    }

    /// Canonical byte encoding, values inlined. Feeds the fingerprint.
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Filter::Cmp { column, op, value } => {
                out.push(b'c');
                out.push(op.tag());
                out.extend_from_slice(column.as_bytes());
                out.push(0);
                value.encode_canonical(out);
            }
            Filter::And(filters) => {
                out.push(b'a');
                out.extend_from_slice(&(filters.len() as u64).to_le_bytes());
                for filter in filters {
                    filter.encode(out);
                }
            }
        }
    }
}

// =============================================================================
// Fingerprint
// =============================================================================

/// Identity of a query shape: xxh3-64 over the canonical encoding of
/// logical name + filter + order + grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Construct from a raw hash value.
    pub fn from_raw(hash: u64) -> Self {
        Fingerprint(hash)
    }

    /// The raw hash value.
    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Fixed-width hex reads well in logs
        write!(f, "{:016x}", self.0)
    }
}

// =============================================================================
// Condition
// =============================================================================

/// The structured shape of one query: projection, filter, order, grouping.
///
/// A condition is a value object - build it once, pass it by reference.
/// The engine stamps its configured primary-key column onto a private copy
/// before the condition reaches the index store.
///
/// # Example
///
/// ```rust
/// use shardlite::{Condition, Filter};
///
/// let cond = Condition::new()
///     .select(["id", "name"])
///     .filter(Filter::gt("id", 100i64))
///     .order_by("id", true);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Condition {
    /// Primary-key column, stamped by the engine.
    pub(crate) primary_key: String,
    /// Projected columns; empty means all.
    pub(crate) selects: Vec<String>,
    /// Optional filter; successive `filter` calls conjoin.
    pub(crate) filter: Option<Filter>,
    /// Multi-key sort order.
    pub(crate) order: Vec<SortKey>,
    /// Grouping columns.
    pub(crate) group: Vec<String>,
}

impl Condition {
    /// An unconstrained condition: all columns, no filter, no order.
    pub fn new() -> Self {
        Condition::default()
    }

    /// Set the projected columns.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selects = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a filter. Calling this more than once conjoins the filters.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => Filter::and([existing, filter]),
            None => filter,
        });
        self
    }

    /// Append a sort key.
    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order.push(SortKey {
            column: column.into(),
            descending,
        });
        self
    }

    /// Append a grouping column.
    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group.push(column.into());
        self
    }

    /// Copy with the engine's primary-key column stamped on.
    pub(crate) fn with_primary_key(&self, primary_key: &str) -> Condition {
        let mut cond = self.clone();
        cond.primary_key = primary_key.to_string();
        cond
    }

    /// Fingerprint of this shape under a logical table name.
    pub(crate) fn fingerprint(&self, name: &str) -> Fingerprint {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(name.as_bytes());
        bytes.push(0xff);
        if let Some(filter) = &self.filter {
            filter.encode(&mut bytes);
        }
        bytes.push(0xff);
        for key in &self.order {
            bytes.extend_from_slice(key.column.as_bytes());
            bytes.push(u8::from(key.descending));
            bytes.push(0);
        }
        bytes.push(0xff);
        for column in &self.group {
            bytes.extend_from_slice(column.as_bytes());
            bytes.push(0);
        }
        Fingerprint(xxh3_64(&bytes))
    }

    /// The filter as a bare SQL predicate plus bind values, if any.
    pub(crate) fn where_clause(&self) -> Option<(String, Vec<Value>)> {
        let filter = self.filter.as_ref()?;
        let mut sql = String::new();
        let mut params = Vec::new();
        filter.render(&mut sql, &mut params);
        Some((sql, params))
    }

    /// The ORDER BY column list, e.g. `"id" DESC, "name"`.
    pub(crate) fn order_clause(&self) -> Option<String> {
        if self.order.is_empty() {
            return None;
        }
        Some(
            self.order
                .iter()
                .map(SortKey::sql)
                .collect::<Vec<_>>()
                .join(", "),
        )
    }

    /// The GROUP BY column list.
    pub(crate) fn group_clause(&self) -> Option<String> {
        if self.group.is_empty() {
            return None;
        }
        Some(
            self.group
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
        )
    }

    /// The projection list. Empty selects render as `*`. When `require` is
    /// given and absent from a non-empty projection it is prepended, so a
    /// caller that keys rows by primary key always gets the key back.
    pub(crate) fn select_list(&self, require: Option<&str>) -> String {
        if self.selects.is_empty() {
            return "*".to_string();
        }
        let mut columns: Vec<&str> = Vec::with_capacity(self.selects.len() + 1);
        if let Some(required) = require {
            if !self.selects.iter().any(|c| c == required) {
                columns.push(required);
            }
        }
        columns.extend(self.selects.iter().map(String::as_str));
        columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_renders_parameterized_sql() {
        let filter = Filter::and([Filter::eq("name", "Ada"), Filter::gt("id", 10i64)]);
        let mut sql = String::new();
        let mut params = Vec::new();
        filter.render(&mut sql, &mut params);

        assert_eq!(sql, "(\"name\" = ? AND \"id\" > ?)");
        assert_eq!(
            params,
            vec![Value::Text("Ada".to_string()), Value::Int(10)]
        );
    }

    #[test]
    fn test_empty_conjunction_is_true() {
        let mut sql = String::new();
        let mut params = Vec::new();
        Filter::and([]).render(&mut sql, &mut params);
        assert_eq!(sql, "1 = 1");
        assert!(params.is_empty());
    }

    #[test]
    fn test_condition_clauses() {
        let cond = Condition::new()
            .select(["name", "id"])
            .filter(Filter::eq("name", "Ada"))
            .order_by("id", true)
            .order_by("name", false)
            .group_by("name");

        let (where_sql, params) = cond.where_clause().unwrap();
        assert_eq!(where_sql, "\"name\" = ?");
        assert_eq!(params.len(), 1);
        assert_eq!(cond.order_clause().unwrap(), "\"id\" DESC, \"name\"");
        assert_eq!(cond.group_clause().unwrap(), "\"name\"");
        assert_eq!(cond.select_list(None), "\"name\", \"id\"");
        // the required key is prepended when missing, kept in place when not
        assert_eq!(cond.select_list(Some("pk")), "\"pk\", \"name\", \"id\"");
        assert_eq!(cond.select_list(Some("id")), "\"name\", \"id\"");
    }

    #[test]
    fn test_chained_filters_conjoin() {
        let cond = Condition::new()
            .filter(Filter::eq("a", 1i64))
            .filter(Filter::eq("b", 2i64));
        let (sql, params) = cond.where_clause().unwrap();
        assert_eq!(sql, "(\"a\" = ? AND \"b\" = ?)");
        assert_eq!(params.len(), 2);
    }

    /// The fingerprint identifies filter + order + group, nothing else.
    #[test]
    fn test_fingerprint_ignores_selects() {
        let base = Condition::new()
            .filter(Filter::eq("name", "Ada"))
            .order_by("id", true);
        let with_selects = base.clone().select(["id", "name"]);

        assert_eq!(base.fingerprint("example"), with_selects.fingerprint("example"));
    }

    #[test]
    fn test_fingerprint_sensitivity() {
        let base = Condition::new().filter(Filter::eq("name", "Ada"));

        let different_value = Condition::new().filter(Filter::eq("name", "Grace"));
        assert_ne!(
            base.fingerprint("example"),
            different_value.fingerprint("example")
        );

        let different_op = Condition::new().filter(Filter::ne("name", "Ada"));
        assert_ne!(
            base.fingerprint("example"),
            different_op.fingerprint("example")
        );

        let different_order = base.clone().order_by("id", false);
        assert_ne!(
            base.fingerprint("example"),
            different_order.fingerprint("example")
        );

        // same shape under another logical table is another index entry
        assert_ne!(base.fingerprint("example"), base.fingerprint("other"));

        // ascending and descending on the same column differ
        let asc = Condition::new().order_by("id", false);
        let desc = Condition::new().order_by("id", true);
        assert_ne!(asc.fingerprint("example"), desc.fingerprint("example"));
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }
}
