//! # Value Comparison
//!
//! Total-order comparison over [`Value`] pairs, used by the memory index
//! store to sort items the way a database ORDER BY would.
//!
//! The order is *closed*: only same-variant pairs compare. Integers order
//! numerically, floats by `partial_cmp` (a NaN pair falls back to equal so
//! sorting stays well-defined), text lexicographically by Unicode scalar
//! values, booleans with `false < true`, timestamps chronologically. Any
//! cross-variant pair - including anything against NULL - is a
//! [`Error::TypeMismatch`] fault rather than an invented ordering.

use std::cmp::Ordering;

use crate::condition::SortKey;
use crate::error::{Error, Result};
use crate::record::{Record, Value};

/// Compare two values of the same type.
///
/// # Errors
///
/// [`Error::TypeMismatch`] if the operands are different variants, or if
/// either is NULL.
pub fn compare(a: &Value, b: &Value) -> Result<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::Uint(x), Value::Uint(y)) => Ok(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => Ok(x.partial_cmp(y).unwrap_or(Ordering::Equal)),
        (Value::Text(x), Value::Text(y)) => Ok(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Ok(x.cmp(y)),
        (Value::Timestamp(x), Value::Timestamp(y)) => Ok(x.cmp(y)),
        _ => Err(Error::TypeMismatch {
            left: a.type_name().to_string(),
            right: b.type_name().to_string(),
        }),
    }
}

/// Compare two records under a multi-key sort order.
///
/// Keys apply left to right; the first non-equal key decides. A descending
/// key reverses its ordering. A column absent from either record compares as
/// NULL, which faults - sorted records must carry their order columns.
pub fn compare_records(a: &Record, b: &Record, keys: &[SortKey]) -> Result<Ordering> {
    for key in keys {
        let left = a.get(&key.column).unwrap_or(&Value::Null);
        let right = b.get(&key.column).unwrap_or(&Value::Null);
        let mut ordering = compare(left, right)?;
        if key.descending {
            ordering = ordering.reverse();
        }
        if ordering != Ordering::Equal {
            return Ok(ordering);
        }
    }
    Ok(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_type_ordering() {
        assert_eq!(
            compare(&Value::Int(1), &Value::Int(2)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare(&Value::Uint(5), &Value::Uint(5)).unwrap(),
            Ordering::Equal
        );
        assert_eq!(
            compare(&Value::Float(2.5), &Value::Float(1.0)).unwrap(),
            Ordering::Greater
        );
        assert_eq!(
            compare(
                &Value::Text("apple".to_string()),
                &Value::Text("banana".to_string())
            )
            .unwrap(),
            Ordering::Less
        );
        // false sorts before true
        assert_eq!(
            compare(&Value::Bool(false), &Value::Bool(true)).unwrap(),
            Ordering::Less
        );
        // chronological
        assert_eq!(
            compare(&Value::Timestamp(1_000), &Value::Timestamp(2_000)).unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn test_mixed_types_fault() {
        let err = compare(&Value::Int(1), &Value::Text("1".to_string())).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert_eq!(err.to_string(), "cannot compare integer with text");

        // NULL participates in no order, even against itself
        assert!(compare(&Value::Null, &Value::Null).is_err());
        assert!(compare(&Value::Int(1), &Value::Null).is_err());
    }

    #[test]
    fn test_nan_pair_is_equal() {
        assert_eq!(
            compare(&Value::Float(f64::NAN), &Value::Float(f64::NAN)).unwrap(),
            Ordering::Equal
        );
    }

    /// Multi-key: first key decides; descending reverses; ties fall through.
    #[test]
    fn test_multi_key_ordering() {
        let a = Record::new().with("dept", "eng").with("id", 3i64);
        let b = Record::new().with("dept", "eng").with("id", 7i64);
        let c = Record::new().with("dept", "ops").with("id", 1i64);

        let keys = vec![
            SortKey::asc("dept"),
            SortKey::desc("id"),
        ];

        // dept ties, id 3 vs 7 descending: 3 sorts after 7
        assert_eq!(compare_records(&a, &b, &keys).unwrap(), Ordering::Greater);
        // dept decides before id is consulted
        assert_eq!(compare_records(&a, &c, &keys).unwrap(), Ordering::Less);
        assert_eq!(compare_records(&a, &a, &keys).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_missing_order_column_faults() {
        let a = Record::new().with("id", 1i64);
        let b = Record::new().with("other", 2i64);
        let keys = vec![SortKey::asc("id")];
        assert!(compare_records(&a, &b, &keys).is_err());
    }
}
