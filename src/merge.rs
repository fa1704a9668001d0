//! Left outer join of window tables on (TimeGroup, SecurityID).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::flatten::FlatTable;

/// Append the columns of `right` to `left`, matching rows by key.
///
/// Every left row is kept in order. Left rows without a match receive NaN for
/// all of `right`'s columns. Duplicate keys in `right` are a contract violation.
pub fn left_join(mut left: FlatTable, right: FlatTable) -> Result<FlatTable> {
    let width = right.width();
    let mut index: HashMap<(i64, Arc<str>), Vec<f64>> = HashMap::with_capacity(right.rows.len());
    for row in right.rows {
        if row.values.len() != width {
            return Err(Error::SchemaMismatch {
                security_id: row.security_id.to_string(),
                detail: format!(
                    "row at {} has {} values for {} columns",
                    row.time_group,
                    row.values.len(),
                    width
                ),
            });
        }
        let key = (row.time_group, Arc::clone(&row.security_id));
        if index.insert(key, row.values).is_some() {
            return Err(Error::SchemaMismatch {
                security_id: row.security_id.to_string(),
                detail: format!("duplicate join key at {}", row.time_group),
            });
        }
    }

    for row in &mut left.rows {
        match index.remove(&(row.time_group, Arc::clone(&row.security_id))) {
            Some(values) => row.values.extend(values),
            None => row.values.extend(std::iter::repeat(f64::NAN).take(width)),
        }
    }
    left.columns.extend(right.columns);
    Ok(left)
}

/// Join the full-bucket table with each trailing table in order.
pub fn merge_windows(full: FlatTable, trailing: Vec<FlatTable>) -> Result<FlatTable> {
    trailing.into_iter().try_fold(full, left_join)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::KeyedRow;

    fn row(ts: i64, sec: &Arc<str>, values: &[f64]) -> KeyedRow {
        KeyedRow {
            time_group: ts,
            security_id: Arc::clone(sec),
            values: values.to_vec(),
        }
    }

    #[test]
    fn unmatched_left_rows_get_missing_columns() {
        let sec: Arc<str> = Arc::from("600519");
        let full = FlatTable {
            columns: vec!["x".into()],
            rows: vec![row(0, &sec, &[1.0]), row(600_000, &sec, &[2.0])],
        };
        let trailing = FlatTable {
            columns: vec!["x_150".into(), "y_150".into()],
            rows: vec![row(600_000, &sec, &[20.0, 21.0])],
        };

        let merged = left_join(full, trailing).expect("join");
        assert_eq!(merged.columns, vec!["x", "x_150", "y_150"]);
        assert_eq!(merged.rows.len(), 2);
        assert_eq!(merged.rows[0].values[0], 1.0);
        assert!(merged.rows[0].values[1].is_nan());
        assert!(merged.rows[0].values[2].is_nan());
        assert_eq!(merged.rows[1].values, vec![2.0, 20.0, 21.0]);
    }

    #[test]
    fn right_only_keys_are_dropped() {
        let sec: Arc<str> = Arc::from("A");
        let full = FlatTable {
            columns: vec!["x".into()],
            rows: vec![row(0, &sec, &[1.0])],
        };
        let trailing = FlatTable {
            columns: vec!["x_450".into()],
            rows: vec![row(600_000, &sec, &[5.0])],
        };
        let merged = merge_windows(full, vec![trailing]).expect("merge");
        assert_eq!(merged.rows.len(), 1);
        assert!(merged.rows[0].values[1].is_nan());
    }

    #[test]
    fn key_includes_security() {
        let a: Arc<str> = Arc::from("A");
        let b: Arc<str> = Arc::from("B");
        let full = FlatTable {
            columns: vec!["x".into()],
            rows: vec![row(0, &a, &[1.0])],
        };
        let trailing = FlatTable {
            columns: vec!["x_300".into()],
            rows: vec![row(0, &b, &[9.0])],
        };
        let merged = left_join(full, trailing).expect("join");
        assert!(merged.rows[0].values[1].is_nan());
    }

    #[test]
    fn duplicate_right_keys_fail() {
        let sec: Arc<str> = Arc::from("A");
        let full = FlatTable {
            columns: vec!["x".into()],
            rows: vec![row(0, &sec, &[1.0])],
        };
        let trailing = FlatTable {
            columns: vec!["x_300".into()],
            rows: vec![row(0, &sec, &[1.0]), row(0, &sec, &[2.0])],
        };
        assert!(matches!(
            left_join(full, trailing),
            Err(Error::SchemaMismatch { .. })
        ));
    }
}
