//! Two-level to flat column naming.

use crate::aggregate::{KeyedRow, WindowAggregate};
use crate::schema::{ColumnLabel, SECURITY_ID, TIME_GROUP};

/// Header entry of an aggregate table before flattening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderLabel {
    /// Join key, passed through unchanged.
    Key(&'static str),
    Feature(ColumnLabel),
}

/// `{base}_{stat}` or `{base}_{stat}_{suffix}`.
pub fn flat_name(label: &ColumnLabel, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) => format!("{}_{}_{}", label.base, label.stat, suffix),
        None => format!("{}_{}", label.base, label.stat),
    }
}

pub fn flatten_labels(header: &[HeaderLabel], suffix: Option<&str>) -> Vec<String> {
    header
        .iter()
        .map(|label| match label {
            HeaderLabel::Key(name) => (*name).to_string(),
            HeaderLabel::Feature(label) => flat_name(label, suffix),
        })
        .collect()
}

/// Aggregate rows under single-level column names.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatTable {
    /// Feature column names; the key columns are implicit.
    pub columns: Vec<String>,
    pub rows: Vec<KeyedRow>,
}

impl FlatTable {
    pub fn width(&self) -> usize {
        self.columns.len()
    }
}

/// Name an aggregate's columns with its window suffix.
pub fn flatten(aggregate: WindowAggregate) -> FlatTable {
    let mut header = vec![HeaderLabel::Key(TIME_GROUP), HeaderLabel::Key(SECURITY_ID)];
    header.extend(aggregate.labels.iter().copied().map(HeaderLabel::Feature));

    let suffix = aggregate.variant.suffix();
    let columns = flatten_labels(&header, suffix.as_deref())
        .into_iter()
        .skip(2)
        .collect();

    FlatTable {
        columns,
        rows: aggregate.rows,
    }
}
