//! Row-wise null filter.

use arrow::array::{Array, BooleanArray};
use arrow::compute::{and, filter_record_batch, is_not_null};
use arrow::record_batch::RecordBatch;

use crate::error::Result;

/// Keep only the rows with a value in every column. A single null anywhere
/// drops the whole row.
pub fn drop_incomplete_rows(batch: &RecordBatch) -> Result<RecordBatch> {
    if batch.columns().iter().all(|column| column.null_count() == 0) {
        return Ok(batch.clone());
    }

    let mut mask = BooleanArray::from(vec![true; batch.num_rows()]);
    for column in batch.columns() {
        if column.null_count() == 0 {
            continue;
        }
        let present = is_not_null(column.as_ref())?;
        mask = and(&mask, &present)?;
    }
    Ok(filter_record_batch(batch, &mask)?)
}
