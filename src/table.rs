//! Arrow row buffer for feature tables.

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Builder, Int64Builder, StringBuilder, TimestampMillisecondBuilder};
use arrow::datatypes::{DataType, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;

use crate::error::{Error, Result};
use crate::flatten::FlatTable;
use crate::schema::FeatureSchema;

/// Collects keyed feature rows column-wise and finishes them into a
/// `RecordBatch` with the schema's exact column set. NaN is written as null.
pub struct RowBuffer {
    schema: SchemaRef,
    security_id: StringBuilder,
    time_group: TimestampMillisecondBuilder,
    builders: Vec<ColumnBuilder>,
}

impl RowBuffer {
    pub fn new(schema: SchemaRef, capacity: usize) -> Result<Self> {
        let fields = schema.fields();
        if fields.len() < 2 {
            return Err(Error::InvalidConfig(
                "feature schema needs the two key columns".into(),
            ));
        }
        match fields[1].data_type() {
            DataType::Timestamp(TimeUnit::Millisecond, None) => {}
            other => {
                return Err(Error::InvalidConfig(format!(
                    "time key must be a millisecond timestamp, got {other:?}"
                )))
            }
        }
        let mut builders = Vec::with_capacity(fields.len() - 2);
        for field in fields.iter().skip(2) {
            builders.push(ColumnBuilder::new(field.data_type(), capacity)?);
        }
        Ok(Self {
            schema,
            security_id: StringBuilder::with_capacity(capacity, capacity * 8),
            time_group: TimestampMillisecondBuilder::with_capacity(capacity),
            builders,
        })
    }

    pub fn append_row(&mut self, security_id: &str, time_group: i64, values: &[f64]) -> Result<()> {
        if values.len() != self.builders.len() {
            return Err(Error::SchemaMismatch {
                security_id: security_id.to_string(),
                detail: format!(
                    "row has {} feature values, schema has {}",
                    values.len(),
                    self.builders.len()
                ),
            });
        }
        self.security_id.append_value(security_id);
        self.time_group.append_value(time_group);
        for (builder, &value) in self.builders.iter_mut().zip(values) {
            builder.append(value);
        }
        Ok(())
    }

    /// Finish the buffered rows. An empty buffer yields an empty batch with
    /// the full schema.
    pub fn finish(&mut self) -> Result<RecordBatch> {
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.builders.len() + 2);
        arrays.push(Arc::new(self.security_id.finish()));
        arrays.push(Arc::new(self.time_group.finish()));
        arrays.extend(self.builders.iter_mut().map(|b| b.finish()));
        let batch = RecordBatch::try_new(Arc::clone(&self.schema), arrays)?;
        Ok(batch)
    }
}

/// Build a partition's batch from its merged table, checking that the merged
/// columns are exactly the schema's feature columns in order.
pub fn to_record_batch(
    security_id: &str,
    table: &FlatTable,
    schema: &FeatureSchema,
) -> Result<RecordBatch> {
    let expected = schema.columns().len();
    if table.columns.len() != expected {
        return Err(Error::SchemaMismatch {
            security_id: security_id.to_string(),
            detail: format!(
                "merged table has {} feature columns, schema has {expected}",
                table.columns.len()
            ),
        });
    }
    if let Some((got, want)) = table
        .columns
        .iter()
        .zip(schema.feature_names())
        .find(|(got, want)| got.as_str() != *want)
    {
        return Err(Error::SchemaMismatch {
            security_id: security_id.to_string(),
            detail: format!("column {got} where schema expects {want}"),
        });
    }

    let mut buffer = RowBuffer::new(schema.arrow_schema(), table.rows.len())?;
    for row in &table.rows {
        buffer.append_row(&row.security_id, row.time_group, &row.values)?;
    }
    buffer.finish()
}

enum ColumnBuilder {
    F64(Float64Builder),
    I64(Int64Builder),
}

impl ColumnBuilder {
    fn new(data_type: &DataType, capacity: usize) -> Result<Self> {
        match data_type {
            DataType::Float64 => Ok(Self::F64(Float64Builder::with_capacity(capacity))),
            DataType::Int64 => Ok(Self::I64(Int64Builder::with_capacity(capacity))),
            other => Err(Error::InvalidConfig(format!(
                "unsupported feature column type: {other:?}"
            ))),
        }
    }

    fn append(&mut self, value: f64) {
        match self {
            ColumnBuilder::F64(builder) => {
                if value.is_nan() {
                    builder.append_null();
                } else {
                    builder.append_value(value);
                }
            }
            ColumnBuilder::I64(builder) => {
                if value.is_finite() {
                    builder.append_value(value as i64);
                } else {
                    builder.append_null();
                }
            }
        }
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::F64(builder) => Arc::new(builder.finish()),
            ColumnBuilder::I64(builder) => Arc::new(builder.finish()),
        }
    }
}
