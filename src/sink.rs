use std::fs::File;
use std::io::{Seek, Write};
use std::path::Path;

use arrow::csv::{Writer as ArrowCsvWriter, WriterBuilder};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use parquet::schema::types::ColumnPath;

use crate::config::FeatureConfig;
use crate::error::{Error, Result};
use crate::schema::{FeatureSchema, SECURITY_ID};

/// Output boundary for finished feature tables.
pub trait RowSink {
    fn write_batch(&mut self, batch: &RecordBatch) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Parquet output. Feature files are Snappy-compressed, only `SecurityID` is
/// dictionary-encoded, and the bucket layout is stored in the footer.
pub struct ParquetSink<W: Write + Seek + Send> {
    writer: Option<ArrowWriter<W>>,
    rows_written: usize,
}

pub const BUCKET_WIDTH_KEY: &str = "snapshot_features.bucket_width_secs";
pub const TRAILING_CUTOFFS_KEY: &str = "snapshot_features.trailing_cutoffs_secs";

/// Writer properties for a feature table built with `config`.
pub fn feature_writer_properties(config: &FeatureConfig) -> WriterProperties {
    let cutoffs = config
        .trailing_cutoffs_secs
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(",");
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_dictionary_enabled(false)
        .set_column_dictionary_enabled(ColumnPath::from(SECURITY_ID), true)
        .set_key_value_metadata(Some(vec![
            KeyValue::new(
                BUCKET_WIDTH_KEY.to_string(),
                config.bucket_width_secs.to_string(),
            ),
            KeyValue::new(TRAILING_CUTOFFS_KEY.to_string(), cutoffs),
        ]))
        .build()
}

impl ParquetSink<File> {
    /// Create `path` for the features of `schema`, produced under `config`.
    pub fn for_features(
        path: impl AsRef<Path>,
        schema: &FeatureSchema,
        config: &FeatureConfig,
    ) -> Result<Self> {
        let file = File::create(path)?;
        Self::from_writer(
            file,
            schema.arrow_schema(),
            Some(feature_writer_properties(config)),
        )
    }
}

impl<W: Write + Seek + Send> ParquetSink<W> {
    pub fn from_writer(
        writer: W,
        schema: SchemaRef,
        props: Option<WriterProperties>,
    ) -> Result<Self> {
        let writer = ArrowWriter::try_new(writer, schema, props)?;
        Ok(Self {
            writer: Some(writer),
            rows_written: 0,
        })
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }
}

impl<W: Write + Seek + Send> RowSink for ParquetSink<W> {
    fn write_batch(&mut self, batch: &RecordBatch) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(Error::InvalidInput("parquet sink is closed".into()));
        };
        if batch.num_rows() == 0 {
            return Ok(());
        }
        writer.write(batch)?;
        self.rows_written += batch.num_rows();
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let metadata = writer.close()?;
            log::debug!(
                "parquet sink closed: {} rows in {} row groups",
                self.rows_written,
                metadata.num_row_groups()
            );
        }
        Ok(())
    }
}

/// CSV with a header row; nulls are written as empty fields.
pub struct CsvSink<W: Write> {
    writer: Option<ArrowCsvWriter<W>>,
}

impl CsvSink<File> {
    pub fn try_new(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::from_writer(file))
    }
}

impl<W: Write> CsvSink<W> {
    pub fn from_writer(writer: W) -> Self {
        let writer = WriterBuilder::new()
            .with_header(true)
            .with_timestamp_format("%Y-%m-%d %H:%M:%S%.3f".to_string())
            .build(writer);
        Self {
            writer: Some(writer),
        }
    }

    pub fn into_inner(mut self) -> Option<W> {
        self.writer.take().map(|w| w.into_inner())
    }
}

impl<W: Write> RowSink for CsvSink<W> {
    fn write_batch(&mut self, batch: &RecordBatch) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(Error::InvalidInput("csv sink is closed".into()));
        };
        writer.write(batch)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let mut inner = writer.into_inner();
            inner.flush()?;
        }
        Ok(())
    }
}
