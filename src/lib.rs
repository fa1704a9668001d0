//! Windowed microstructure features from order-book snapshots.
//!
//! Snapshots are derived row by row, split per security, cut into fixed-width
//! time buckets, and aggregated over the full bucket plus several trailing
//! windows. The per-window tables are merged into one wide row per
//! (security, bucket) and rows with any missing value are dropped.

pub mod aggregate;
pub mod bucket;
pub mod config;
pub mod derive;
pub mod error;
pub mod filter;
pub mod flatten;
pub mod merge;
pub mod partition;
pub mod pipeline;
pub mod schema;
pub mod sink;
pub mod snapshot;
pub mod source;
pub mod table;

pub use config::FeatureConfig;
pub use error::{Error, Result};
pub use pipeline::{FeaturePipeline, PipelineOutput, PipelineStats};
pub use schema::{AggregationSpec, FeatureSchema, Statistic, WindowVariant};
pub use sink::{CsvSink, ParquetSink, RowSink};
pub use snapshot::{BookLevel, SnapshotRow, SnapshotTable, BOOK_LEVELS};
pub use source::{CsvSnapshotSource, ParquetSnapshotSource, Session, SnapshotQuery, SnapshotSource};
