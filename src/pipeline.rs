//! End-to-end feature run.
//!
//! ```text
//! snapshots ─► derive ─► split by security ─┬─► bucketize ─► aggregate x windows ─► flatten ─► merge ─┐
//!                                           ├─► ...                                                 ├─► concat ─► null filter
//!                                           └─► ...                                                 ┘
//! ```

use std::time::{Duration, Instant};

use arrow::record_batch::RecordBatch;

use crate::config::FeatureConfig;
use crate::derive::derive_table;
use crate::error::Result;
use crate::filter::drop_incomplete_rows;
use crate::partition::{concat_partitions, process_partition, run_parallel, split_by_security};
use crate::schema::FeatureSchema;
use crate::snapshot::SnapshotTable;
use crate::source::{SnapshotQuery, SnapshotSource};

/// Statistics for a pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub input_rows: usize,
    pub partitions: usize,
    pub rows_before_filter: usize,
    pub rows_after_filter: usize,
    pub duration: Duration,
}

impl PipelineStats {
    pub fn rows_per_sec(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.input_rows as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    pub fn rows_dropped(&self) -> usize {
        self.rows_before_filter.saturating_sub(self.rows_after_filter)
    }
}

#[derive(Debug)]
pub struct PipelineOutput {
    pub features: RecordBatch,
    pub stats: PipelineStats,
}

/// Run `f`, logging how long it took under `name`.
pub fn timed<T>(name: &str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let out = f();
    log::info!("[{name}] {:.3}sec", start.elapsed().as_secs_f64());
    out
}

pub struct FeaturePipeline {
    config: FeatureConfig,
    schema: FeatureSchema,
    drop_incomplete: bool,
}

impl FeaturePipeline {
    pub fn new(config: FeatureConfig) -> Result<Self> {
        config.validate()?;
        let schema = FeatureSchema::standard(&config);
        Ok(Self {
            config,
            schema,
            drop_incomplete: true,
        })
    }

    /// Keep rows with missing values instead of applying the null filter.
    pub fn keep_incomplete(mut self) -> Self {
        self.drop_incomplete = false;
        self
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Fetch from `source`, then run.
    pub fn run_source(
        &self,
        source: &mut dyn SnapshotSource,
        query: &SnapshotQuery,
    ) -> Result<PipelineOutput> {
        let snapshots = timed("fetch snapshots", || source.fetch(query))?;
        self.run(&snapshots)
    }

    pub fn run(&self, snapshots: &SnapshotTable) -> Result<PipelineOutput> {
        let start = Instant::now();
        let mut stats = PipelineStats {
            input_rows: snapshots.len(),
            ..PipelineStats::default()
        };

        let derived = derive_table(snapshots);
        let partitions = split_by_security(derived);
        stats.partitions = partitions.len();
        log::info!(
            "deriving features: {} rows, {} securities, {} jobs",
            stats.input_rows,
            stats.partitions,
            self.config.jobs
        );

        let batches = run_parallel(partitions, self.config.jobs, |partition| {
            process_partition(partition, &self.config, &self.schema)
        })?;
        let features = concat_partitions(&self.schema, &batches)?;
        stats.rows_before_filter = features.num_rows();

        let features = if self.drop_incomplete {
            drop_incomplete_rows(&features)?
        } else {
            features
        };
        stats.rows_after_filter = features.num_rows();
        stats.duration = start.elapsed();

        if stats.rows_dropped() > 0 {
            log::warn!(
                "dropped {} of {} feature rows with missing values",
                stats.rows_dropped(),
                stats.rows_before_filter
            );
        }
        log::info!(
            "derived {} feature rows x {} columns in {:.3}sec ({:.0} rows/sec)",
            stats.rows_after_filter,
            features.num_columns(),
            stats.duration.as_secs_f64(),
            stats.rows_per_sec()
        );

        Ok(PipelineOutput { features, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_table() {
        let pipeline = FeaturePipeline::new(FeatureConfig::default()).expect("pipeline");
        let out = pipeline.run(&SnapshotTable::default()).expect("run");
        assert_eq!(out.features.num_rows(), 0);
        assert_eq!(out.features.schema(), pipeline.schema().arrow_schema());
        assert_eq!(out.stats.partitions, 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = FeatureConfig {
            jobs: 0,
            ..FeatureConfig::default()
        };
        assert!(FeaturePipeline::new(config).is_err());
    }
}
