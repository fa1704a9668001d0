//! Per-security partitions and their parallel dispatch.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;

use crate::aggregate::aggregate_window;
use crate::bucket::bucketize;
use crate::config::FeatureConfig;
use crate::derive::DerivedRow;
use crate::error::{Error, Result};
use crate::flatten::flatten;
use crate::merge::merge_windows;
use crate::schema::FeatureSchema;
use crate::table::to_record_batch;

/// All derived rows of one security, in timestamp order.
#[derive(Debug, Clone)]
pub struct Partition {
    pub security_id: Arc<str>,
    pub rows: Vec<DerivedRow>,
}

/// Split derived rows into one partition per security, ordered by security.
/// Each partition is stably sorted by timestamp.
pub fn split_by_security(rows: Vec<DerivedRow>) -> Vec<Partition> {
    let mut by_security: BTreeMap<String, Vec<DerivedRow>> = BTreeMap::new();
    for row in rows {
        by_security
            .entry(row.security_id.clone())
            .or_default()
            .push(row);
    }
    by_security
        .into_iter()
        .map(|(security_id, mut rows)| {
            rows.sort_by_key(|row| row.timestamp_ms);
            Partition {
                security_id: Arc::from(security_id),
                rows,
            }
        })
        .collect()
}

/// Bucketize, aggregate every window, flatten, and merge one partition.
pub fn process_partition(
    mut partition: Partition,
    config: &FeatureConfig,
    schema: &FeatureSchema,
) -> Result<RecordBatch> {
    let security_id = Arc::clone(&partition.security_id);
    bucketize(&mut partition.rows, config.bucket_width_ms());

    let mut tables = schema.variants().iter().map(|&variant| {
        flatten(aggregate_window(
            &security_id,
            &partition.rows,
            schema.spec(),
            variant,
        ))
    });
    let full = tables.next().ok_or_else(|| {
        Error::InvalidConfig("feature schema has no full-bucket window".into())
    })?;
    let trailing: Vec<_> = tables.collect();

    let merged = merge_windows(full, trailing)?;
    log::debug!(
        "partition {}: {} rows -> {} buckets",
        security_id,
        partition.rows.len(),
        merged.rows.len()
    );
    to_record_batch(&security_id, &merged, schema)
}

/// Apply `task` to every partition on up to `jobs` worker threads.
///
/// Results come back in input order, paired with the partition's security.
/// The first failure, error or panic, stops workers from taking further
/// partitions and is returned tagged with the failing security.
pub fn run_parallel<F>(
    partitions: Vec<Partition>,
    jobs: usize,
    task: F,
) -> Result<Vec<(Arc<str>, RecordBatch)>>
where
    F: Fn(Partition) -> Result<RecordBatch> + Sync,
{
    let total = partitions.len();
    let worker_count = jobs.max(1).min(total.max(1));
    let ids: Vec<Arc<str>> = partitions.iter().map(|p| Arc::clone(&p.security_id)).collect();

    let queue: Mutex<Vec<Option<Partition>>> =
        Mutex::new(partitions.into_iter().map(Some).collect());
    let next = AtomicUsize::new(0);
    let failed = AtomicBool::new(false);
    let results: Mutex<Vec<Option<RecordBatch>>> = Mutex::new(vec![None; total]);
    let first_error: Mutex<Option<Error>> = Mutex::new(None);

    let record_failure = |err: Error| {
        failed.store(true, Ordering::Release);
        if let Ok(mut guard) = first_error.lock() {
            guard.get_or_insert(err);
        }
    };

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let spawned = thread::Builder::new()
                .name(format!("feature-worker-{worker_id}"))
                .spawn_scoped(scope, || loop {
                    if failed.load(Ordering::Acquire) {
                        break;
                    }
                    let idx = next.fetch_add(1, Ordering::AcqRel);
                    if idx >= total {
                        break;
                    }
                    let partition = match queue.lock() {
                        Ok(mut guard) => guard[idx].take(),
                        Err(_) => None,
                    };
                    let Some(partition) = partition else {
                        continue;
                    };
                    let security_id = Arc::clone(&partition.security_id);
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(partition)))
                        .unwrap_or_else(|payload| {
                            Err(Error::WorkerPanicked(panic_message(payload.as_ref())))
                        });
                    match outcome {
                        Ok(batch) => {
                            if let Ok(mut guard) = results.lock() {
                                guard[idx] = Some(batch);
                            }
                        }
                        Err(err) => {
                            log::error!("partition {security_id} failed: {err}");
                            record_failure(err.in_partition(&security_id));
                            break;
                        }
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    record_failure(Error::Io(err));
                    break;
                }
            }
        }
        // Join every worker before looking at the outcome.
        for handle in handles {
            let name = handle.thread().name().unwrap_or("feature-worker").to_string();
            if handle.join().is_err() {
                record_failure(Error::WorkerPanicked(name));
            }
        }
    });

    let first_error = first_error
        .into_inner()
        .map_err(|_| Error::WorkerPanicked("error slot poisoned".into()))?;
    if let Some(err) = first_error {
        return Err(err);
    }

    let results = results
        .into_inner()
        .map_err(|_| Error::WorkerPanicked("result slot poisoned".into()))?;
    ids.into_iter()
        .zip(results)
        .map(|(security_id, batch)| match batch {
            Some(batch) => Ok((security_id, batch)),
            None => Err(Error::WorkerPanicked(format!(
                "partition {security_id} produced no result"
            ))),
        })
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Concatenate partition outputs row-wise. Every batch must carry exactly
/// `schema`; a mismatch fails instead of being coerced.
pub fn concat_partitions(
    schema: &FeatureSchema,
    batches: &[(Arc<str>, RecordBatch)],
) -> Result<RecordBatch> {
    let expected = schema.arrow_schema();
    for (security_id, batch) in batches {
        if batch.schema() != expected {
            let got = batch.schema();
            let detail = if got.fields().len() != expected.fields().len() {
                format!(
                    "{} columns, expected {}",
                    got.fields().len(),
                    expected.fields().len()
                )
            } else {
                got.fields()
                    .iter()
                    .zip(expected.fields().iter())
                    .find(|(a, b)| a != b)
                    .map(|(a, b)| format!("field {} differs from {}", a.name(), b.name()))
                    .unwrap_or_else(|| "schema metadata differs".into())
            };
            return Err(Error::SchemaMismatch {
                security_id: security_id.to_string(),
                detail,
            });
        }
    }
    Ok(concat_batches(&expected, batches.iter().map(|(_, b)| b))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::derive_row;
    use crate::snapshot::{BookLevel, SnapshotRow, BOOK_LEVELS};

    fn derived(sec: &str, ts: i64) -> DerivedRow {
        let level = BookLevel::new(10.0, 1.0, 10.1, 1.0);
        derive_row(&SnapshotRow::new(ts, sec, [level; BOOK_LEVELS]))
    }

    fn empty_partition(sec: &str) -> Partition {
        Partition {
            security_id: Arc::from(sec),
            rows: Vec::new(),
        }
    }

    #[test]
    fn split_groups_and_sorts() {
        let parts = split_by_security(vec![
            derived("B", 5),
            derived("A", 3),
            derived("B", 1),
        ]);
        assert_eq!(parts.len(), 2);
        assert_eq!(&*parts[0].security_id, "A");
        assert_eq!(&*parts[1].security_id, "B");
        let ts: Vec<i64> = parts[1].rows.iter().map(|r| r.timestamp_ms).collect();
        assert_eq!(ts, vec![1, 5]);
    }

    #[test]
    fn empty_partition_yields_shaped_batch() {
        let config = FeatureConfig::default();
        let schema = FeatureSchema::standard(&config);
        let batch = process_partition(empty_partition("A"), &config, &schema).expect("batch");
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.schema(), schema.arrow_schema());
    }

    #[test]
    fn parallel_results_keep_input_order() {
        let config = FeatureConfig::default();
        let schema = FeatureSchema::standard(&config);
        let parts: Vec<Partition> = ["A", "B", "C", "D", "E"]
            .iter()
            .map(|s| empty_partition(s))
            .collect();
        let out = run_parallel(parts, 3, |p| process_partition(p, &config, &schema))
            .expect("parallel");
        let ids: Vec<&str> = out.iter().map(|(id, _)| &**id).collect();
        assert_eq!(ids, vec!["A", "B", "C", "D", "E"]);
    }

    #[test]
    fn failing_partition_aborts_run() {
        let parts: Vec<Partition> = ["A", "B", "C"].iter().map(|s| empty_partition(s)).collect();
        let err = run_parallel(parts, 2, |p| {
            if &*p.security_id == "B" {
                Err(Error::InvalidInput("bad book".into()))
            } else {
                Ok(RecordBatch::new_empty(Arc::new(arrow::datatypes::Schema::empty())))
            }
        })
        .unwrap_err();
        match err {
            Error::Partition { security_id, .. } => assert_eq!(security_id, "B"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn panicking_partitions_return_an_error() {
        let parts: Vec<Partition> = ["A", "B", "C", "D"].iter().map(|s| empty_partition(s)).collect();
        let err = run_parallel(parts, 4, |p| -> Result<RecordBatch> {
            std::thread::sleep(std::time::Duration::from_millis(20));
            panic!("corrupt book for {}", p.security_id);
        })
        .unwrap_err();
        match err {
            Error::Partition { source, .. } => match *source {
                Error::WorkerPanicked(message) => assert!(message.starts_with("corrupt book for")),
                other => panic!("unexpected source: {other}"),
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn failure_stops_remaining_partitions() {
        let ran = AtomicUsize::new(0);
        let parts: Vec<Partition> = (0..20).map(|i| empty_partition(&format!("S{i}"))).collect();
        let err = run_parallel(parts, 2, |p| {
            ran.fetch_add(1, Ordering::SeqCst);
            if &*p.security_id == "S0" {
                panic!("bad partition");
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(RecordBatch::new_empty(Arc::new(arrow::datatypes::Schema::empty())))
        })
        .unwrap_err();
        assert!(matches!(err, Error::Partition { ref security_id, .. } if security_id == "S0"));
        assert!(ran.load(Ordering::SeqCst) < 20);
    }

    #[test]
    fn concat_rejects_foreign_schema() {
        let config = FeatureConfig::default();
        let schema = FeatureSchema::standard(&config);
        let stray = RecordBatch::new_empty(Arc::new(arrow::datatypes::Schema::empty()));
        let err = concat_partitions(&schema, &[(Arc::from("X"), stray)]).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
    }
}
