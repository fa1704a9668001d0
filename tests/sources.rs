use std::fs::File;
use std::io::Write;
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array, StringArray, TimestampMicrosecondArray, Float64Array};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use flate2::write::GzEncoder;
use flate2::Compression;
use parquet::arrow::ArrowWriter;
use tempfile::tempdir;
use time::macros::{date, datetime};

use snapshot_features::source::{level_columns, timestamp_ms};
use snapshot_features::{
    CsvSnapshotSource, Error, FeatureConfig, FeaturePipeline, ParquetSnapshotSource, SnapshotQuery,
    SnapshotSource, BOOK_LEVELS,
};

fn header() -> String {
    let mut cols = vec!["DateTime".to_string(), "SecurityID".to_string()];
    for level in 0..BOOK_LEVELS {
        cols.extend(level_columns(level));
    }
    cols.join(",")
}

fn csv_line(at: &str, security: &str, price: f64) -> String {
    let mut fields = vec![at.to_string(), security.to_string()];
    for _ in 0..BOOK_LEVELS {
        fields.push(format!("{price}"));
        fields.push("100".to_string());
        fields.push(format!("{}", price + 0.1));
        fields.push("100".to_string());
    }
    fields.join(",")
}

fn csv_body() -> String {
    let lines = [
        header(),
        csv_line("2021.01.04 09:30:00.000", "600519", 10.0),
        csv_line("2021.01.04 09:32:40.000", "600519", 10.1),
        csv_line("2021.01.04 09:35:10.000", "600519", 10.2),
        csv_line("2021.01.04 09:37:40.000", "600519", 10.3),
        csv_line("2021.01.04 09:38:20.000", "600519", 10.4),
        // Lunch break, outside both sessions.
        csv_line("2021.01.04 12:00:00.000", "600519", 99.0),
        // Not in the security list.
        csv_line("2021.01.04 09:31:00.000", "000001", 5.0),
        // After the date range.
        csv_line("2021.01.06 09:31:00.000", "600519", 10.0),
    ];
    lines.join("\n") + "\n"
}

fn query() -> SnapshotQuery {
    SnapshotQuery::new(
        vec!["600519".to_string(), "600036".to_string()],
        date!(2021 - 01 - 04),
        date!(2021 - 01 - 05),
    )
}

#[test]
fn csv_source_applies_query() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("snapshots.csv");
    std::fs::write(&path, csv_body()).expect("write csv");

    let mut source = CsvSnapshotSource::new(&path);
    let table = source.fetch(&query()).expect("fetch");
    assert_eq!(table.len(), 5);
    assert!(table.rows().iter().all(|r| r.security_id == "600519"));
    assert_eq!(
        table.rows()[0].timestamp_ms,
        timestamp_ms(datetime!(2021-01-04 9:30:00))
    );
    assert_eq!(table.rows()[4].levels[9].offer_qty, 100.0);
}

#[test]
fn gzip_csv_feeds_the_pipeline() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("snapshots.csv.gz");
    let mut encoder = GzEncoder::new(File::create(&path).expect("create"), Compression::default());
    encoder.write_all(csv_body().as_bytes()).expect("write gz");
    encoder.finish().expect("finish gz");

    let pipeline = FeaturePipeline::new(FeatureConfig::default()).expect("pipeline");
    let mut source = CsvSnapshotSource::new(&path);
    let out = pipeline.run_source(&mut source, &query()).expect("run");

    assert_eq!(out.stats.input_rows, 5);
    assert_eq!(out.features.num_rows(), 1);
    let wap_mean = out
        .features
        .column_by_name("Wap0_mean")
        .expect("Wap0_mean")
        .as_any()
        .downcast_ref::<Float64Array>()
        .expect("float");
    assert!((wap_mean.value(0) - 10.25).abs() < 1e-9);
}

#[test]
fn csv_source_reports_missing_columns() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("broken.csv");
    std::fs::write(&path, "DateTime,SecurityID,BidPrice0\n").expect("write csv");

    let err = CsvSnapshotSource::new(&path)
        .fetch(&query())
        .expect_err("missing level columns");
    assert!(err.to_string().contains("BidOrderQty0"));
}

fn fetch_error(dir: &tempfile::TempDir, lines: &[String]) -> Error {
    let path = dir.path().join("bad.csv");
    let mut body = vec![header()];
    body.extend_from_slice(lines);
    std::fs::write(&path, body.join("\n") + "\n").expect("write csv");
    CsvSnapshotSource::new(&path)
        .fetch(&query())
        .expect_err("malformed row")
}

#[test]
fn csv_source_names_line_of_unparseable_field() {
    let dir = tempdir().expect("tempdir");
    let good = csv_line("2021.01.04 09:30:00.000", "600519", 10.0);

    let mut fields: Vec<String> = csv_line("2021.01.04 09:30:03.000", "600519", 10.0)
        .split(',')
        .map(String::from)
        .collect();
    // DateTime, SecurityID, then four columns per level.
    fields[2 + 3 * 4] = "n/a".to_string();
    let err = fetch_error(&dir, &[good.clone(), fields.join(",")]);
    match err {
        Error::InvalidInput(message) => {
            assert!(message.contains("line 3"), "{message}");
            assert!(message.contains("BidPrice3"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }

    let bad_time = csv_line("2021-13-04 09:30:03", "600519", 10.0);
    let err = fetch_error(&dir, &[good, bad_time]);
    match err {
        Error::InvalidInput(message) => {
            assert!(message.contains("line 3"), "{message}");
            assert!(message.contains("invalid datetime"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn parquet_source_casts_column_types() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("snapshots.parquet");

    let times = [
        datetime!(2021-01-04 9:30:00),
        datetime!(2021-01-04 11:30:00),
        datetime!(2021-01-05 13:00:00.500),
    ];
    let mut fields = vec![
        Field::new("DateTime", DataType::Timestamp(TimeUnit::Microsecond, None), false),
        Field::new("SecurityID", DataType::Utf8, false),
    ];
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(TimestampMicrosecondArray::from(
            times
                .iter()
                .map(|t| timestamp_ms(*t) * 1_000)
                .collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(vec!["600036"; 3])),
    ];
    for level in 0..BOOK_LEVELS {
        let [bid, bid_qty, offer, offer_qty] = level_columns(level);
        fields.push(Field::new(bid, DataType::Float64, true));
        fields.push(Field::new(bid_qty, DataType::Int64, true));
        fields.push(Field::new(offer, DataType::Float64, true));
        fields.push(Field::new(offer_qty, DataType::Int64, true));
        columns.push(Arc::new(Float64Array::from(vec![30.0, 30.1, 30.2])));
        columns.push(Arc::new(Int64Array::from(vec![Some(200), Some(300), None])));
        columns.push(Arc::new(Float64Array::from(vec![30.1, 30.2, 30.3])));
        columns.push(Arc::new(Int64Array::from(vec![100, 100, 100])));
    }
    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).expect("batch");
    let mut writer =
        ArrowWriter::try_new(File::create(&path).expect("create"), batch.schema(), None)
            .expect("writer");
    writer.write(&batch).expect("write");
    writer.close().expect("close");

    let table = ParquetSnapshotSource::new(&path)
        .with_batch_size(2)
        .fetch(&query())
        .expect("fetch");

    // 11:30 falls in the lunch break.
    assert_eq!(table.len(), 2);
    let first = &table.rows()[0];
    assert_eq!(first.timestamp_ms, timestamp_ms(times[0]));
    assert_eq!(first.levels[0].bid_qty, 200.0);
    let last = &table.rows()[1];
    assert_eq!(last.timestamp_ms, timestamp_ms(times[2]));
    assert!(last.levels[3].bid_qty.is_nan());
}
