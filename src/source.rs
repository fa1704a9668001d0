//! Snapshot sources.
//!
//! A source materializes the snapshot rows matching a [`SnapshotQuery`]:
//! a security list, an inclusive date range, and time-of-day sessions. The
//! returned table is ordered by (security, timestamp).

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

use arrow::array::{Array, Float64Array, StringArray, TimestampMillisecondArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, TimeUnit};
use arrow::record_batch::RecordBatch;
use csv::{ReaderBuilder, StringRecord, Trim};
use flate2::read::GzDecoder;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use time::macros::{format_description, time};
use time::{Date, PrimitiveDateTime, Time};

use crate::error::{Error, Result};
use crate::snapshot::{BookLevel, SnapshotRow, SnapshotTable, BOOK_LEVELS};

pub const DATE_TIME: &str = "DateTime";
pub const SECURITY: &str = "SecurityID";

/// An inclusive time-of-day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub start: Time,
    pub end: Time,
}

impl Session {
    pub fn new(start: Time, end: Time) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: Time) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Continuous-auction sessions of the Shanghai exchange.
pub fn default_sessions() -> Vec<Session> {
    vec![
        Session::new(time!(9:30), time!(11:29:59.999)),
        Session::new(time!(13:00), time!(14:56:59.999)),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotQuery {
    /// Securities to keep; empty keeps every security.
    pub securities: Vec<String>,
    pub start_date: Date,
    pub end_date: Date,
    /// Time-of-day filters; a row must fall in at least one. Empty keeps all.
    pub sessions: Vec<Session>,
}

impl SnapshotQuery {
    pub fn new(securities: Vec<String>, start_date: Date, end_date: Date) -> Self {
        Self {
            securities,
            start_date,
            end_date,
            sessions: default_sessions(),
        }
    }

    pub fn with_sessions(mut self, sessions: Vec<Session>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.end_date < self.start_date {
            return Err(Error::InvalidConfig(format!(
                "end date {} precedes start date {}",
                self.end_date, self.start_date
            )));
        }
        Ok(())
    }

    pub fn wants_security(&self, security_id: &str) -> bool {
        self.securities.is_empty() || self.securities.iter().any(|s| s == security_id)
    }

    pub fn matches(&self, security_id: &str, at: PrimitiveDateTime) -> bool {
        if !self.wants_security(security_id) {
            return false;
        }
        let date = at.date();
        if date < self.start_date || date > self.end_date {
            return false;
        }
        self.sessions.is_empty() || self.sessions.iter().any(|s| s.contains(at.time()))
    }
}

/// Input boundary: produce the snapshot rows a query selects.
pub trait SnapshotSource {
    fn fetch(&mut self, query: &SnapshotQuery) -> Result<SnapshotTable>;
}

impl SnapshotSource for SnapshotTable {
    fn fetch(&mut self, query: &SnapshotQuery) -> Result<SnapshotTable> {
        let mut rows = Vec::new();
        for row in self.rows() {
            let at = datetime_from_ms(row.timestamp_ms)?;
            if query.matches(&row.security_id, at) {
                rows.push(row.clone());
            }
        }
        Ok(SnapshotTable::sorted(rows))
    }
}

/// Milliseconds since the epoch of a wall-clock timestamp.
pub fn timestamp_ms(at: PrimitiveDateTime) -> i64 {
    (at.assume_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn datetime_from_ms(timestamp_ms: i64) -> Result<PrimitiveDateTime> {
    let at = time::OffsetDateTime::from_unix_timestamp_nanos(i128::from(timestamp_ms) * 1_000_000)
        .map_err(|err| Error::InvalidInput(format!("timestamp {timestamp_ms}ms: {err}")))?;
    Ok(PrimitiveDateTime::new(at.date(), at.time()))
}

/// Parse `YYYY-MM-DD HH:MM:SS[.fff]`; `.` date separators and a `T` between
/// date and time are also accepted.
pub fn parse_datetime(value: &str) -> Result<PrimitiveDateTime> {
    let mut normalized = value.trim().as_bytes().to_vec();
    if normalized.len() >= 11 {
        if normalized[4] == b'.' && normalized[7] == b'.' {
            normalized[4] = b'-';
            normalized[7] = b'-';
        }
        if normalized[10] == b'T' {
            normalized[10] = b' ';
        }
    }
    let normalized = String::from_utf8(normalized)
        .map_err(|_| Error::InvalidInput(format!("invalid datetime {value:?}")))?;
    PrimitiveDateTime::parse(
        &normalized,
        format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
        ),
    )
    .map_err(|err| Error::InvalidInput(format!("invalid datetime {value:?}: {err}")))
}

pub fn parse_date(value: &str) -> Result<Date> {
    let normalized = value.trim().replace('.', "-");
    Date::parse(&normalized, format_description!("[year]-[month]-[day]"))
        .map_err(|err| Error::InvalidInput(format!("invalid date {value:?}: {err}")))
}

/// Per-level column names in the snapshot layout.
pub fn level_columns(level: usize) -> [String; 4] {
    [
        format!("BidPrice{level}"),
        format!("BidOrderQty{level}"),
        format!("OfferPrice{level}"),
        format!("OfferOrderQty{level}"),
    ]
}

/// Reads snapshots from a CSV file, gzip-compressed when the name ends in `.gz`.
pub struct CsvSnapshotSource {
    path: PathBuf,
}

impl CsvSnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> Result<Box<dyn Read>> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        if self.path.extension().map(|ext| ext == "gz").unwrap_or(false) {
            Ok(Box::new(GzDecoder::new(reader)))
        } else {
            Ok(Box::new(reader))
        }
    }
}

#[derive(Debug, Clone)]
struct ColumnIndices {
    date_time: usize,
    security: usize,
    levels: [[usize; 4]; BOOK_LEVELS],
}

impl ColumnIndices {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let lookup = |name: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| Error::InvalidInput(format!("missing csv column: {name}")))
        };

        let mut levels = [[0usize; 4]; BOOK_LEVELS];
        for (level, slots) in levels.iter_mut().enumerate() {
            for (slot, name) in slots.iter_mut().zip(level_columns(level)) {
                *slot = lookup(&name)?;
            }
        }

        Ok(Self {
            date_time: lookup(DATE_TIME)?,
            security: lookup(SECURITY)?,
            levels,
        })
    }
}

impl SnapshotSource for CsvSnapshotSource {
    fn fetch(&mut self, query: &SnapshotQuery) -> Result<SnapshotTable> {
        query.validate()?;
        let mut csv = ReaderBuilder::new().trim(Trim::All).from_reader(self.open()?);
        let headers = csv.headers()?.clone();
        let indices = ColumnIndices::from_headers(&headers)?;

        let mut rows = Vec::new();
        let mut skipped = 0u64;
        for (line, record) in csv.records().enumerate() {
            let record = record?;
            // Header is line 1.
            let line = line + 2;
            let field = |idx: usize| record.get(idx).unwrap_or("");

            let security_id = field(indices.security);
            if !query.wants_security(security_id) {
                skipped += 1;
                continue;
            }
            let raw_time = field(indices.date_time);
            let at = parse_datetime(raw_time).map_err(|_| {
                Error::InvalidInput(format!("line {line}: invalid datetime {raw_time:?}"))
            })?;
            if !query.matches(security_id, at) {
                skipped += 1;
                continue;
            }

            let mut levels = [BookLevel::default(); BOOK_LEVELS];
            for (level, slots) in levels.iter_mut().zip(indices.levels.iter()) {
                let parse = |idx: usize| parse_number(field(idx), &headers[idx], line);
                *level = BookLevel::new(
                    parse(slots[0])?,
                    parse(slots[1])?,
                    parse(slots[2])?,
                    parse(slots[3])?,
                );
            }
            rows.push(SnapshotRow::new(timestamp_ms(at), security_id, levels));
        }

        log::info!(
            "read {} snapshot rows from {} ({} outside query)",
            rows.len(),
            self.path.display(),
            skipped
        );
        Ok(SnapshotTable::sorted(rows))
    }
}

fn parse_number(value: &str, column: &str, line: usize) -> Result<f64> {
    if value.is_empty() {
        return Ok(f64::NAN);
    }
    value.parse::<f64>().map_err(|_| {
        Error::InvalidInput(format!("line {line}: column {column} is not numeric: {value:?}"))
    })
}

/// Reads snapshots from a Parquet file with the same column names as the CSV
/// layout. `DateTime` may be any timestamp unit; numeric columns any type
/// castable to Float64.
pub struct ParquetSnapshotSource {
    path: PathBuf,
    batch_size: usize,
}

impl ParquetSnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            batch_size: 8192,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl SnapshotSource for ParquetSnapshotSource {
    fn fetch(&mut self, query: &SnapshotQuery) -> Result<SnapshotTable> {
        query.validate()?;
        let file = File::open(&self.path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
            .with_batch_size(self.batch_size)
            .build()?;

        let mut rows = Vec::new();
        let mut skipped = 0u64;
        for batch in reader {
            let batch = batch?;
            skipped += read_batch(&batch, query, &mut rows)?;
        }
        log::info!(
            "read {} snapshot rows from {} ({} outside query)",
            rows.len(),
            self.path.display(),
            skipped
        );
        Ok(SnapshotTable::sorted(rows))
    }
}

/// Append the rows of `batch` matching `query`; returns how many were skipped.
fn read_batch(batch: &RecordBatch, query: &SnapshotQuery, out: &mut Vec<SnapshotRow>) -> Result<u64> {
    let date_time = column_as(batch, DATE_TIME, &DataType::Timestamp(TimeUnit::Millisecond, None))?;
    let date_time = downcast::<TimestampMillisecondArray>(&date_time, DATE_TIME)?;
    let security = column_as(batch, SECURITY, &DataType::Utf8)?;
    let security = downcast::<StringArray>(&security, SECURITY)?;

    let mut level_arrays: Vec<[Float64Array; 4]> = Vec::with_capacity(BOOK_LEVELS);
    for level in 0..BOOK_LEVELS {
        let names = level_columns(level);
        let load = |name: &str| -> Result<Float64Array> {
            let array = column_as(batch, name, &DataType::Float64)?;
            Ok(downcast::<Float64Array>(&array, name)?.clone())
        };
        level_arrays.push([load(&names[0])?, load(&names[1])?, load(&names[2])?, load(&names[3])?]);
    }

    let mut skipped = 0u64;
    for i in 0..batch.num_rows() {
        if date_time.is_null(i) || security.is_null(i) {
            skipped += 1;
            continue;
        }
        let ts = date_time.value(i);
        let security_id = security.value(i);
        if !query.matches(security_id, datetime_from_ms(ts)?) {
            skipped += 1;
            continue;
        }
        let value = |array: &Float64Array| {
            if array.is_null(i) {
                f64::NAN
            } else {
                array.value(i)
            }
        };
        let mut levels = [BookLevel::default(); BOOK_LEVELS];
        for (level, arrays) in levels.iter_mut().zip(level_arrays.iter()) {
            *level = BookLevel::new(
                value(&arrays[0]),
                value(&arrays[1]),
                value(&arrays[2]),
                value(&arrays[3]),
            );
        }
        out.push(SnapshotRow::new(ts, security_id, levels));
    }
    Ok(skipped)
}

fn column_as(batch: &RecordBatch, name: &str, data_type: &DataType) -> Result<arrow::array::ArrayRef> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| Error::InvalidInput(format!("missing column {name}")))?;
    if column.data_type() == data_type {
        return Ok(column.clone());
    }
    Ok(cast(column.as_ref(), data_type)?)
}

fn downcast<'a, T: Array + 'static>(array: &'a arrow::array::ArrayRef, name: &str) -> Result<&'a T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::InvalidInput(format!("column {name} has unexpected type")))
}
