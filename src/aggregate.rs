//! Per-bucket window aggregation.

use std::sync::Arc;

use crate::derive::DerivedRow;
use crate::schema::{AggregationSpec, ColumnLabel, Statistic, WindowVariant};

/// Aggregated values of one (TimeGroup, SecurityID) key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRow {
    pub time_group: i64,
    pub security_id: Arc<str>,
    /// One value per label; NaN marks a missing value.
    pub values: Vec<f64>,
}

/// Result of aggregating one window variant, labelled two-level.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowAggregate {
    pub variant: WindowVariant,
    pub labels: Vec<ColumnLabel>,
    pub rows: Vec<KeyedRow>,
}

impl WindowAggregate {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Aggregate the rows of one security for one window variant.
///
/// Rows must be bucketized and ordered by timestamp. Only rows with
/// `timestamp >= time_group + cutoff` qualify; buckets with no qualifying
/// rows produce no output row. Output is ordered by `time_group`.
pub fn aggregate_window(
    security_id: &Arc<str>,
    rows: &[DerivedRow],
    spec: &AggregationSpec,
    variant: WindowVariant,
) -> WindowAggregate {
    let labels = spec.labels();
    let cutoff_ms = variant.cutoff_ms();
    let mut out = Vec::new();
    let mut scratch = Vec::new();

    let mut start = 0;
    while start < rows.len() {
        let group = rows[start].time_group;
        let mut end = start + 1;
        while end < rows.len() && rows[end].time_group == group {
            end += 1;
        }

        let threshold = group.saturating_add(cutoff_ms);
        let qualifying: Vec<&DerivedRow> = rows[start..end]
            .iter()
            .filter(|row| row.timestamp_ms >= threshold)
            .collect();

        if !qualifying.is_empty() {
            let mut values = Vec::with_capacity(labels.len());
            for (base, stats) in spec.entries() {
                scratch.clear();
                scratch.extend(
                    qualifying
                        .iter()
                        .map(|row| base.value(row))
                        .filter(|v| !v.is_nan()),
                );
                for &stat in stats {
                    values.push(summarize(&scratch, stat));
                }
            }
            out.push(KeyedRow {
                time_group: group,
                security_id: Arc::clone(security_id),
                values,
            });
        }
        start = end;
    }

    WindowAggregate {
        variant,
        labels,
        rows: out,
    }
}

/// Reduce the non-missing values of a column to one statistic.
///
/// `sum` and `realizedVolatility` of no values are 0; `mean` of no values and
/// `std` of fewer than two values are missing. `std` is the sample deviation.
pub fn summarize(values: &[f64], stat: Statistic) -> f64 {
    match stat {
        Statistic::Count => values.len() as f64,
        Statistic::Sum => values.iter().sum(),
        Statistic::Mean => mean(values).unwrap_or(f64::NAN),
        Statistic::Std => sample_std(values).unwrap_or(f64::NAN),
        Statistic::RealizedVolatility => realized_volatility(values),
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

/// Square root of the sum of squared returns.
pub fn realized_volatility(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}
