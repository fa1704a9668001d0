//! Enumerated feature schema.
//!
//! The set of (base column, statistic, window) triples is fixed once at
//! construction. The same list drives aggregation, names the flat output
//! columns, and is the reference every partition's output is checked against.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};

use crate::config::FeatureConfig;
use crate::derive::DerivedRow;
use crate::snapshot::BOOK_LEVELS;

pub const SECURITY_ID: &str = "SecurityID";
pub const TIME_GROUP: &str = "TimeGroup";

/// Per-bucket statistic applied to a base column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statistic {
    Count,
    Sum,
    Mean,
    Std,
    RealizedVolatility,
}

impl Statistic {
    pub fn label(self) -> &'static str {
        match self {
            Statistic::Count => "count",
            Statistic::Sum => "sum",
            Statistic::Mean => "mean",
            Statistic::Std => "std",
            Statistic::RealizedVolatility => "realizedVolatility",
        }
    }

    pub fn data_type(self) -> DataType {
        match self {
            Statistic::Count => DataType::Int64,
            _ => DataType::Float64,
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A column of the derived rows that statistics are computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseColumn {
    DateTime,
    WapBalance,
    PriceSpread,
    BidSpread,
    OfferSpread,
    TotalVolume,
    VolumeImbalance,
    Wap(usize),
    LogReturn(usize),
    LogReturnOffer(usize),
    LogReturnBid(usize),
}

impl BaseColumn {
    /// Value of this column for one row. `DateTime` only feeds `count`, so its
    /// value is the timestamp itself.
    #[inline]
    pub fn value(self, row: &DerivedRow) -> f64 {
        match self {
            BaseColumn::DateTime => row.timestamp_ms as f64,
            BaseColumn::WapBalance => row.wap_balance,
            BaseColumn::PriceSpread => row.price_spread,
            BaseColumn::BidSpread => row.bid_spread,
            BaseColumn::OfferSpread => row.offer_spread,
            BaseColumn::TotalVolume => row.total_volume,
            BaseColumn::VolumeImbalance => row.volume_imbalance,
            BaseColumn::Wap(i) => row.wap[i],
            BaseColumn::LogReturn(i) => row.log_return[i],
            BaseColumn::LogReturnOffer(i) => row.log_return_offer[i],
            BaseColumn::LogReturnBid(i) => row.log_return_bid[i],
        }
    }
}

impl fmt::Display for BaseColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseColumn::DateTime => f.write_str("DateTime"),
            BaseColumn::WapBalance => f.write_str("WapBalance"),
            BaseColumn::PriceSpread => f.write_str("PriceSpread"),
            BaseColumn::BidSpread => f.write_str("BidSpread"),
            BaseColumn::OfferSpread => f.write_str("OfferSpread"),
            BaseColumn::TotalVolume => f.write_str("TotalVolume"),
            BaseColumn::VolumeImbalance => f.write_str("VolumeImbalance"),
            BaseColumn::Wap(i) => write!(f, "Wap{i}"),
            BaseColumn::LogReturn(i) => write!(f, "LogReturn{i}"),
            BaseColumn::LogReturnOffer(i) => write!(f, "LogReturnOffer{i}"),
            BaseColumn::LogReturnBid(i) => write!(f, "LogReturnBid{i}"),
        }
    }
}

/// Immutable base-column to statistics mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationSpec {
    entries: Vec<(BaseColumn, Vec<Statistic>)>,
}

impl AggregationSpec {
    /// The standard microstructure mapping over all book levels.
    pub fn standard() -> Self {
        use Statistic::*;

        let moments = vec![Sum, Mean, Std];
        let returns = vec![Sum, RealizedVolatility, Mean, Std];

        let mut entries = vec![(BaseColumn::DateTime, vec![Count])];
        for base in [
            BaseColumn::WapBalance,
            BaseColumn::PriceSpread,
            BaseColumn::BidSpread,
            BaseColumn::OfferSpread,
            BaseColumn::TotalVolume,
            BaseColumn::VolumeImbalance,
        ] {
            entries.push((base, moments.clone()));
        }
        for i in 0..BOOK_LEVELS {
            entries.push((BaseColumn::Wap(i), moments.clone()));
            entries.push((BaseColumn::LogReturn(i), returns.clone()));
            entries.push((BaseColumn::LogReturnOffer(i), returns.clone()));
            entries.push((BaseColumn::LogReturnBid(i), returns.clone()));
        }
        Self { entries }
    }

    pub fn new(entries: Vec<(BaseColumn, Vec<Statistic>)>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[(BaseColumn, Vec<Statistic>)] {
        &self.entries
    }

    /// The two-level (base, statistic) labels in aggregation order.
    pub fn labels(&self) -> Vec<ColumnLabel> {
        self.entries
            .iter()
            .flat_map(|(base, stats)| {
                stats.iter().map(move |&stat| ColumnLabel { base: *base, stat })
            })
            .collect()
    }

    pub fn column_count(&self) -> usize {
        self.entries.iter().map(|(_, stats)| stats.len()).sum()
    }
}

/// Two-level label of an aggregate column before flattening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnLabel {
    pub base: BaseColumn,
    pub stat: Statistic,
}

/// A window over each bucket: rows with `timestamp >= bucket start + cutoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowVariant {
    pub cutoff_secs: u64,
}

impl WindowVariant {
    pub const FULL: WindowVariant = WindowVariant { cutoff_secs: 0 };

    pub fn trailing(cutoff_secs: u64) -> Self {
        Self { cutoff_secs }
    }

    pub fn is_full(&self) -> bool {
        self.cutoff_secs == 0
    }

    pub fn cutoff_ms(&self) -> i64 {
        (self.cutoff_secs as i64).saturating_mul(1_000)
    }

    /// Column-name suffix; none for the full bucket.
    pub fn suffix(&self) -> Option<String> {
        (!self.is_full()).then(|| self.cutoff_secs.to_string())
    }
}

/// One flat output feature column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureColumn {
    pub label: ColumnLabel,
    pub variant: WindowVariant,
    pub name: String,
}

/// The full output schema: key columns then every feature column, full bucket
/// first and trailing windows in configured order.
#[derive(Debug, Clone)]
pub struct FeatureSchema {
    spec: AggregationSpec,
    variants: Vec<WindowVariant>,
    columns: Vec<FeatureColumn>,
    arrow: SchemaRef,
}

impl FeatureSchema {
    pub fn new(spec: AggregationSpec, config: &FeatureConfig) -> Self {
        let mut variants = vec![WindowVariant::FULL];
        variants.extend(
            config
                .trailing_cutoffs_secs
                .iter()
                .map(|&cutoff| WindowVariant::trailing(cutoff)),
        );

        let labels = spec.labels();
        let mut columns = Vec::with_capacity(labels.len() * variants.len());
        for variant in &variants {
            let suffix = variant.suffix();
            for label in &labels {
                columns.push(FeatureColumn {
                    label: *label,
                    variant: *variant,
                    name: crate::flatten::flat_name(label, suffix.as_deref()),
                });
            }
        }

        let mut fields = Vec::with_capacity(columns.len() + 2);
        fields.push(Field::new(SECURITY_ID, DataType::Utf8, false));
        fields.push(Field::new(
            TIME_GROUP,
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ));
        for column in &columns {
            fields.push(Field::new(&column.name, column.label.stat.data_type(), true));
        }

        Self {
            spec,
            variants,
            columns,
            arrow: Arc::new(Schema::new(fields)),
        }
    }

    pub fn standard(config: &FeatureConfig) -> Self {
        Self::new(AggregationSpec::standard(), config)
    }

    pub fn spec(&self) -> &AggregationSpec {
        &self.spec
    }

    pub fn variants(&self) -> &[WindowVariant] {
        &self.variants
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn arrow_schema(&self) -> SchemaRef {
        Arc::clone(&self.arrow)
    }
}
