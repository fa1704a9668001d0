use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use std::path::{Path, PathBuf};

use snapshot_features::pipeline::timed;
use snapshot_features::source::parse_date;
use snapshot_features::{
    CsvSink, CsvSnapshotSource, FeatureConfig, FeaturePipeline, ParquetSink,
    ParquetSnapshotSource, RowSink, SnapshotQuery, SnapshotSource,
};

const DEFAULT_SECURITIES: &str = "601318,600519,600036,600276,601166,600030,600887,600016,\
601328,601288,600000,600585,601398,600031,601668,600048";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Csv,
    Parquet,
}

impl Format {
    fn infer(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".parquet") {
            Some(Format::Parquet)
        } else if name.ends_with(".csv") || name.ends_with(".csv.gz") {
            Some(Format::Csv)
        } else {
            None
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "snapshot-features")]
#[command(about = "Derive windowed order-book features per security and time bucket")]
struct Cli {
    /// Snapshot input (CSV, CSV.GZ or Parquet)
    #[arg(long)]
    input: PathBuf,

    /// Feature table output (CSV or Parquet)
    #[arg(long)]
    output: PathBuf,

    /// Input format; inferred from the extension when omitted
    #[arg(long, value_enum)]
    input_format: Option<Format>,

    /// Output format; inferred from the extension when omitted
    #[arg(long, value_enum)]
    output_format: Option<Format>,

    /// Comma-separated security list (empty keeps every security)
    #[arg(long, default_value = DEFAULT_SECURITIES)]
    securities: String,

    /// First trading date, inclusive (YYYY-MM-DD or YYYY.MM.DD)
    #[arg(long, default_value = "2021-01-04")]
    start_date: String,

    /// Last trading date, inclusive
    #[arg(long, default_value = "2021-01-05")]
    end_date: String,

    /// JSON feature config; the flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker threads
    #[arg(long)]
    jobs: Option<usize>,

    /// Bucket width in seconds
    #[arg(long)]
    bucket_secs: Option<u64>,

    /// Comma-separated trailing cutoffs in seconds
    #[arg(long)]
    cutoffs: Option<String>,

    /// Keep rows with missing values
    #[arg(long)]
    keep_incomplete: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => FeatureConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => FeatureConfig::default(),
    };
    if let Some(jobs) = cli.jobs {
        config.jobs = jobs;
    }
    if let Some(bucket_secs) = cli.bucket_secs {
        config.bucket_width_secs = bucket_secs;
    }
    if let Some(cutoffs) = &cli.cutoffs {
        config.trailing_cutoffs_secs = parse_list(cutoffs)
            .iter()
            .map(|s| s.parse::<u64>().with_context(|| format!("invalid cutoff {s:?}")))
            .collect::<Result<_>>()?;
    }

    let query = SnapshotQuery::new(
        parse_list(&cli.securities),
        parse_date(&cli.start_date)?,
        parse_date(&cli.end_date)?,
    );

    let input_format = resolve_format(cli.input_format, &cli.input)?;
    let output_format = resolve_format(cli.output_format, &cli.output)?;

    let mut pipeline = FeaturePipeline::new(config)?;
    if cli.keep_incomplete {
        pipeline = pipeline.keep_incomplete();
    }

    let mut source: Box<dyn SnapshotSource> = match input_format {
        Format::Csv => Box::new(CsvSnapshotSource::new(&cli.input)),
        Format::Parquet => Box::new(ParquetSnapshotSource::new(&cli.input)),
    };

    let label = format!(
        "derived features (jobs: {}, securities: {}, period: {}-{})",
        pipeline.config().jobs,
        query.securities.len(),
        query.start_date,
        query.end_date
    );
    let output = timed(&label, || pipeline.run_source(source.as_mut(), &query))
        .with_context(|| format!("derive features from {}", cli.input.display()))?;

    let mut sink: Box<dyn RowSink> = match output_format {
        Format::Csv => Box::new(CsvSink::try_new(&cli.output)?),
        Format::Parquet => Box::new(ParquetSink::for_features(
            &cli.output,
            pipeline.schema(),
            pipeline.config(),
        )?),
    };
    sink.write_batch(&output.features)
        .with_context(|| format!("write {}", cli.output.display()))?;
    sink.finish()?;

    info!(
        "wrote {} rows x {} columns to {} ({} rows dropped)",
        output.features.num_rows(),
        output.features.num_columns(),
        cli.output.display(),
        output.stats.rows_dropped()
    );
    Ok(())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn resolve_format(explicit: Option<Format>, path: &Path) -> Result<Format> {
    if let Some(format) = explicit {
        return Ok(format);
    }
    match Format::infer(path) {
        Some(format) => Ok(format),
        None => bail!(
            "cannot infer format of {}; pass --input-format/--output-format",
            path.display()
        ),
    }
}
