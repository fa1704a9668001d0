use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("schema mismatch in partition {security_id}: {detail}")]
    SchemaMismatch { security_id: String, detail: String },
    #[error("partition {security_id} failed: {source}")]
    Partition {
        security_id: String,
        #[source]
        source: Box<Error>,
    },
    #[error("worker thread panicked: {0}")]
    WorkerPanicked(String),
}

impl Error {
    pub(crate) fn in_partition(self, security_id: &str) -> Self {
        match self {
            err @ Error::Partition { .. } => err,
            other => Error::Partition {
                security_id: security_id.to_string(),
                source: Box::new(other),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
