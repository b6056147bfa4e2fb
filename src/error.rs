//! Error types for the Ingestion Service

use std::time::Duration;

use thiserror::Error;

use crate::pipeline::RunStage;
use crate::schemas::ValidationError;
use crate::sources::Dataset;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Fetch failed for {url}: HTTP {status}: {body}")]
    FetchStatus {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Fetch timed out for {url} after {after:?}")]
    FetchTimeout { url: String, after: Duration },

    #[error("Data not yet fetched from {0}")]
    NotFetched(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Uniqueness conflict on {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Source not seeded: {0}")]
    SourceNotSeeded(String),

    #[error("Unknown dataset '{0}'. Supported datasets: ow-daily, ow-hourly, ow-current, wb-cities, wb-current")]
    UnknownDataset(String),

    #[error("No API key configured for {0}")]
    MissingApiKey(&'static str),

    #[error("Fetch task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestionError {
    /// Whether a retry of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Fetch { source, .. } => source.is_timeout() || source.is_connect(),
            Self::FetchStatus { status, .. } => matches!(status, 408 | 429 | 502 | 503 | 504),
            Self::FetchTimeout { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestionError>;

/// A run that aborted before it could process its records.
#[derive(Error, Debug)]
#[error("{dataset} run failed while {stage}: {source}")]
pub struct RunFailure {
    pub dataset: Dataset,
    pub stage: RunStage,
    #[source]
    pub source: IngestionError,
}

impl RunFailure {
    pub fn new(dataset: Dataset, stage: RunStage, source: IngestionError) -> Self {
        Self { dataset, stage, source }
    }
}
