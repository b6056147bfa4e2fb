//! Transport adapters
//!
//! Two ways of getting raw provider payloads:
//! - [`BulkDownloader`]: one gzip-compressed dump per run
//! - [`WeatherBitClient`]: one small request per city, fanned out by the
//!   pipeline's fetch pool
//!
//! [`Dataset`] ties each feed to its provider, schema, payload shape and
//! write mode.

pub mod bulk;
pub mod weatherbit;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{IngestionError, Result};
use crate::schemas::{RawRecord, SchemaKind};

pub use bulk::BulkDownloader;
pub use weatherbit::WeatherBitClient;

/// Data providers, matching the seeded `source` rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    OpenWeather,
    WeatherBit,
}

impl Provider {
    /// Name of the seeded source row
    pub fn source_name(&self) -> &'static str {
        match self {
            Provider::OpenWeather => "OpenWeather",
            Provider::WeatherBit => "WeatherBit",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.source_name())
    }
}

/// How a fetched body splits into records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// One JSON object per line
    JsonLines,
    /// A single JSON document: an array of records or one record
    Document,
}

/// How validated records are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Many readings per record; existing (city, date) pairs are skipped
    Historical,
    /// One reading per record; last write wins
    Current,
    /// Cities only, no observations
    Catalog,
}

/// Ingestible datasets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dataset {
    OwDaily,
    OwHourly,
    OwCurrent,
    WbCities,
    WbCurrent,
}

impl Dataset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::OwDaily => "ow-daily",
            Dataset::OwHourly => "ow-hourly",
            Dataset::OwCurrent => "ow-current",
            Dataset::WbCities => "wb-cities",
            Dataset::WbCurrent => "wb-current",
        }
    }

    /// All datasets, in harvest order
    ///
    /// `wb-cities` runs before `wb-current` because the latter fetches the
    /// cities the former stored.
    pub const fn all() -> &'static [Dataset] {
        &[
            Dataset::OwDaily,
            Dataset::OwHourly,
            Dataset::OwCurrent,
            Dataset::WbCities,
            Dataset::WbCurrent,
        ]
    }

    pub fn provider(&self) -> Provider {
        match self {
            Dataset::OwDaily | Dataset::OwHourly | Dataset::OwCurrent => Provider::OpenWeather,
            Dataset::WbCities | Dataset::WbCurrent => Provider::WeatherBit,
        }
    }

    pub fn schema(&self) -> SchemaKind {
        match self {
            Dataset::OwDaily => SchemaKind::OwDaily,
            Dataset::OwHourly => SchemaKind::OwHourly,
            Dataset::OwCurrent => SchemaKind::OwCurrent,
            Dataset::WbCities => SchemaKind::WbCity,
            Dataset::WbCurrent => SchemaKind::WbCurrent,
        }
    }

    pub fn shape(&self) -> PayloadShape {
        match self {
            Dataset::OwDaily | Dataset::OwHourly | Dataset::OwCurrent => PayloadShape::JsonLines,
            Dataset::WbCities | Dataset::WbCurrent => PayloadShape::Document,
        }
    }

    pub fn write_mode(&self) -> WriteMode {
        match self {
            Dataset::OwDaily | Dataset::OwHourly => WriteMode::Historical,
            Dataset::OwCurrent | Dataset::WbCurrent => WriteMode::Current,
            Dataset::WbCities => WriteMode::Catalog,
        }
    }

    /// Whether the dataset is fetched city by city
    pub fn is_per_city(&self) -> bool {
        matches!(self, Dataset::WbCurrent)
    }
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Dataset {
    type Error = IngestionError;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        let lower = value.to_lowercase();
        Dataset::all()
            .iter()
            .copied()
            .find(|d| d.as_str() == lower)
            .ok_or_else(|| IngestionError::UnknownDataset(value.to_string()))
    }
}

impl std::str::FromStr for Dataset {
    type Err = IngestionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Dataset::try_from(s)
    }
}

/// Identifies one per-city request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CityQuery {
    pub city: String,
    /// Country code
    pub country: String,
}

impl CityQuery {
    pub fn new(city: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            country: country.into(),
        }
    }
}

impl std::fmt::Display for CityQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.city, self.country)
    }
}

/// A transport that fetches one payload per run
#[async_trait]
pub trait Transport: Send {
    /// Where the payload comes from
    fn target(&self) -> &str;

    /// Downloads the payload; returns the decoded size in bytes
    async fn fetch(&mut self) -> Result<usize>;

    /// Splits the fetched payload into raw records, in payload order
    fn parse(&mut self) -> Result<Vec<RawRecord>>;
}

/// A transport that fetches one payload per city
#[async_trait]
pub trait CityFetcher: Send + Sync {
    async fn fetch_city(&self, query: &CityQuery) -> Result<RawRecord>;
}
