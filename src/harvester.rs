//! Harvest orchestration
//!
//! Wires configuration, the shared HTTP client and the store into
//! per-dataset runs:
//! - bulk datasets go through a [`BulkDownloader`]
//! - `wb-current` fans out over the WeatherBit cities already stored
//!
//! A full harvest runs every dataset in catalogue order and keeps going
//! past a failed dataset.

use std::sync::Arc;

use tracing::{error, info, instrument};

use crate::config::Config;
use crate::error::{Result, RunFailure};
use crate::http_client::ResilientHttpClient;
use crate::pipeline::{Ingestor, RunReport, RunStage};
use crate::sources::{BulkDownloader, CityQuery, Dataset, WeatherBitClient};
use crate::storage::{Source, WeatherRow, WeatherStore};

/// Default number of stored cities fetched by a `wb-current` run
pub const DEFAULT_CITY_LIMIT: usize = 20;

/// Knobs for a single run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Cap on records processed from a bulk payload
    pub limit: Option<usize>,
    /// Window into the stored city list for per-city datasets
    pub city_offset: usize,
    pub city_limit: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            limit: None,
            city_offset: 0,
            city_limit: DEFAULT_CITY_LIMIT,
        }
    }
}

pub struct Harvester {
    config: Config,
    http_client: Arc<ResilientHttpClient>,
    store: Arc<dyn WeatherStore>,
    ingestor: Ingestor,
}

impl Harvester {
    /// Creates a new harvester instance
    #[instrument(skip(config, store), fields(correlation_id = %correlation_id))]
    pub fn new(config: Config, store: Arc<dyn WeatherStore>, correlation_id: String) -> Result<Self> {
        info!("Initializing harvester...");

        let http_client = Arc::new(ResilientHttpClient::new(config.http_client_config())?);
        let ingestor = Ingestor::new(store.clone(), correlation_id);

        Ok(Self {
            config,
            http_client,
            store,
            ingestor,
        })
    }

    /// Runs one dataset
    pub async fn run_dataset(&self, dataset: Dataset, options: &RunOptions) -> std::result::Result<RunReport, RunFailure> {
        let source = self
            .resolve_source(dataset)
            .await
            .map_err(|e| RunFailure::new(dataset, RunStage::Fetching, e))?;

        if dataset.is_per_city() {
            self.run_per_city(dataset, &source, options)
                .await
                .map_err(|e| RunFailure::new(dataset, RunStage::Fetching, e))
        } else {
            let mut downloader = BulkDownloader::new(
                self.http_client.clone(),
                self.config.dataset_url(dataset),
                dataset.shape(),
            );
            self.ingestor
                .run_bulk(dataset, &source, &mut downloader, options.limit)
                .await
        }
    }

    /// Runs every dataset in order
    pub async fn run_all(&self, options: &RunOptions) -> Vec<std::result::Result<RunReport, RunFailure>> {
        let mut results = Vec::with_capacity(Dataset::all().len());

        for dataset in Dataset::all() {
            let result = self.run_dataset(*dataset, options).await;
            if let Err(ref failure) = result {
                error!(dataset = %dataset, error = %failure, "Dataset failed, continuing harvest");
            }
            results.push(result);
        }

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(datasets = results.len(), failed, "Harvest complete");
        results
    }

    /// Stored observations for cities starting with `prefix`
    pub async fn query(&self, prefix: &str) -> Result<Vec<WeatherRow>> {
        self.store.weather_by_city_prefix(prefix).await
    }

    async fn resolve_source(&self, dataset: Dataset) -> Result<Source> {
        self.store.get_source(dataset.provider().source_name()).await
    }

    /// Errors here are setup failures; per-city fetch failures only count
    /// against the report.
    async fn run_per_city(&self, dataset: Dataset, source: &Source, options: &RunOptions) -> Result<RunReport> {
        let api_key = self.config.weatherbit_api_key()?.to_string();

        let targets: Vec<CityQuery> = self
            .store
            .list_cities(source, options.city_offset, options.city_limit)
            .await?
            .into_iter()
            .map(|stored| CityQuery::new(stored.city.name, stored.country))
            .collect();

        if targets.is_empty() {
            info!(dataset = %dataset, "No stored cities to fetch; run wb-cities first");
        }

        let client = WeatherBitClient::new(
            self.http_client.clone(),
            self.config.dataset_url(dataset),
            api_key,
            self.config.weatherbit_rate_limit_rpm,
        );

        let report = self
            .ingestor
            .run_per_city(dataset, source, Arc::new(client), targets, &self.config.fetch_pool())
            .await;
        Ok(report)
    }
}

impl std::fmt::Debug for Harvester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harvester")
            .field("max_concurrent_requests", &self.config.max_concurrent_requests)
            .field("available_permits", &self.http_client.available_permits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestionError;
    use crate::storage::MemoryStore;

    fn harvester(config: Config, store: Arc<MemoryStore>) -> Harvester {
        Harvester::new(config, store, "test-corr".to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_unseeded_source_fails_run() {
        let h = harvester(Config::default(), Arc::new(MemoryStore::new()));
        let failure = h.run_dataset(Dataset::OwDaily, &RunOptions::default()).await.unwrap_err();
        assert!(matches!(failure.source, IngestionError::SourceNotSeeded(_)));
    }

    #[tokio::test]
    async fn test_per_city_without_api_key_fails_fast() {
        let h = harvester(Config::default(), Arc::new(MemoryStore::seeded()));
        let failure = h.run_dataset(Dataset::WbCurrent, &RunOptions::default()).await.unwrap_err();
        assert!(matches!(failure.source, IngestionError::MissingApiKey("WeatherBit")));
        assert_eq!(failure.stage, RunStage::Fetching);
    }

    #[tokio::test]
    async fn test_per_city_with_no_cities_is_empty_run() {
        let config = Config {
            weatherbit_api_key: Some("k".to_string()),
            ..Config::default()
        };
        let h = harvester(config, Arc::new(MemoryStore::seeded()));
        let report = h.run_dataset(Dataset::WbCurrent, &RunOptions::default()).await.unwrap();
        assert_eq!(report.received, 0);
        assert_eq!(report.fetch_failures, 0);
    }
}
