//! Ingestion Pipeline
//!
//! Drives one run for one dataset:
//! `fetching → parsing → (validating → resolving city → recording)* → done`
//!
//! Only fetching and parsing can abort a run. A record that fails
//! validation or a store write is logged, counted and skipped.

pub mod stages;
pub mod worker;

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn, Instrument};

use crate::error::{IngestionError, RunFailure};
use crate::metrics::{self, RunTimer};
use crate::schemas::{self, RawRecord};
use crate::sources::{CityFetcher, CityQuery, Dataset, Transport};
use crate::storage::{Source, WeatherStore};

use stages::{saver_for, SaveSummary};
use worker::FetchPool;

/// Stages of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Fetching,
    Parsing,
    Validating,
    ResolvingCity,
    Recording,
    Done,
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStage::Fetching => "fetching",
            RunStage::Parsing => "parsing",
            RunStage::Validating => "validating",
            RunStage::ResolvingCity => "resolving city",
            RunStage::Recording => "recording",
            RunStage::Done => "done",
        };
        f.write_str(name)
    }
}

// ============================================
// RUN REPORT
// ============================================

/// Counts for a completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub dataset: Dataset,
    /// Records fetched and parsed
    pub received: usize,
    /// Records validated and written
    pub processed: usize,
    pub skipped_invalid: usize,
    /// Per-city fetches that failed
    pub fetch_failures: usize,
    /// Valid records whose write failed
    pub store_failures: usize,
    pub cities_created: usize,
    pub observations_created: usize,
    pub observations_updated: usize,
    pub observations_unchanged: usize,
    pub observations_existing: usize,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            received: 0,
            processed: 0,
            skipped_invalid: 0,
            fetch_failures: 0,
            store_failures: 0,
            cities_created: 0,
            observations_created: 0,
            observations_updated: 0,
            observations_unchanged: 0,
            observations_existing: 0,
            elapsed_ms: 0,
        }
    }

    /// Records that did not make it into the store
    pub fn skipped(&self) -> usize {
        self.skipped_invalid + self.fetch_failures + self.store_failures
    }

    fn absorb(&mut self, summary: &SaveSummary) {
        self.processed += 1;
        self.cities_created += usize::from(summary.city_created);
        self.observations_created += summary.observations_created;
        self.observations_updated += summary.observations_updated;
        self.observations_unchanged += summary.observations_unchanged;
        self.observations_existing += summary.observations_existing;
    }

    fn publish_metrics(&self) {
        let dataset = self.dataset.as_str();
        let counts = [
            (metrics::OUTCOME_INVALID, self.skipped_invalid),
            (metrics::OUTCOME_STORE_ERROR, self.store_failures),
            (metrics::OUTCOME_CITY_CREATED, self.cities_created),
            (metrics::OUTCOME_CREATED, self.observations_created),
            (metrics::OUTCOME_UPDATED, self.observations_updated),
            (metrics::OUTCOME_UNCHANGED, self.observations_unchanged),
            (metrics::OUTCOME_EXISTING, self.observations_existing),
        ];
        for (outcome, count) in counts {
            metrics::record_outcome(dataset, outcome, count as u64);
        }
    }
}

// ============================================
// INGESTOR
// ============================================

/// Runs datasets against one store
///
/// Source rows are resolved by the caller and passed into each run.
pub struct Ingestor {
    store: Arc<dyn WeatherStore>,
    correlation_id: String,
}

impl Ingestor {
    pub fn new(store: Arc<dyn WeatherStore>, correlation_id: impl Into<String>) -> Self {
        Self {
            store,
            correlation_id: correlation_id.into(),
        }
    }

    /// Runs a single-payload dataset
    ///
    /// `limit` caps how many parsed records are processed.
    pub async fn run_bulk<T: Transport + ?Sized>(
        &self,
        dataset: Dataset,
        source: &Source,
        transport: &mut T,
        limit: Option<usize>,
    ) -> Result<RunReport, RunFailure> {
        let span = tracing::info_span!(
            "ingestion_run",
            dataset = %dataset,
            correlation_id = %self.correlation_id
        );

        async move {
            let timer = RunTimer::new(dataset.as_str());
            info!(url = %transport.target(), "Fetching payload");

            if let Err(e) = transport.fetch().await {
                return Err(self.fail(dataset, RunStage::Fetching, e));
            }

            let mut records = match transport.parse() {
                Ok(records) => records,
                Err(e) => return Err(self.fail(dataset, RunStage::Parsing, e)),
            };

            if let Some(limit) = limit {
                records.truncate(limit);
            }

            let mut report = self.ingest_records(dataset, source, records).await;
            report.elapsed_ms = timer.elapsed().as_millis() as u64;
            self.finish(&report);
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Fetches current weather for each target city, then ingests the
    /// responses
    ///
    /// Failed fetches are logged and counted; they never abort the run.
    pub async fn run_per_city(
        &self,
        dataset: Dataset,
        source: &Source,
        fetcher: Arc<dyn CityFetcher>,
        targets: Vec<CityQuery>,
        pool: &FetchPool,
    ) -> RunReport {
        let span = tracing::info_span!(
            "ingestion_run",
            dataset = %dataset,
            correlation_id = %self.correlation_id
        );

        async move {
            let timer = RunTimer::new(dataset.as_str());
            info!(targets = targets.len(), workers = pool.workers(), "Fetching per-city payloads");

            let outcomes = pool
                .run(targets, move |query: CityQuery| {
                    let fetcher = fetcher.clone();
                    async move { fetcher.fetch_city(&query).await }
                })
                .await;

            let mut records = Vec::with_capacity(outcomes.len());
            let mut fetch_failures = 0;
            for outcome in outcomes {
                match outcome.result {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        warn!(city = %outcome.target, error = %e, "City fetch failed, skipping");
                        metrics::record_fetch_failure(dataset.as_str());
                        fetch_failures += 1;
                    }
                }
            }

            let mut report = self.ingest_records(dataset, source, records).await;
            report.fetch_failures = fetch_failures;
            report.elapsed_ms = timer.elapsed().as_millis() as u64;
            self.finish(&report);
            report
        }
        .instrument(span)
        .await
    }

    /// Validates and writes already-parsed records
    pub async fn ingest_records(&self, dataset: Dataset, source: &Source, records: Vec<RawRecord>) -> RunReport {
        let schema = dataset.schema();
        let saver = saver_for(dataset.write_mode());
        let mut report = RunReport::new(dataset);
        report.received = records.len();

        for raw in records {
            let normalized = match schemas::validate(schema, &raw) {
                Ok(normalized) => normalized,
                Err(e) => {
                    warn!(raw = %e.raw, reason = %e.reason, schema = %e.schema, "Invalid record, skipping");
                    report.skipped_invalid += 1;
                    continue;
                }
            };

            match saver.create(self.store.as_ref(), source, &normalized).await {
                Ok(summary) => report.absorb(&summary),
                Err(e) => {
                    error!(
                        city = %normalized.city.name,
                        latitude = normalized.city.latitude,
                        longitude = normalized.city.longitude,
                        error = %e,
                        "Failed to write record, skipping"
                    );
                    report.store_failures += 1;
                }
            }
        }

        report
    }

    fn fail(&self, dataset: Dataset, stage: RunStage, source: IngestionError) -> RunFailure {
        let failure = RunFailure::new(dataset, stage, source);
        error!(stage = %stage, error = %failure.source, "Run aborted");
        metrics::record_run(dataset.as_str(), metrics::RUN_FAILED);
        failure
    }

    fn finish(&self, report: &RunReport) {
        report.publish_metrics();
        metrics::record_run(report.dataset.as_str(), metrics::RUN_COMPLETED);
        info!(
            stage = %RunStage::Done,
            received = report.received,
            processed = report.processed,
            skipped = report.skipped(),
            cities_created = report.cities_created,
            created = report.observations_created,
            updated = report.observations_updated,
            elapsed_ms = report.elapsed_ms,
            "Run completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticTransport {
        fetch_error: bool,
        records: Option<Vec<RawRecord>>,
    }

    #[async_trait]
    impl Transport for StaticTransport {
        fn target(&self) -> &str {
            "static"
        }

        async fn fetch(&mut self) -> crate::error::Result<usize> {
            if self.fetch_error {
                return Err(IngestionError::FetchStatus {
                    url: "static".to_string(),
                    status: 500,
                    body: String::new(),
                });
            }
            Ok(0)
        }

        fn parse(&mut self) -> crate::error::Result<Vec<RawRecord>> {
            self.records
                .take()
                .ok_or_else(|| IngestionError::Parse("expected a JSON array".to_string()))
        }
    }

    fn ow_current(name: &str, lat: f64, temp: f64) -> RawRecord {
        json!({
            "city": {"name": name, "country": "UA", "coord": {"lat": lat, "lon": 30.0}},
            "main": {"temp": temp},
            "time": 1_600_000_000
        })
    }

    async fn setup() -> (Ingestor, Arc<MemoryStore>, Source) {
        let store = Arc::new(MemoryStore::seeded());
        let source = store.get_source("OpenWeather").await.unwrap();
        (Ingestor::new(store.clone(), "test-corr"), store, source)
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(RunStage::ResolvingCity.to_string(), "resolving city");
        assert_eq!(RunStage::Fetching.to_string(), "fetching");
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_at_fetching() {
        let (ingestor, _, source) = setup().await;
        let mut transport = StaticTransport {
            fetch_error: true,
            records: Some(vec![]),
        };

        let failure = ingestor
            .run_bulk(Dataset::OwCurrent, &source, &mut transport, None)
            .await
            .unwrap_err();
        assert_eq!(failure.stage, RunStage::Fetching);
        assert_eq!(failure.dataset, Dataset::OwCurrent);
    }

    #[tokio::test]
    async fn test_parse_failure_aborts_at_parsing() {
        let (ingestor, _, source) = setup().await;
        let mut transport = StaticTransport {
            fetch_error: false,
            records: None,
        };

        let failure = ingestor
            .run_bulk(Dataset::OwCurrent, &source, &mut transport, None)
            .await
            .unwrap_err();
        assert_eq!(failure.stage, RunStage::Parsing);
        assert!(failure.to_string().contains("while parsing"));
    }

    #[tokio::test]
    async fn test_invalid_record_skipped_siblings_processed() {
        let (ingestor, store, source) = setup().await;
        let mut broken = ow_current("Nowhere", 10.0, 280.0);
        broken["city"].as_object_mut().unwrap().remove("coord");

        let records = vec![ow_current("Kyiv", 50.45, 280.0), broken, ow_current("Lviv", 49.8, 281.0)];
        let report = ingestor.ingest_records(Dataset::OwCurrent, &source, records).await;

        assert_eq!(report.received, 3);
        assert_eq!(report.processed, 2);
        assert_eq!(report.skipped_invalid, 1);
        assert_eq!(store.city_count(), 2);
        assert_eq!(store.observation_count(), 2);
        assert!(store.weather_by_city_prefix("Nowhere").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_last_write_wins_within_batch() {
        let (ingestor, store, source) = setup().await;
        let records = vec![ow_current("Kyiv", 50.45, 280.0), ow_current("Kyiv", 50.45, 284.0)];

        let report = ingestor.ingest_records(Dataset::OwCurrent, &source, records).await;

        assert_eq!(report.observations_created, 1);
        assert_eq!(report.observations_updated, 1);
        let stored = store.observations();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].temperature, 284.0);
    }

    #[tokio::test]
    async fn test_limit_caps_processed_records() {
        let (ingestor, store, source) = setup().await;
        let mut transport = StaticTransport {
            fetch_error: false,
            records: Some(vec![
                ow_current("A", 1.0, 280.0),
                ow_current("B", 2.0, 280.0),
                ow_current("C", 3.0, 280.0),
            ]),
        };

        let report = ingestor
            .run_bulk(Dataset::OwCurrent, &source, &mut transport, Some(2))
            .await
            .unwrap();
        assert_eq!(report.received, 2);
        assert_eq!(store.city_count(), 2);
    }
}
