//! Savers
//!
//! One saver per write mode. Each takes a validated record, resolves its
//! city and writes its readings through the store.

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::schemas::NormalizedRecord;
use crate::sources::WriteMode;
use crate::storage::{City, Source, UpsertOutcome, WeatherStore};

/// What one record's write changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub city_created: bool,
    pub observations_created: usize,
    pub observations_updated: usize,
    pub observations_unchanged: usize,
    /// Historical readings skipped because `(city, date)` was already stored
    pub observations_existing: usize,
}

#[async_trait]
pub trait Saver: Send + Sync {
    fn mode(&self) -> WriteMode;

    async fn create(&self, store: &dyn WeatherStore, source: &Source, record: &NormalizedRecord)
        -> Result<SaveSummary>;
}

/// Saver for a write mode
pub fn saver_for(mode: WriteMode) -> &'static dyn Saver {
    match mode {
        WriteMode::Historical => &HistoricalSaver,
        WriteMode::Current => &CurrentSaver,
        WriteMode::Catalog => &CatalogSaver,
    }
}

/// Gets or creates the record's country, then its city
pub async fn resolve_city(
    store: &dyn WeatherStore,
    source: &Source,
    record: &NormalizedRecord,
) -> Result<(City, bool)> {
    let city = &record.city;
    let country = store.get_or_create_country(&city.country).await?;
    store
        .get_or_create_city(&city.name, &country, city.latitude, city.longitude, source)
        .await
}

/// Daily and hourly feeds: never overwrite a stored reading
pub struct HistoricalSaver;

#[async_trait]
impl Saver for HistoricalSaver {
    fn mode(&self) -> WriteMode {
        WriteMode::Historical
    }

    async fn create(
        &self,
        store: &dyn WeatherStore,
        source: &Source,
        record: &NormalizedRecord,
    ) -> Result<SaveSummary> {
        let (city, city_created) = resolve_city(store, source, record).await?;
        let mut summary = SaveSummary {
            city_created,
            ..Default::default()
        };

        for reading in &record.readings {
            if store
                .create_observation(&city, reading.observed_at, reading.temperature_k, source)
                .await?
            {
                summary.observations_created += 1;
            } else {
                summary.observations_existing += 1;
            }
        }

        debug!(
            city = %city.name,
            created = summary.observations_created,
            existing = summary.observations_existing,
            "Historical readings saved"
        );
        Ok(summary)
    }
}

/// Current feeds: last write wins
pub struct CurrentSaver;

#[async_trait]
impl Saver for CurrentSaver {
    fn mode(&self) -> WriteMode {
        WriteMode::Current
    }

    async fn create(
        &self,
        store: &dyn WeatherStore,
        source: &Source,
        record: &NormalizedRecord,
    ) -> Result<SaveSummary> {
        let (city, city_created) = resolve_city(store, source, record).await?;
        let mut summary = SaveSummary {
            city_created,
            ..Default::default()
        };

        for reading in &record.readings {
            let (_, outcome) = store
                .get_or_create_observation_with_update(&city, reading.observed_at, reading.temperature_k, source)
                .await?;
            match outcome {
                UpsertOutcome::Created => summary.observations_created += 1,
                UpsertOutcome::Updated => summary.observations_updated += 1,
                UpsertOutcome::Unchanged => summary.observations_unchanged += 1,
            }
        }

        Ok(summary)
    }
}

/// City catalogue: cities only
pub struct CatalogSaver;

#[async_trait]
impl Saver for CatalogSaver {
    fn mode(&self) -> WriteMode {
        WriteMode::Catalog
    }

    async fn create(
        &self,
        store: &dyn WeatherStore,
        source: &Source,
        record: &NormalizedRecord,
    ) -> Result<SaveSummary> {
        let (_, city_created) = resolve_city(store, source, record).await?;
        Ok(SaveSummary {
            city_created,
            ..Default::default()
        })
    }
}
