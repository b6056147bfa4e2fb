//! In-memory store
//!
//! Same contract as the PostgreSQL store, backed by hash maps under one
//! lock. Used for `--dry-run` and as the test double.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{City, Country, Source, StoredCity, UpsertOutcome, WeatherObservation, WeatherRow, WeatherStore};
use crate::error::{IngestionError, Result};
use crate::sources::Provider;

/// Coordinates as a hashable key; `-0.0` and `0.0` are the same place
type CoordKey = (u64, u64);

fn coord_key(latitude: f64, longitude: f64) -> CoordKey {
    ((latitude + 0.0).to_bits(), (longitude + 0.0).to_bits())
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    sources: HashMap<String, Source>,
    countries: HashMap<String, Country>,
    cities: HashMap<CoordKey, City>,
    observations: HashMap<(i64, DateTime<Utc>), WeatherObservation>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn country_name(&self, id: i64) -> String {
        self.countries
            .values()
            .find(|c| c.id == id)
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// An empty store with no sources
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with both provider sources, like a migrated database
    pub fn seeded() -> Self {
        let store = Self::new();
        store.add_source(Provider::OpenWeather.source_name(), "http://bulk.openweathermap.org");
        store.add_source(Provider::WeatherBit.source_name(), "https://api.weatherbit.io");
        store
    }

    pub fn add_source(&self, name: &str, url: &str) -> Source {
        let mut tables = self.tables.lock();
        if let Some(existing) = tables.sources.get(name) {
            return existing.clone();
        }
        let source = Source {
            id: tables.next_id(),
            name: name.to_string(),
            url: url.to_string(),
        };
        tables.sources.insert(name.to_string(), source.clone());
        source
    }

    pub fn city_count(&self) -> usize {
        self.tables.lock().cities.len()
    }

    pub fn observation_count(&self) -> usize {
        self.tables.lock().observations.len()
    }

    /// All observations, ordered by city then date
    pub fn observations(&self) -> Vec<WeatherObservation> {
        let mut all: Vec<_> = self.tables.lock().observations.values().cloned().collect();
        all.sort_by(|a, b| (a.city_id, a.date).cmp(&(b.city_id, b.date)));
        all
    }
}

#[async_trait]
impl WeatherStore for MemoryStore {
    async fn get_source(&self, name: &str) -> Result<Source> {
        self.tables
            .lock()
            .sources
            .get(name)
            .cloned()
            .ok_or_else(|| IngestionError::SourceNotSeeded(name.to_string()))
    }

    async fn get_or_create_country(&self, name: &str) -> Result<Country> {
        let mut tables = self.tables.lock();
        if let Some(country) = tables.countries.get(name) {
            return Ok(country.clone());
        }
        let country = Country {
            id: tables.next_id(),
            name: name.to_string(),
        };
        tables.countries.insert(name.to_string(), country.clone());
        Ok(country)
    }

    async fn get_or_create_city(
        &self,
        name: &str,
        country: &Country,
        latitude: f64,
        longitude: f64,
        source: &Source,
    ) -> Result<(City, bool)> {
        let mut tables = self.tables.lock();
        let key = coord_key(latitude, longitude);
        if let Some(city) = tables.cities.get(&key) {
            return Ok((city.clone(), false));
        }
        let city = City {
            id: tables.next_id(),
            name: name.to_string(),
            country_id: country.id,
            source_id: source.id,
            latitude,
            longitude,
        };
        tables.cities.insert(key, city.clone());
        Ok((city, true))
    }

    async fn city_exists(&self, latitude: f64, longitude: f64) -> Result<bool> {
        Ok(self.tables.lock().cities.contains_key(&coord_key(latitude, longitude)))
    }

    async fn observation_exists(&self, city: &City, date: DateTime<Utc>) -> Result<bool> {
        Ok(self.tables.lock().observations.contains_key(&(city.id, date)))
    }

    async fn create_observation(
        &self,
        city: &City,
        date: DateTime<Utc>,
        temperature: f64,
        source: &Source,
    ) -> Result<bool> {
        let mut tables = self.tables.lock();
        if tables.observations.contains_key(&(city.id, date)) {
            return Ok(false);
        }
        let observation = WeatherObservation {
            id: tables.next_id(),
            city_id: city.id,
            source_id: source.id,
            date,
            temperature,
        };
        tables.observations.insert((city.id, date), observation);
        Ok(true)
    }

    async fn get_or_create_observation_with_update(
        &self,
        city: &City,
        date: DateTime<Utc>,
        temperature: f64,
        source: &Source,
    ) -> Result<(WeatherObservation, UpsertOutcome)> {
        let mut tables = self.tables.lock();
        if let Some(existing) = tables.observations.get_mut(&(city.id, date)) {
            if existing.temperature == temperature {
                return Ok((existing.clone(), UpsertOutcome::Unchanged));
            }
            existing.temperature = temperature;
            return Ok((existing.clone(), UpsertOutcome::Updated));
        }
        let observation = WeatherObservation {
            id: tables.next_id(),
            city_id: city.id,
            source_id: source.id,
            date,
            temperature,
        };
        tables.observations.insert((city.id, date), observation.clone());
        Ok((observation, UpsertOutcome::Created))
    }

    async fn list_cities(&self, source: &Source, offset: usize, limit: usize) -> Result<Vec<StoredCity>> {
        let tables = self.tables.lock();
        let mut cities: Vec<&City> = tables.cities.values().filter(|c| c.source_id == source.id).collect();
        cities.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        Ok(cities
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|city| StoredCity {
                city: city.clone(),
                country: tables.country_name(city.country_id),
            })
            .collect())
    }

    async fn weather_by_city_prefix(&self, prefix: &str) -> Result<Vec<WeatherRow>> {
        let tables = self.tables.lock();
        let prefix = prefix.to_lowercase();
        let cities: HashMap<i64, &City> = tables
            .cities
            .values()
            .filter(|c| c.name.to_lowercase().starts_with(&prefix))
            .map(|c| (c.id, c))
            .collect();
        let source_names: HashMap<i64, &str> = tables.sources.values().map(|s| (s.id, s.name.as_str())).collect();

        let mut rows: Vec<WeatherRow> = tables
            .observations
            .values()
            .filter_map(|obs| {
                let city = cities.get(&obs.city_id)?;
                Some(WeatherRow {
                    city: city.name.clone(),
                    country: tables.country_name(city.country_id),
                    source: source_names.get(&obs.source_id).copied().unwrap_or_default().to_string(),
                    date: obs.date,
                    temperature: obs.temperature,
                })
            })
            .collect();
        rows.sort_by(|a, b| a.city.cmp(&b.city).then(a.date.cmp(&b.date)));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    async fn kyiv(store: &MemoryStore) -> (City, Source) {
        let source = store.get_source("OpenWeather").await.unwrap();
        let country = store.get_or_create_country("UA").await.unwrap();
        let (city, _) = store
            .get_or_create_city("Kyiv", &country, 50.45, 30.52, &source)
            .await
            .unwrap();
        (city, source)
    }

    #[tokio::test]
    async fn test_unseeded_source() {
        let store = MemoryStore::new();
        let err = store.get_source("OpenWeather").await.unwrap_err();
        assert!(matches!(err, IngestionError::SourceNotSeeded(_)));
    }

    #[tokio::test]
    async fn test_city_unique_by_coordinates() {
        let store = MemoryStore::seeded();
        let source = store.get_source("WeatherBit").await.unwrap();
        let ua = store.get_or_create_country("UA").await.unwrap();
        let kv = store.get_or_create_country("Kiev Oblast").await.unwrap();

        let (first, created) = store.get_or_create_city("Kyiv", &ua, 50.45, 30.52, &source).await.unwrap();
        assert!(created);
        let (second, created) = store.get_or_create_city("Kiev", &kv, 50.45, 30.52, &source).await.unwrap();
        assert!(!created);

        assert_eq!(first, second);
        assert_eq!(second.name, "Kyiv");
        assert_eq!(store.city_count(), 1);
        assert!(store.city_exists(50.45, 30.52).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_city_creation_yields_one_row() {
        let store = Arc::new(MemoryStore::seeded());
        let source = store.get_source("WeatherBit").await.unwrap();
        let country = store.get_or_create_country("NO").await.unwrap();

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let (store, source, country) = (store.clone(), source.clone(), country.clone());
                tokio::spawn(async move {
                    store
                        .get_or_create_city(&format!("Oslo {i}"), &country, 59.91, 10.75, &source)
                        .await
                })
            })
            .collect();

        let results: Vec<(City, bool)> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(results.iter().filter(|(_, created)| *created).count(), 1);
        assert_eq!(store.city_count(), 1);
        let id = results[0].0.id;
        assert!(results.iter().all(|(city, _)| city.id == id));
    }

    #[tokio::test]
    async fn test_observation_exists_tracks_city_and_date() {
        let store = MemoryStore::seeded();
        let (city, source) = kyiv(&store).await;
        let date = Utc.timestamp_opt(1_554_462_000, 0).unwrap();
        let next_day = Utc.timestamp_opt(1_554_548_400, 0).unwrap();

        assert!(!store.observation_exists(&city, date).await.unwrap());
        assert!(store.create_observation(&city, date, 285.5, &source).await.unwrap());
        assert!(store.observation_exists(&city, date).await.unwrap());
        assert!(!store.observation_exists(&city, next_day).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_observation_is_noop_when_present() {
        let store = MemoryStore::seeded();
        let (city, source) = kyiv(&store).await;
        let date = Utc.timestamp_opt(1_600_000_000, 0).unwrap();

        assert!(store.create_observation(&city, date, 290.0, &source).await.unwrap());
        assert!(!store.create_observation(&city, date, 295.0, &source).await.unwrap());

        let stored = store.observations();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].temperature, 290.0);
    }

    #[tokio::test]
    async fn test_upsert_outcomes() {
        let store = MemoryStore::seeded();
        let (city, source) = kyiv(&store).await;
        let date = Utc.timestamp_opt(1_600_000_000, 0).unwrap();

        let (_, outcome) = store.get_or_create_observation_with_update(&city, date, 280.0, &source).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);
        let (_, outcome) = store.get_or_create_observation_with_update(&city, date, 280.0, &source).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);
        let (obs, outcome) = store.get_or_create_observation_with_update(&city, date, 285.0, &source).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(obs.temperature, 285.0);
        assert_eq!(store.observation_count(), 1);
    }

    #[tokio::test]
    async fn test_list_cities_window_ordered_by_name() {
        let store = MemoryStore::seeded();
        let source = store.get_source("WeatherBit").await.unwrap();
        let other = store.get_source("OpenWeather").await.unwrap();
        let country = store.get_or_create_country("NO").await.unwrap();

        for (i, name) in ["Oslo", "Bergen", "Tromso", "Alta"].iter().enumerate() {
            store.get_or_create_city(name, &country, 60.0 + i as f64, 10.0, &source).await.unwrap();
        }
        store.get_or_create_city("Bodo", &country, 67.0, 14.0, &other).await.unwrap();

        let listed = store.list_cities(&source, 1, 2).await.unwrap();
        let names: Vec<_> = listed.iter().map(|c| c.city.name.as_str()).collect();
        assert_eq!(names, ["Bergen", "Oslo"]);
        assert_eq!(listed[0].country, "NO");
    }

    #[tokio::test]
    async fn test_prefix_query_ignores_case() {
        let store = MemoryStore::seeded();
        let (city, source) = kyiv(&store).await;
        let date = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
        store.create_observation(&city, date, 290.0, &source).await.unwrap();

        let rows = store.weather_by_city_prefix("ky").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].city, "Kyiv");
        assert_eq!(rows[0].country, "UA");
        assert_eq!(rows[0].source, "OpenWeather");
        assert!(store.weather_by_city_prefix("Lviv").await.unwrap().is_empty());
    }
}
