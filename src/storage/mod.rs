//! Storage layer for ingested weather
//!
//! [`WeatherStore`] is the contract the pipeline writes through. Every
//! uniqueness invariant is enforced by the store itself:
//! - `country.name` is unique
//! - `(city.latitude, city.longitude)` is unique
//! - `(weather.city_id, weather.date)` is unique
//!
//! Concurrent get-or-create calls for the same key never surface a
//! uniqueness violation; the losing caller gets the winner's row.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use memory::MemoryStore;
pub use postgres::PgWeatherStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Country {
    pub id: i64,
    pub name: String,
}

/// A data provider; rows are seeded by migrations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct City {
    pub id: i64,
    pub name: String,
    pub country_id: i64,
    /// Source the city was first seen in
    pub source_id: i64,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WeatherObservation {
    pub id: i64,
    pub city_id: i64,
    /// Source of this observation, not necessarily the city's
    pub source_id: i64,
    pub date: DateTime<Utc>,
    /// Kelvin
    pub temperature: f64,
}

/// A city with its country name, as listed for per-city fetches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredCity {
    #[sqlx(flatten)]
    pub city: City,
    pub country: String,
}

/// One row of the read-only query surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WeatherRow {
    pub city: String,
    pub country: String,
    pub source: String,
    pub date: DateTime<Utc>,
    pub temperature: f64,
}

/// Result of a current-feed write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    /// Existed with a different temperature, now overwritten
    Updated,
    /// Existed with the same temperature
    Unchanged,
}

#[async_trait]
pub trait WeatherStore: Send + Sync {
    /// Resolves a seeded source by name
    async fn get_source(&self, name: &str) -> Result<Source>;

    async fn get_or_create_country(&self, name: &str) -> Result<Country>;

    /// Returns the city at `(latitude, longitude)`, creating it if absent
    ///
    /// The flag is `true` when this call created the row. An existing city
    /// keeps its stored name and country.
    async fn get_or_create_city(
        &self,
        name: &str,
        country: &Country,
        latitude: f64,
        longitude: f64,
        source: &Source,
    ) -> Result<(City, bool)>;

    async fn city_exists(&self, latitude: f64, longitude: f64) -> Result<bool>;

    async fn observation_exists(&self, city: &City, date: DateTime<Utc>) -> Result<bool>;

    /// Inserts an observation unless `(city, date)` already exists
    ///
    /// Returns whether a row was inserted.
    async fn create_observation(
        &self,
        city: &City,
        date: DateTime<Utc>,
        temperature: f64,
        source: &Source,
    ) -> Result<bool>;

    /// Inserts an observation, or overwrites its temperature if it differs
    async fn get_or_create_observation_with_update(
        &self,
        city: &City,
        date: DateTime<Utc>,
        temperature: f64,
        source: &Source,
    ) -> Result<(WeatherObservation, UpsertOutcome)>;

    /// Cities first seen in `source`, ordered by name
    async fn list_cities(&self, source: &Source, offset: usize, limit: usize) -> Result<Vec<StoredCity>>;

    /// Observations whose city name starts with `prefix`, ignoring case,
    /// ordered by city then date
    async fn weather_by_city_prefix(&self, prefix: &str) -> Result<Vec<WeatherRow>>;
}
