//! PostgreSQL store
//!
//! Get-or-create goes through `INSERT .. ON CONFLICT DO NOTHING RETURNING`
//! followed by a read of the existing row, so a concurrent insert of the
//! same key resolves to that row instead of a unique violation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};

use super::{City, Country, Source, StoredCity, UpsertOutcome, WeatherObservation, WeatherRow, WeatherStore};
use crate::error::{IngestionError, Result};

/// Attempts at resolving a get-or-create before giving up with `Conflict`
const CONFLICT_RETRIES: usize = 3;

const CITY_COLUMNS: &str = "id, name, country_id, source_id, latitude, longitude";

#[derive(Clone)]
pub struct PgWeatherStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct UpsertRow {
    #[sqlx(flatten)]
    observation: WeatherObservation,
    created: bool,
}

impl PgWeatherStore {
    /// Connects to the database
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        info!(max_connections, "Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Storage initialized");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies pending migrations
    pub async fn migrate(&self) -> Result<()> {
        info!("Applying migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_city(&self, latitude: f64, longitude: f64) -> Result<Option<City>> {
        let city = sqlx::query_as::<_, City>(&format!(
            "SELECT {CITY_COLUMNS} FROM city WHERE latitude = $1 AND longitude = $2"
        ))
        .bind(latitude)
        .bind(longitude)
        .fetch_optional(&self.pool)
        .await?;

        Ok(city)
    }

    async fn find_observation(&self, city_id: i64, date: DateTime<Utc>) -> Result<Option<WeatherObservation>> {
        let observation = sqlx::query_as::<_, WeatherObservation>(
            "SELECT id, city_id, source_id, date, temperature FROM weather WHERE city_id = $1 AND date = $2",
        )
        .bind(city_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(observation)
    }
}

#[async_trait]
impl WeatherStore for PgWeatherStore {
    async fn get_source(&self, name: &str) -> Result<Source> {
        sqlx::query_as::<_, Source>("SELECT id, name, url FROM source WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| IngestionError::SourceNotSeeded(name.to_string()))
    }

    async fn get_or_create_country(&self, name: &str) -> Result<Country> {
        for _ in 0..CONFLICT_RETRIES {
            let inserted = sqlx::query_as::<_, Country>(
                "INSERT INTO country (name) VALUES ($1) ON CONFLICT (name) DO NOTHING RETURNING id, name",
            )
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(country) = inserted {
                debug!(country = %country.name, "Country created");
                return Ok(country);
            }

            let existing = sqlx::query_as::<_, Country>("SELECT id, name FROM country WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

            if let Some(country) = existing {
                return Ok(country);
            }
        }

        Err(IngestionError::Conflict(format!("country {name}")))
    }

    async fn get_or_create_city(
        &self,
        name: &str,
        country: &Country,
        latitude: f64,
        longitude: f64,
        source: &Source,
    ) -> Result<(City, bool)> {
        for _ in 0..CONFLICT_RETRIES {
            let inserted = sqlx::query_as::<_, City>(&format!(
                "INSERT INTO city (name, country_id, source_id, latitude, longitude) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (latitude, longitude) DO NOTHING \
                 RETURNING {CITY_COLUMNS}"
            ))
            .bind(name)
            .bind(country.id)
            .bind(source.id)
            .bind(latitude)
            .bind(longitude)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(city) = inserted {
                debug!(city = %city.name, latitude, longitude, "City created");
                return Ok((city, true));
            }

            if let Some(city) = self.find_city(latitude, longitude).await? {
                return Ok((city, false));
            }
        }

        Err(IngestionError::Conflict(format!("city at ({latitude}, {longitude})")))
    }

    async fn city_exists(&self, latitude: f64, longitude: f64) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM city WHERE latitude = $1 AND longitude = $2)")
                .bind(latitude)
                .bind(longitude)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }

    async fn observation_exists(&self, city: &City, date: DateTime<Utc>) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM weather WHERE city_id = $1 AND date = $2)")
                .bind(city.id)
                .bind(date)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }

    async fn create_observation(
        &self,
        city: &City,
        date: DateTime<Utc>,
        temperature: f64,
        source: &Source,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO weather (city_id, source_id, date, temperature) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (city_id, date) DO NOTHING",
        )
        .bind(city.id)
        .bind(source.id)
        .bind(date)
        .bind(temperature)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_or_create_observation_with_update(
        &self,
        city: &City,
        date: DateTime<Utc>,
        temperature: f64,
        source: &Source,
    ) -> Result<(WeatherObservation, UpsertOutcome)> {
        for _ in 0..CONFLICT_RETRIES {
            // `xmax = 0` only for a freshly inserted tuple. The WHERE clause
            // suppresses the update, and the returned row, when unchanged.
            let upserted = sqlx::query_as::<_, UpsertRow>(
                "INSERT INTO weather (city_id, source_id, date, temperature) VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (city_id, date) DO UPDATE SET temperature = EXCLUDED.temperature \
                 WHERE weather.temperature IS DISTINCT FROM EXCLUDED.temperature \
                 RETURNING id, city_id, source_id, date, temperature, (xmax = 0) AS created",
            )
            .bind(city.id)
            .bind(source.id)
            .bind(date)
            .bind(temperature)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = upserted {
                let outcome = if row.created {
                    UpsertOutcome::Created
                } else {
                    UpsertOutcome::Updated
                };
                return Ok((row.observation, outcome));
            }

            if let Some(observation) = self.find_observation(city.id, date).await? {
                return Ok((observation, UpsertOutcome::Unchanged));
            }
        }

        Err(IngestionError::Conflict(format!("weather for city {} at {date}", city.id)))
    }

    async fn list_cities(&self, source: &Source, offset: usize, limit: usize) -> Result<Vec<StoredCity>> {
        let cities = sqlx::query_as::<_, StoredCity>(
            "SELECT c.id, c.name, c.country_id, c.source_id, c.latitude, c.longitude, co.name AS country \
             FROM city c JOIN country co ON co.id = c.country_id \
             WHERE c.source_id = $1 \
             ORDER BY c.name, c.id \
             OFFSET $2 LIMIT $3",
        )
        .bind(source.id)
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(cities)
    }

    async fn weather_by_city_prefix(&self, prefix: &str) -> Result<Vec<WeatherRow>> {
        let rows = sqlx::query_as::<_, WeatherRow>(
            "SELECT c.name AS city, co.name AS country, s.name AS source, w.date, w.temperature \
             FROM weather w \
             JOIN city c ON c.id = w.city_id \
             JOIN country co ON co.id = c.country_id \
             JOIN source s ON s.id = w.source_id \
             WHERE c.name ILIKE $1 ESCAPE '\\' \
             ORDER BY c.name, w.date",
        )
        .bind(format!("{}%", escape_like(prefix)))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Escapes LIKE wildcards so `prefix` matches literally
fn escape_like(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for ch in prefix.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
