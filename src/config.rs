//! Configuration for the Ingestion Service

use serde::Deserialize;
use std::time::Duration;

use crate::error::{IngestionError, Result};
use crate::http_client::HttpClientConfig;
use crate::pipeline::worker::FetchPool;
use crate::sources::weatherbit::WEATHERBIT_CURRENT_URL;
use crate::sources::Dataset;

const MAX_CONCURRENCY: usize = 64;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Database
    pub database_url: Option<String>,
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    // Provider credentials
    pub weatherbit_api_key: Option<String>,

    // Provider endpoints
    #[serde(default = "default_openweather_daily_url")]
    pub openweather_daily_url: String,
    #[serde(default = "default_openweather_hourly_url")]
    pub openweather_hourly_url: String,
    #[serde(default = "default_openweather_current_url")]
    pub openweather_current_url: String,
    #[serde(default = "default_weatherbit_cities_url")]
    pub weatherbit_cities_url: String,
    #[serde(default = "default_weatherbit_current_url")]
    pub weatherbit_current_url: String,

    // Concurrency
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    // Timeouts (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    // Retry policy for per-city fetches
    #[serde(default)]
    pub fetch_max_retries: u32,
    #[serde(default = "default_fetch_retry_delay")]
    pub fetch_retry_delay_ms: u64,

    // Rate limiting (requests per minute)
    #[serde(default = "default_weatherbit_rate_limit")]
    pub weatherbit_rate_limit_rpm: u32,
}

fn default_database_max_connections() -> u32 {
    5
}

fn default_openweather_daily_url() -> String {
    "http://bulk.openweathermap.org/sample/daily_14.json.gz".to_string()
}

fn default_openweather_hourly_url() -> String {
    "http://bulk.openweathermap.org/sample/hourly_14.json.gz".to_string()
}

fn default_openweather_current_url() -> String {
    "http://bulk.openweathermap.org/sample/weather_14.json.gz".to_string()
}

fn default_weatherbit_cities_url() -> String {
    "https://www.weatherbit.io/static/exports/cities_20000.json.gz".to_string()
}

fn default_weatherbit_current_url() -> String {
    WEATHERBIT_CURRENT_URL.to_string()
}

fn default_max_concurrent_requests() -> usize {
    8
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_fetch_retry_delay() -> u64 {
    500
}

fn default_weatherbit_rate_limit() -> u32 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: default_database_max_connections(),
            weatherbit_api_key: None,
            openweather_daily_url: default_openweather_daily_url(),
            openweather_hourly_url: default_openweather_hourly_url(),
            openweather_current_url: default_openweather_current_url(),
            weatherbit_cities_url: default_weatherbit_cities_url(),
            weatherbit_current_url: default_weatherbit_current_url(),
            max_concurrent_requests: default_max_concurrent_requests(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            fetch_max_retries: 0,
            fetch_retry_delay_ms: default_fetch_retry_delay(),
            weatherbit_rate_limit_rpm: default_weatherbit_rate_limit(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file
        dotenvy::dotenv().ok();

        Self::from_env(config::Environment::default())
    }

    /// Builds the config from an environment source
    pub fn from_env(environment: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(environment.separator("__").try_parsing(true))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_CONCURRENCY).contains(&self.max_concurrent_requests) {
            return Err(invalid(format!(
                "MAX_CONCURRENT_REQUESTS must be between 1 and {MAX_CONCURRENCY}, got {}",
                self.max_concurrent_requests
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("REQUEST_TIMEOUT_SECS must be greater than 0".to_string()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(invalid("CONNECT_TIMEOUT_SECS must be greater than 0".to_string()));
        }
        if self.database_max_connections == 0 {
            return Err(invalid("DATABASE_MAX_CONNECTIONS must be greater than 0".to_string()));
        }
        if self.weatherbit_rate_limit_rpm == 0 {
            return Err(invalid("WEATHERBIT_RATE_LIMIT_RPM must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Checks if WeatherBit is configured
    pub fn has_weatherbit(&self) -> bool {
        self.weatherbit_api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    pub fn weatherbit_api_key(&self) -> Result<&str> {
        self.weatherbit_api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(IngestionError::MissingApiKey("WeatherBit"))
    }

    /// Endpoint a dataset is fetched from
    pub fn dataset_url(&self, dataset: Dataset) -> &str {
        match dataset {
            Dataset::OwDaily => &self.openweather_daily_url,
            Dataset::OwHourly => &self.openweather_hourly_url,
            Dataset::OwCurrent => &self.openweather_current_url,
            Dataset::WbCities => &self.weatherbit_cities_url,
            Dataset::WbCurrent => &self.weatherbit_current_url,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            max_concurrent_requests: self.max_concurrent_requests,
            request_timeout: self.request_timeout(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            ..Default::default()
        }
    }

    /// Per-city fetch pool, one worker per client permit
    pub fn fetch_pool(&self) -> FetchPool {
        FetchPool::new(self.max_concurrent_requests)
            .with_retries(self.fetch_max_retries, Duration::from_millis(self.fetch_retry_delay_ms))
    }
}

fn invalid(message: String) -> IngestionError {
    IngestionError::Config(config::ConfigError::Message(message))
}
