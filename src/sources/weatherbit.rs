//! WeatherBit current-weather client
//!
//! Issues one rate-limited GET per city against the current-weather
//! endpoint: `GET {base_url}?city=..&country=..&key=..`.
//! https://www.weatherbit.io/api/weather-current

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{CityFetcher, CityQuery};
use crate::error::{IngestionError, Result};
use crate::http_client::{ResilientHttpClient, SourceHttpClient};
use crate::schemas::RawRecord;

pub const WEATHERBIT_CURRENT_URL: &str = "https://api.weatherbit.io/v2.0/current";

pub struct WeatherBitClient {
    client: SourceHttpClient,
    base_url: String,
    api_key: String,
}

impl WeatherBitClient {
    pub fn new(
        http_client: Arc<ResilientHttpClient>,
        base_url: impl Into<String>,
        api_key: String,
        rate_limit_rpm: u32,
    ) -> Self {
        Self {
            client: SourceHttpClient::new(http_client, "weatherbit", rate_limit_rpm),
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl CityFetcher for WeatherBitClient {
    async fn fetch_city(&self, query: &CityQuery) -> Result<RawRecord> {
        let params = [
            ("city", query.city.as_str()),
            ("country", query.country.as_str()),
            ("key", self.api_key.as_str()),
        ];

        debug!(source = self.client.source_id(), city = %query, "Fetching current weather");
        let body = self.client.get_with_query(&self.base_url, &params).await?;

        // WeatherBit answers 204 with an empty body for unknown cities.
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(IngestionError::Parse(format!("empty response for {query}")));
        }

        serde_json::from_slice(&body)
            .map_err(|e| IngestionError::Parse(format!("response for {query}: {e}")))
    }
}
