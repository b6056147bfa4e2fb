//! HTTP Client Module
//!
//! Provides the shared HTTP client used by every transport adapter:
//! - Semaphore-based concurrency limiting
//! - Request and connect timeouts
//! - Per-provider rate limiting
//! - API key redaction in error URLs
//!
//! The client never retries; retry policy belongs to the caller.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{clock::DefaultClock, middleware::NoOpMiddleware, state::NotKeyed, Quota, RateLimiter};
use reqwest::{Client, RequestBuilder};
use tokio::sync::Semaphore;
use tracing::debug;
use url::Url;

use crate::error::{IngestionError, Result};

/// Query parameters that carry credentials
const SECRET_PARAMS: &[&str] = &["key", "appid", "apikey", "api_key"];

/// Maximum length of an error body kept in an error
const MAX_ERROR_BODY: usize = 200;

const EXCHANGE_GRACE: Duration = Duration::from_secs(1);

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Maximum concurrent requests across all adapters
    pub max_concurrent_requests: usize,
    /// Request timeout
    pub request_timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 8,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("weather-ingestion/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// HTTP client with concurrency limiting and timeouts
pub struct ResilientHttpClient {
    /// Inner reqwest client
    client: Client,
    /// Global concurrency semaphore
    semaphore: Arc<Semaphore>,
    /// Configuration
    config: HttpClientConfig,
}

impl ResilientHttpClient {
    /// Creates a new HTTP client
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()
            .map_err(|e| IngestionError::Fetch {
                url: "<client builder>".to_string(),
                source: e,
            })?;

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));

        Ok(Self {
            client,
            semaphore,
            config,
        })
    }

    /// Creates a client with default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(HttpClientConfig::default())
    }


    /// Issues a GET against `url` and returns the full body
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.execute(url, self.client.get(url)).await
    }

    /// Issues a GET with query parameters and returns the full body
    pub async fn get_bytes_with_query<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        query: &T,
    ) -> Result<Vec<u8>> {
        let builder = self.client.get(url).query(query);
        // Report the URL including its query, minus credentials.
        let target = builder
            .try_clone()
            .and_then(|b| b.build().ok())
            .map(|req| req.url().to_string())
            .unwrap_or_else(|| url.to_string());

        self.execute(&target, builder).await
    }

    async fn execute(&self, target: &str, builder: RequestBuilder) -> Result<Vec<u8>> {
        let redacted = redact_url(target);

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| IngestionError::TaskFailed("HTTP semaphore closed".to_string()))?;

        debug!(url = %redacted, "Executing HTTP request");

        // The deadline starts once the request owns a permit.
        let deadline = self.exchange_deadline();
        match tokio::time::timeout(deadline, self.exchange(&redacted, builder)).await {
            Ok(result) => result,
            Err(_) => Err(IngestionError::FetchTimeout {
                url: redacted,
                after: deadline,
            }),
        }
    }

    async fn exchange(&self, redacted: &str, builder: RequestBuilder) -> Result<Vec<u8>> {
        let response = builder.send().await.map_err(|e| IngestionError::Fetch {
            url: redacted.to_string(),
            source: e.without_url(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestionError::FetchStatus {
                url: redacted.to_string(),
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let body = response.bytes().await.map_err(|e| IngestionError::Fetch {
            url: redacted.to_string(),
            source: e.without_url(),
        })?;

        debug!(url = %redacted, status = %status, bytes = body.len(), "Request succeeded");
        Ok(body.to_vec())
    }

    /// Hard ceiling on one exchange, one second above the request timeout
    pub fn exchange_deadline(&self) -> Duration {
        self.config.request_timeout + EXCHANGE_GRACE
    }

    /// Gets the number of available permits
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

type DirectRateLimiter = RateLimiter<NotKeyed, governor::state::InMemoryState, DefaultClock, NoOpMiddleware>;

/// Provider-specific client with a request rate limit
pub struct SourceHttpClient {
    /// Shared base client
    client: Arc<ResilientHttpClient>,
    /// Provider rate limiter
    rate_limiter: DirectRateLimiter,
    /// Provider identifier
    source_id: String,
}

impl SourceHttpClient {
    /// Creates a new provider-specific client
    pub fn new(client: Arc<ResilientHttpClient>, source_id: &str, rate_limit_rpm: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(rate_limit_rpm).unwrap_or(NonZeroU32::MIN));
        Self::with_quota(client, source_id, quota)
    }

    pub fn with_quota(client: Arc<ResilientHttpClient>, source_id: &str, quota: Quota) -> Self {
        Self {
            client,
            rate_limiter: RateLimiter::direct(quota),
            source_id: source_id.to_string(),
        }
    }

    /// Executes a rate-limited GET with query parameters
    pub async fn get_with_query<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        query: &T,
    ) -> Result<Vec<u8>> {
        self.rate_limiter.until_ready().await;
        self.client.get_bytes_with_query(url, query).await
    }

    /// Gets the provider ID
    pub fn source_id(&self) -> &str {
        &self.source_id
    }
}

/// Replaces credential query parameters with `***`
pub fn redact_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };

    if url.query().is_none() {
        return url.to_string();
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            if SECRET_PARAMS.contains(&k.to_ascii_lowercase().as_str()) {
                (k.into_owned(), "***".to_string())
            } else {
                (k.into_owned(), v.into_owned())
            }
        })
        .collect();

    url.query_pairs_mut().clear().extend_pairs(pairs);
    url.to_string()
}

fn truncate_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}
