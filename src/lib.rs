//! Weather Ingestion
//!
//! Bulk and per-city weather snapshot ingestion from OpenWeather and
//! WeatherBit into a relational store.
//!
//! Features:
//! - Gzip bulk dumps and bounded per-city fan-out with per-fetch timeouts
//! - Schema validation with per-provider field alias tables
//! - Idempotent city and observation writes, last-write-wins for current feeds
//! - Semaphore-based concurrency limiting and provider rate limiting
//! - Correlation IDs for tracing
//! - Prometheus metrics per dataset

pub mod config;
pub mod error;
pub mod harvester;
pub mod http_client;
pub mod metrics;
pub mod pipeline;
pub mod schemas;
pub mod sources;
pub mod storage;

pub use error::{IngestionError, Result, RunFailure};
pub use pipeline::{Ingestor, RunReport, RunStage};
pub use sources::Dataset;
