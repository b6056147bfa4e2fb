//! Weather Ingestion Service
//! Bulk and per-city weather snapshot harvesting from OpenWeather and WeatherBit

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use weather_ingestion::config::Config;
use weather_ingestion::harvester::{Harvester, RunOptions, DEFAULT_CITY_LIMIT};
use weather_ingestion::metrics;
use weather_ingestion::storage::{MemoryStore, PgWeatherStore, WeatherStore};
use weather_ingestion::{Dataset, RunFailure, RunReport};

/// Weather Ingestion Service - weather snapshot harvesting
#[derive(Parser, Debug)]
#[command(name = "weather-ingestion")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bulk and per-city weather snapshot ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,

    /// Print Prometheus metrics after the command finishes
    #[arg(long, default_value = "false", global = true)]
    print_metrics: bool,
}

#[derive(clap::Args, Debug, Clone)]
struct RunArgs {
    /// Maximum number of records to process from a bulk payload
    #[arg(short = 'n', long)]
    limit: Option<usize>,

    /// Skip this many stored cities for per-city datasets
    #[arg(long, default_value = "0")]
    city_offset: usize,

    /// Number of stored cities to fetch for per-city datasets
    #[arg(long, default_value_t = DEFAULT_CITY_LIMIT)]
    city_limit: usize,

    /// Use an in-memory store instead of the database
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Output format (json, summary)
    #[arg(short, long, default_value = "summary")]
    output: String,
}

impl RunArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            limit: self.limit,
            city_offset: self.city_offset,
            city_limit: self.city_limit,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest a single dataset (ow-daily, ow-hourly, ow-current, wb-cities, wb-current)
    Ingest {
        #[arg(short, long)]
        dataset: Dataset,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Ingest every dataset in order
    Harvest {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Show stored weather for cities whose name starts with a prefix
    Query {
        /// City name prefix (case-insensitive)
        prefix: String,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// Apply database migrations
    Migrate,
}

/// Generates a new correlation ID for the session
fn generate_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Sets up structured logging with tracing
fn setup_logging(log_level: &str, json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli.log_level, cli.json_logs);

    // Generate session correlation ID
    let correlation_id = generate_correlation_id();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        correlation_id = %correlation_id,
        "Starting Weather Ingestion Service"
    );

    // Load configuration
    let config = Config::load()?;
    config.validate()?;

    info!(
        max_concurrent = config.max_concurrent_requests,
        request_timeout_secs = config.request_timeout_secs,
        weatherbit = config.has_weatherbit(),
        "Configuration loaded"
    );

    let outcome = match cli.command {
        Commands::Ingest { dataset, run } => ingest(config, correlation_id, dataset, &run).await,
        Commands::Harvest { run } => harvest(config, correlation_id, &run).await,
        Commands::Query { prefix, output } => query(config, correlation_id, &prefix, &output).await,
        Commands::Migrate => migrate(&config).await,
    };

    if cli.print_metrics {
        print!("{}", metrics::gather_metrics());
    }

    outcome
}

/// Opens the configured store
async fn open_store(config: &Config, dry_run: bool) -> Result<Arc<dyn WeatherStore>> {
    if dry_run {
        info!("Dry run: using in-memory store");
        return Ok(Arc::new(MemoryStore::seeded()));
    }

    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is not set (use --dry-run for an in-memory store)")?;
    let store = PgWeatherStore::connect(url, config.database_max_connections).await?;
    Ok(Arc::new(store))
}

/// Runs one dataset from the command line
async fn ingest(config: Config, correlation_id: String, dataset: Dataset, run: &RunArgs) -> Result<()> {
    let store = open_store(&config, run.dry_run).await?;
    let harvester = Harvester::new(config, store, correlation_id)?;

    match harvester.run_dataset(dataset, &run.options()).await {
        Ok(report) => {
            print_reports(&[Ok(report)], &run.output)?;
            Ok(())
        }
        Err(failure) => {
            error!(error = %failure, "Ingestion failed");
            Err(failure.into())
        }
    }
}

/// Runs every dataset, then fails if any of them did
async fn harvest(config: Config, correlation_id: String, run: &RunArgs) -> Result<()> {
    let store = open_store(&config, run.dry_run).await?;
    let harvester = Harvester::new(config, store, correlation_id)?;

    let results = harvester.run_all(&run.options()).await;
    print_reports(&results, &run.output)?;

    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} datasets failed", results.len());
    }
    Ok(())
}

async fn query(config: Config, correlation_id: String, prefix: &str, output_format: &str) -> Result<()> {
    let store = open_store(&config, false).await?;
    let harvester = Harvester::new(config, store, correlation_id)?;
    let rows = harvester.query(prefix).await?;

    match output_format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        _ => {
            println!("\n{:<30} {:<10} {:<12} {:<26} {:>10}", "City", "Country", "Source", "Date", "Temp (K)");
            println!("{}", "-".repeat(92));
            for row in &rows {
                println!(
                    "{:<30} {:<10} {:<12} {:<26} {:>10.2}",
                    row.city,
                    row.country,
                    row.source,
                    row.date.to_rfc3339(),
                    row.temperature
                );
            }
            println!("\nTotal: {} observations", rows.len());
        }
    }

    Ok(())
}

async fn migrate(config: &Config) -> Result<()> {
    let url = config.database_url.as_deref().context("DATABASE_URL is not set")?;
    let store = PgWeatherStore::connect(url, config.database_max_connections).await?;
    store.migrate().await?;
    info!("Migrations applied");
    Ok(())
}

fn print_reports(results: &[std::result::Result<RunReport, RunFailure>], output_format: &str) -> Result<()> {
    if output_format == "json" {
        let reports: Vec<serde_json::Value> = results
            .iter()
            .map(|r| match r {
                Ok(report) => serde_json::json!({ "status": "completed", "report": report }),
                Err(failure) => serde_json::json!({
                    "status": "failed",
                    "dataset": failure.dataset,
                    "stage": failure.stage,
                    "error": failure.source.to_string(),
                }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    println!("\nIngestion Summary");
    println!("=================");
    for result in results {
        match result {
            Ok(r) => {
                println!("{} ({} ms)", r.dataset, r.elapsed_ms);
                println!("  Received:  {}", r.received);
                println!("  Processed: {}", r.processed);
                println!(
                    "  Skipped:   {} (invalid {}, fetch {}, store {})",
                    r.skipped(),
                    r.skipped_invalid,
                    r.fetch_failures,
                    r.store_failures
                );
                println!("  Cities created: {}", r.cities_created);
                println!(
                    "  Observations: {} created, {} updated, {} unchanged, {} already stored",
                    r.observations_created, r.observations_updated, r.observations_unchanged, r.observations_existing
                );
            }
            Err(failure) => {
                println!("{}: FAILED while {}", failure.dataset, failure.stage);
                println!("  {}", failure.source);
            }
        }
    }

    Ok(())
}
