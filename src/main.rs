//! CLI entry point for the road safety report generator.
//!
//! Fetches the road segments and infographics query results, builds the
//! segment and road safety tables and writes them as CSV.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use road_safety_report::config::Config;
use road_safety_report::fetch::BasicClient;
use road_safety_report::pipeline::{self, RunReport};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "road_safety_report")]
#[command(about = "Builds road segment safety reports from accident statistics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch both sources and write the four report tables
    Run {
        /// Directory for the CSV tables (overrides REPORT_OUTPUT_DIR)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Per-request timeout in seconds (overrides FETCH_TIMEOUT_SECS)
        #[arg(short, long)]
        timeout_secs: Option<u64>,

        /// Retries for transient HTTP failures (overrides FETCH_RETRIES)
        #[arg(short, long)]
        retries: Option<u32>,

        /// Length threshold for the "1 km and above" tables (overrides REPORT_MIN_LENGTH_KM)
        #[arg(short, long)]
        min_length_km: Option<f64>,

        /// Also bundle the tables into a .tar.gz archive
        #[arg(short, long, default_value_t = false)]
        archive: bool,

        /// Number of top ranked roads to log
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Validate configuration without fetching anything
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/road_safety_report.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("road_safety_report.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(env_filter("RUST_LOG", "info")?);

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(env_filter("RUST_LOG_JSON", "debug")?);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            output_dir,
            timeout_secs,
            retries,
            min_length_km,
            archive,
            top,
        } => {
            let mut config = Config::from_env()?;
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            if let Some(secs) = timeout_secs {
                config.set_timeout_secs(secs)?;
            }
            if let Some(retries) = retries {
                config.fetch.retries = retries;
            }
            if let Some(km) = min_length_km {
                config.set_min_length_km(km)?;
            }
            config.archive |= archive;

            let client = BasicClient::with_timeout(config.fetch.timeout)
                .context("Failed to build HTTP client")?;
            let report = pipeline::run(&config, &client).await?;
            log_report(&report, top);
        }
        Commands::CheckConfig => {
            let config = Config::from_env()?;
            info!(
                segments_url = %config.segments_url,
                infographics_url = %config.infographics_url,
                output_dir = %config.output_dir.display(),
                timeout_secs = config.fetch.timeout.as_secs(),
                retries = config.fetch.retries,
                min_length_km = config.min_length_km,
                "Configuration OK"
            );
        }
    }

    Ok(())
}

fn env_filter(var: &str, default: &str) -> Result<EnvFilter> {
    Ok(EnvFilter::from_env(var).add_directive(default.parse()?))
}

/// Logs table sizes, the data period and the highest ranked roads.
fn log_report(report: &RunReport, top: usize) {
    let tables = &report.tables;
    let meta = &tables.metadata;

    info!(
        segments = tables.all_segments.len(),
        segments_over_threshold = tables.segments_over_threshold.len(),
        roads = tables.all_roads.len(),
        roads_over_threshold = tables.roads_over_threshold.len(),
        "Report summary"
    );
    info!(summary = ?report.summary, "Row accounting");

    match meta.year_span() {
        Some((first, last)) => info!(first, last, "Data range"),
        None => info!("Data range not available"),
    }
    match meta.last_update_label() {
        Some(date) => info!(%date, "Last updated"),
        None => info!("Last update not available"),
    }

    for (rank, road) in tables.all_roads.iter().take(top).enumerate() {
        info!(
            rank = rank + 1,
            road = %road.road,
            from = %road.from_name,
            to = %road.to_name,
            km = road.length_km,
            fatal_severe_per_km = road.metrics.fatal_severe_accidents_per_km,
            fatal_per_km = road.metrics.fatal_accidents_per_km,
            "Road"
        );
    }

    for path in &report.files {
        info!(path = %path.display(), "Table written");
    }
    if let Some(archive) = &report.archive {
        info!(path = %archive.display(), "Archive written");
    }
}
