//! Climate explorer command-line front end.
//!
//! Administers the dataset catalog, runs explorations through the cache
//! and maintains the artifact cache.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};
use climate_common::{ErrorAudience, ExplorerError};
use resolver::ExplorerConfig;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "climate-explorer")]
#[command(about = "Explore cached climate layers and time series")]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "EXPLORER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the catalog database schema
    InitDb,

    /// Load a YAML catalog into the database
    ImportCatalog {
        /// YAML file with a `datasets` list
        file: PathBuf,
    },

    /// List available datasets
    Datasets,

    /// Resolve a layer, series and summary for a selection
    Explore(ExploreArgs),

    /// Time series at the grid point nearest to a location
    Point(PointArgs),

    /// Show the request log
    History {
        /// Maximum number of rows
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Artifact cache maintenance
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(ClapArgs, Debug)]
struct ExploreArgs {
    /// Source name or catalog id
    #[arg(long)]
    source: String,

    /// Variable name or catalog id
    #[arg(long)]
    variable: String,

    /// First day (YYYY-MM-DD)
    #[arg(long)]
    start: String,

    /// Last day (YYYY-MM-DD), inclusive
    #[arg(long)]
    end: String,

    /// mean or sum
    #[arg(long, default_value = "mean")]
    aggregation: String,

    /// Region as min_lon,min_lat,max_lon,max_lat
    #[arg(long, allow_hyphen_values = true)]
    bbox: Option<String>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(ClapArgs, Debug)]
struct PointArgs {
    #[arg(long)]
    source: String,

    #[arg(long)]
    variable: String,

    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    #[arg(long, allow_hyphen_values = true)]
    lon: f64,

    /// Restrict to days from this date
    #[arg(long, requires = "end")]
    start: Option<String>,

    /// Restrict to days up to this date
    #[arg(long, requires = "start")]
    end: Option<String>,

    #[arg(long)]
    pretty: bool,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Entry counts and sizes per namespace
    Stats,

    /// Remove old entries and shrink the cache below a size limit
    Prune {
        /// Size limit in bytes (overrides configuration)
        #[arg(long)]
        max_bytes: Option<u64>,

        /// Maximum entry age in hours (overrides configuration)
        #[arg(long)]
        max_age_hours: Option<u64>,
    },
}

fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    // stdout carries command output
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<ExplorerConfig> {
    let config = match path {
        Some(path) => ExplorerConfig::from_yaml(path)?,
        None => ExplorerConfig::from_env(),
    };
    config.validate()?;
    Ok(config)
}

/// Print an error for whoever has to act on it.
fn report(err: &anyhow::Error) {
    match err.downcast_ref::<ExplorerError>() {
        Some(e) if e.audience() == ErrorAudience::User => {
            eprintln!("{}", e.user_message());
        }
        Some(e) => {
            error!(error = %e, "Command failed");
            eprintln!("{}", e.user_message());
        }
        None => {
            error!(error = %err, "Command failed");
            eprintln!("Error: {:#}", err);
        }
    }
}

#[tokio::main]
async fn main() {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    if let Err(e) = init_tracing(&args.log_level, args.log_json) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let result = match load_config(args.config.as_ref()) {
        Ok(config) => commands::run(args.command, &config).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        report(&e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_explore() {
        let args = Args::try_parse_from([
            "climate-explorer",
            "explore",
            "--source",
            "ERA5",
            "--variable",
            "t2m",
            "--start",
            "2020-01-01",
            "--end",
            "2020-01-31",
            "--bbox",
            "-4,41,-3,42",
        ])
        .unwrap();

        match args.command {
            Command::Explore(explore) => {
                assert_eq!(explore.aggregation, "mean");
                assert_eq!(explore.bbox.as_deref(), Some("-4,41,-3,42"));
                assert!(!explore.pretty);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_negative_point() {
        let args = Args::try_parse_from([
            "climate-explorer",
            "point",
            "--source",
            "ERA5",
            "--variable",
            "t2m",
            "--lat",
            "41.2",
            "--lon",
            "-2.9",
        ])
        .unwrap();

        match args.command {
            Command::Point(point) => assert_eq!(point.lon, -2.9),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_cache_prune() {
        let args = Args::try_parse_from([
            "climate-explorer",
            "--log-json",
            "cache",
            "prune",
            "--max-bytes",
            "1000",
        ])
        .unwrap();

        assert!(args.log_json);
        match args.command {
            Command::Cache(CacheCommand::Prune {
                max_bytes,
                max_age_hours,
            }) => {
                assert_eq!(max_bytes, Some(1000));
                assert_eq!(max_age_hours, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_point_range_needs_both_ends() {
        let result = Args::try_parse_from([
            "climate-explorer",
            "point",
            "--source",
            "ERA5",
            "--variable",
            "t2m",
            "--lat",
            "41",
            "--lon",
            "-3",
            "--start",
            "2020-01-01",
        ]);
        assert!(result.is_err());
    }
}
