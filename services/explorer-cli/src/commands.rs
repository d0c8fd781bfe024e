//! Subcommand implementations.

use std::sync::Arc;

use anyhow::{Context, Result};
use climate_common::time::parse_date;
use climate_common::{BoundingBox, DateRange, ExploreRequest};
use resolver::{Explorer, ExplorerConfig};
use serde::Serialize;
use storage::{ArtifactCache, Catalog, DatasetCatalog, EvictionPolicy, StaticCatalog};
use tracing::info;

use crate::{CacheCommand, Command, ExploreArgs, PointArgs};

pub async fn run(command: Command, config: &ExplorerConfig) -> Result<()> {
    match command {
        Command::InitDb => init_db(config).await,
        Command::ImportCatalog { file } => import_catalog(config, &file).await,
        Command::Datasets => datasets(config).await,
        Command::Explore(args) => explore(config, args).await,
        Command::Point(args) => point(config, args).await,
        Command::History { limit } => history(config, limit).await,
        Command::Cache(CacheCommand::Stats) => cache_stats(config),
        Command::Cache(CacheCommand::Prune {
            max_bytes,
            max_age_hours,
        }) => cache_prune(config, max_bytes, max_age_hours),
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", out);
    Ok(())
}

async fn open_database(config: &ExplorerConfig) -> Result<Catalog> {
    let catalog = Catalog::connect(&config.database_path).await?;
    catalog.migrate().await?;
    Ok(catalog)
}

/// The YAML catalog when one is configured, the database otherwise.
async fn open_catalog(config: &ExplorerConfig) -> Result<Arc<dyn DatasetCatalog>> {
    match &config.catalog_file {
        Some(path) => Ok(Arc::new(StaticCatalog::from_yaml(path)?)),
        None => Ok(Arc::new(open_database(config).await?)),
    }
}

async fn init_db(config: &ExplorerConfig) -> Result<()> {
    open_database(config).await?;
    println!("Catalog ready at {}", config.database_path.display());
    Ok(())
}

async fn import_catalog(config: &ExplorerConfig, file: &std::path::Path) -> Result<()> {
    let source = StaticCatalog::from_yaml(file)
        .with_context(|| format!("reading catalog {}", file.display()))?;
    let catalog = open_database(config).await?;

    for desc in &source.datasets {
        let id = catalog.register_dataset(desc).await?;
        info!(id, source = %desc.source_id, variable = %desc.variable_id, "Imported dataset");
    }

    println!(
        "Imported {} datasets into {}",
        source.datasets.len(),
        config.database_path.display()
    );
    Ok(())
}

async fn datasets(config: &ExplorerConfig) -> Result<()> {
    let catalog = open_catalog(config).await?;
    for desc in catalog.get_available_datasets().await? {
        println!(
            "{}\t{}\t{}\t{}",
            desc.source_id,
            desc.variable_id,
            desc.units,
            desc.path.display()
        );
    }
    Ok(())
}

async fn explore(config: &ExplorerConfig, args: ExploreArgs) -> Result<()> {
    let region = args.bbox.as_deref().map(BoundingBox::parse).transpose()?;
    let request = ExploreRequest {
        source_id: args.source,
        variable_id: args.variable,
        start_date: args.start,
        end_date: args.end,
        aggregation: args.aggregation,
        region,
    };

    let explorer = Explorer::new(open_catalog(config).await?, config);
    let exploration = explorer.explore(&request).await?;
    print_json(&exploration, args.pretty)
}

async fn point(config: &ExplorerConfig, args: PointArgs) -> Result<()> {
    let range = match (&args.start, &args.end) {
        (Some(start), Some(end)) => Some(DateRange::new(parse_date(start)?, parse_date(end)?)?),
        _ => None,
    };

    let explorer = Explorer::new(open_catalog(config).await?, config);
    let series = explorer
        .point_series(&args.source, &args.variable, args.lat, args.lon, range)
        .await?;
    print_json(&series, args.pretty)
}

async fn history(config: &ExplorerConfig, limit: u32) -> Result<()> {
    let catalog = open_database(config).await?;
    for entry in catalog.request_history(limit).await? {
        println!(
            "{}\t{}\t{}\t{}..{}\t{}\t{}\tx{}\t{}",
            entry.last_executed_at.as_deref().unwrap_or("-"),
            entry.source,
            entry.variable,
            entry.start_date,
            entry.end_date,
            entry.aggregation,
            if entry.region.is_empty() { "-" } else { entry.region.as_str() },
            entry.n_request,
            if entry.valid_request { "ok" } else { "rejected" },
        );
    }
    Ok(())
}

fn cache_stats(config: &ExplorerConfig) -> Result<()> {
    let cache = ArtifactCache::new(&config.cache_dir);
    let stats = cache.stats()?;
    println!("{:<10} {:>8} {:>14}", "namespace", "entries", "bytes");
    for (name, ns) in [
        ("datasets", &stats.datasets),
        ("layers", &stats.layers),
        ("series", &stats.series),
    ] {
        println!("{:<10} {:>8} {:>14}", name, ns.entries, ns.bytes);
    }
    println!("{:<10} {:>8} {:>14}", "total", stats.total_entries(), stats.total_bytes());
    Ok(())
}

fn cache_prune(config: &ExplorerConfig, max_bytes: Option<u64>, max_age_hours: Option<u64>) -> Result<()> {
    let policy = EvictionPolicy {
        max_bytes: max_bytes.or(config.eviction.max_bytes),
        max_age_hours: max_age_hours.or(config.eviction.max_age_hours),
    };
    if policy.is_unbounded() {
        anyhow::bail!("no eviction limit configured; pass --max-bytes or --max-age-hours");
    }

    let cache = ArtifactCache::new(&config.cache_dir);
    let report = cache.prune(&policy)?;
    println!(
        "Removed {} entries ({} bytes); {} entries ({} bytes) remain",
        report.removed, report.freed_bytes, report.remaining_entries, report.remaining_bytes
    );
    Ok(())
}
