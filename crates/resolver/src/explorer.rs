//! The explorer pipeline: request in, layer + series + summary out.

use std::sync::Arc;

use chrono::NaiveDateTime;
use climate_common::{
    Aggregation, DateRange, ExploreRequest, ExplorerResult, RequestDescriptor, RequestKind,
};
use grid_processor::{Aggregator, Layer, Series, Summary};
use serde::Serialize;
use storage::{
    ArtifactCache, DatasetCatalog, DatasetDescriptor, DatasetMemoryCache, MemoryCacheStats,
    RequestRecord,
};
use tracing::{info, warn};

use crate::cached::{CachedStore, Resolution};
use crate::config::ExplorerConfig;
use crate::dataset::{DatasetResolver, ResolvedDataset};
use crate::inflight::KeyLocks;
use crate::layer::{select, LayerResolver};
use crate::metrics::ResolverMetrics;
use crate::series::SeriesResolver;

/// How each artifact of an exploration was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolutionReport {
    pub dataset: Resolution,
    pub layer: Resolution,
    pub series: Resolution,
}

impl ResolutionReport {
    pub fn all_hits(&self) -> bool {
        self.dataset.is_hit() && self.layer.is_hit() && self.series.is_hit()
    }
}

/// Everything the presentation layer needs for one selection.
#[derive(Debug, Clone, Serialize)]
pub struct Exploration {
    /// The request as resolved, with catalog names.
    pub request: RequestDescriptor,
    pub units: String,
    pub long_name: String,
    pub layer: Layer,
    pub series: Series,
    pub summary: Summary,
    pub report: ResolutionReport,
}

/// Time series at the grid point nearest to a location.
#[derive(Debug, Clone, Serialize)]
pub struct PointSeries {
    pub source_id: String,
    pub variable_id: String,
    pub units: String,
    /// Requested location.
    pub latitude: f64,
    pub longitude: f64,
    pub series: Series,
}

/// First and last time step of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateBounds {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub n_times: usize,
}

/// Resolves explorer requests through the cache.
pub struct Explorer {
    catalog: Arc<dyn DatasetCatalog>,
    datasets: DatasetResolver,
    layers: LayerResolver,
    series: SeriesResolver,
    store: CachedStore,
    memory: Arc<DatasetMemoryCache>,
    aggregator: Aggregator,
    metrics: Arc<ResolverMetrics>,
}

impl Explorer {
    pub fn new(catalog: Arc<dyn DatasetCatalog>, config: &ExplorerConfig) -> Self {
        let cache = ArtifactCache::with_codec(&config.cache_dir, config.codec.clone());
        Self::with_cache(catalog, cache, config)
    }

    /// Build on an existing artifact cache (tests point it at odd places).
    pub fn with_cache(catalog: Arc<dyn DatasetCatalog>, cache: ArtifactCache, config: &ExplorerConfig) -> Self {
        let metrics = Arc::new(ResolverMetrics::new());
        let locks = Arc::new(KeyLocks::new(config.single_flight));
        let store = CachedStore::new(cache, locks, metrics.clone());
        let memory = Arc::new(DatasetMemoryCache::new(config.memory_cache_entries));
        let aggregator = Aggregator::new();

        Self {
            datasets: DatasetResolver::new(catalog.clone(), store.clone(), memory.clone()),
            layers: LayerResolver::new(store.clone(), aggregator.clone()),
            series: SeriesResolver::new(store.clone(), aggregator.clone()),
            catalog,
            store,
            memory,
            aggregator,
            metrics,
        }
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn metrics(&self) -> &ResolverMetrics {
        &self.metrics
    }

    pub fn cache(&self) -> &ArtifactCache {
        self.store.cache()
    }

    pub async fn memory_stats(&self) -> MemoryCacheStats {
        self.memory.stats().await
    }

    pub async fn available_datasets(&self) -> ExplorerResult<Vec<DatasetDescriptor>> {
        self.catalog.get_available_datasets().await
    }

    /// Validate a UI request and explore it.
    ///
    /// Invalid input is rejected here and never reaches a resolver.
    pub async fn explore(&self, request: &ExploreRequest) -> ExplorerResult<Exploration> {
        let descriptor = match request.validate() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                self.record(&RequestRecord::rejected(request)).await;
                return Err(e);
            }
        };
        self.record(&RequestRecord::accepted(&descriptor)).await;
        self.explore_descriptor(&descriptor).await
    }

    /// Resolve dataset, layer and series for a validated request.
    pub async fn explore_descriptor(&self, request: &RequestDescriptor) -> ExplorerResult<Exploration> {
        self.metrics.record_exploration();

        let ResolvedDataset {
            dataset,
            descriptor,
            resolution: dataset_resolution,
        } = self.datasets.resolve(request).await?;

        let mut request = request.with_kind(RequestKind::Layer);
        request.source_id = descriptor.source_id.clone();
        request.variable_id = descriptor.variable_id.clone();

        let layer = self.layers.resolve(&dataset, &request).await?;
        let series = self.series.resolve(&dataset, &request).await?;

        let report = ResolutionReport {
            dataset: dataset_resolution,
            layer: layer.resolution,
            series: series.resolution,
        };
        info!(
            source = %request.source_id,
            variable = %request.variable_id,
            start = %request.start_date,
            end = %request.end_date,
            aggregation = %request.aggregation,
            dataset = ?report.dataset,
            layer = ?report.layer,
            series = ?report.series,
            "Exploration resolved"
        );

        Ok(Exploration {
            units: dataset.units.clone(),
            long_name: dataset.long_name.clone(),
            summary: layer.value.summary,
            layer: layer.value,
            series: series.value,
            request,
            report,
        })
    }

    /// Series at the grid point nearest to (lat, lon). Not cached.
    pub async fn point_series(
        &self,
        source_id: &str,
        variable_id: &str,
        latitude: f64,
        longitude: f64,
        range: Option<DateRange>,
    ) -> ExplorerResult<PointSeries> {
        let resolved = self.datasets.resolve_ids(source_id, variable_id).await?;

        let series = match range {
            Some(range) => {
                let request = RequestDescriptor::new(
                    resolved.descriptor.source_id.as_str(),
                    resolved.descriptor.variable_id.as_str(),
                    range,
                    Aggregation::Mean,
                    RequestKind::Series,
                );
                let selected = select(&self.aggregator, &resolved.dataset, &request)?;
                self.aggregator.point_series(&selected, latitude, longitude)?
            }
            None => self
                .aggregator
                .point_series(&resolved.dataset, latitude, longitude)?,
        };

        Ok(PointSeries {
            source_id: resolved.descriptor.source_id,
            variable_id: resolved.descriptor.variable_id,
            units: resolved.dataset.units.clone(),
            latitude,
            longitude,
            series,
        })
    }

    /// Time coverage of a dataset, for bounding date pickers.
    pub async fn date_bounds(&self, source_id: &str, variable_id: &str) -> ExplorerResult<Option<DateBounds>> {
        let resolved = self.datasets.resolve_ids(source_id, variable_id).await?;
        Ok(resolved.dataset.time_bounds().map(|(start, end)| DateBounds {
            start,
            end,
            n_times: resolved.dataset.n_times(),
        }))
    }

    async fn record(&self, record: &RequestRecord) {
        if let Err(e) = self.catalog.record_request(record).await {
            warn!(error = %e, "Failed to log request");
        }
    }
}
