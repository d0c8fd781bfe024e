//! Dataset resolution: catalog lookup, raw source loading, caching.

use std::sync::Arc;
use std::time::Instant;

use climate_common::{CacheKey, ExplorerError, ExplorerResult, RequestDescriptor};
use grid_processor::source::load_dataset;
use grid_processor::RawDataset;
use storage::{DatasetCatalog, DatasetDescriptor, DatasetMemoryCache, Namespace};
use tracing::{debug, info};

use crate::cached::{CachedStore, Resolution};

/// A resolved dataset with its catalog entry.
#[derive(Debug, Clone)]
pub struct ResolvedDataset {
    pub dataset: Arc<RawDataset>,
    pub descriptor: DatasetDescriptor,
    pub resolution: Resolution,
}

pub struct DatasetResolver {
    catalog: Arc<dyn DatasetCatalog>,
    store: CachedStore,
    memory: Arc<DatasetMemoryCache>,
}

impl DatasetResolver {
    pub fn new(
        catalog: Arc<dyn DatasetCatalog>,
        store: CachedStore,
        memory: Arc<DatasetMemoryCache>,
    ) -> Self {
        Self {
            catalog,
            store,
            memory,
        }
    }

    /// Catalog entry for (source, variable), if it is available.
    pub async fn descriptor(&self, source_id: &str, variable_id: &str) -> ExplorerResult<DatasetDescriptor> {
        match self.catalog.lookup(source_id, variable_id).await? {
            Some(desc) if desc.available => Ok(desc),
            _ => Err(ExplorerError::UnknownDataset {
                source_id: source_id.to_string(),
                variable_id: variable_id.to_string(),
            }),
        }
    }

    /// Resolve the raw dataset a request refers to.
    pub async fn resolve(&self, request: &RequestDescriptor) -> ExplorerResult<ResolvedDataset> {
        self.resolve_ids(&request.source_id, &request.variable_id).await
    }

    pub async fn resolve_ids(&self, source_id: &str, variable_id: &str) -> ExplorerResult<ResolvedDataset> {
        let descriptor = self.descriptor(source_id, variable_id).await?;
        // keyed by catalog names, so numeric ids share entries with names
        let key = CacheKey::dataset(&descriptor.source_id, &descriptor.variable_id);

        if let Some(dataset) = self.memory.get(&key).await {
            self.store.metrics().record_hit(Namespace::Datasets);
            debug!(key = %key, "Dataset served from memory");
            return Ok(ResolvedDataset {
                dataset,
                descriptor,
                resolution: Resolution::Hit,
            });
        }

        let resolved = self
            .store
            .get_or_compute(&key, || {
                let started = Instant::now();
                let ds = load_dataset(&descriptor.source_id, &descriptor.variable_id, &descriptor.layout())?;
                info!(
                    source = %descriptor.source_id,
                    variable = %descriptor.variable_id,
                    n_times = ds.n_times(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Loaded raw dataset"
                );
                Ok(with_catalog_metadata(ds, &descriptor))
            })
            .await?;

        let dataset = Arc::new(resolved.value);
        self.memory.insert(key, dataset.clone()).await;

        Ok(ResolvedDataset {
            dataset,
            descriptor,
            resolution: resolved.resolution,
        })
    }
}

/// Fill units and name from the catalog when the raw stores lack them.
fn with_catalog_metadata(mut ds: RawDataset, desc: &DatasetDescriptor) -> RawDataset {
    if ds.units.is_empty() {
        ds.units = desc.units.clone();
    }
    if !desc.long_name.is_empty() && ds.long_name == ds.variable_key {
        ds.long_name = desc.long_name.clone();
    }
    ds
}
