//! Layer resolution: time-reduced 2D grids.

use climate_common::{CacheKey, ExplorerResult, RequestDescriptor, RequestKind};
use grid_processor::aggregate::ensure_not_empty;
use grid_processor::{Aggregator, Layer, RawDataset};

use crate::cached::{CachedStore, Resolved};

/// Restrict `ds` to the request's dates and region.
///
/// Fails with `EmptyRange` when no time step falls in the range.
pub(crate) fn select(
    aggregator: &Aggregator,
    ds: &RawDataset,
    request: &RequestDescriptor,
) -> ExplorerResult<RawDataset> {
    let range = request.date_range()?;
    let restricted = aggregator.restrict_time(ds, &range)?;
    ensure_not_empty(&restricted, &range)?;

    match &request.region {
        Some(region) => aggregator.restrict_space(&restricted, region),
        None => Ok(restricted),
    }
}

pub struct LayerResolver {
    store: CachedStore,
    aggregator: Aggregator,
}

impl LayerResolver {
    pub fn new(store: CachedStore, aggregator: Aggregator) -> Self {
        Self { store, aggregator }
    }

    /// Resolve the layer for `request` (its kind is ignored).
    pub async fn resolve(&self, dataset: &RawDataset, request: &RequestDescriptor) -> ExplorerResult<Resolved<Layer>> {
        let key = CacheKey::encode(&request.with_kind(RequestKind::Layer));

        self.store
            .get_or_compute(&key, || {
                let selected = select(&self.aggregator, dataset, request)?;
                self.aggregator
                    .reduce_time(&selected, request.aggregation.into())
            })
            .await
    }
}
