//! Series resolution: spatially reduced time series.

use climate_common::{CacheKey, ExplorerResult, RequestDescriptor, RequestKind};
use grid_processor::{Aggregator, RawDataset, Series};

use crate::cached::{CachedStore, Resolved};
use crate::layer::select;

pub struct SeriesResolver {
    store: CachedStore,
    aggregator: Aggregator,
}

impl SeriesResolver {
    pub fn new(store: CachedStore, aggregator: Aggregator) -> Self {
        Self { store, aggregator }
    }

    /// Resolve the series for `request` (its kind is ignored).
    ///
    /// The key differs from the layer's only in its kind.
    pub async fn resolve(&self, dataset: &RawDataset, request: &RequestDescriptor) -> ExplorerResult<Resolved<Series>> {
        let key = CacheKey::encode(&request.with_kind(RequestKind::Series));

        self.store
            .get_or_compute(&key, || {
                let selected = select(&self.aggregator, dataset, request)?;
                self.aggregator
                    .reduce_space(&selected, request.aggregation.into())
            })
            .await
    }
}
