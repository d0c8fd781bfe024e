//! In-memory LRU cache for resolved datasets.
//!
//! Sits in front of the `datasets` namespace so repeated requests on the
//! same (source, variable) skip decoding the Zarr artifact. Datasets are
//! shared as `Arc<RawDataset>`.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::RwLock;

use climate_common::CacheKey;
use grid_processor::RawDataset;

/// Statistics for the dataset memory cache
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct MemoryCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    /// Approximate bytes held by cached datasets.
    pub bytes: usize,
}

impl MemoryCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// LRU of datasets keyed by their dataset cache key.
///
/// A capacity of 0 disables the cache: lookups always miss and inserts
/// are dropped.
pub struct DatasetMemoryCache {
    cache: Arc<RwLock<LruCache<CacheKey, Arc<RawDataset>>>>,
    stats: Arc<RwLock<MemoryCacheStats>>,
    capacity: usize,
}

impl DatasetMemoryCache {
    pub fn new(capacity: usize) -> Self {
        let cache_size = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            cache: Arc::new(RwLock::new(LruCache::new(cache_size))),
            stats: Arc::new(RwLock::new(MemoryCacheStats::default())),
            capacity,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    /// Returns None on a miss; the caller loads and inserts.
    pub async fn get(&self, key: &CacheKey) -> Option<Arc<RawDataset>> {
        if !self.is_enabled() {
            return None;
        }

        let mut cache = self.cache.write().await;
        let found = cache.get(key).cloned();

        let mut stats = self.stats.write().await;
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        found
    }

    pub async fn insert(&self, key: CacheKey, dataset: Arc<RawDataset>) {
        if !self.is_enabled() {
            return;
        }

        let mut cache = self.cache.write().await;
        cache.put(key, dataset);

        let mut stats = self.stats.write().await;
        stats.entries = cache.len();
        stats.bytes = cache.iter().map(|(_, ds)| ds.memory_size()).sum();
    }

    /// Drop one entry, e.g. after the on-disk artifact was found corrupt.
    pub async fn invalidate(&self, key: &CacheKey) {
        let mut cache = self.cache.write().await;
        if cache.pop(key).is_some() {
            let mut stats = self.stats.write().await;
            stats.entries = cache.len();
            stats.bytes = cache.iter().map(|(_, ds)| ds.memory_size()).sum();
        }
    }

    pub async fn stats(&self) -> MemoryCacheStats {
        let cache = self.cache.read().await;
        let mut stats = self.stats.write().await;
        stats.entries = cache.len();
        stats.clone()
    }

    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();

        let mut stats = self.stats.write().await;
        *stats = MemoryCacheStats::default();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(value: f32) -> Arc<RawDataset> {
        Arc::new(RawDataset {
            source_id: "ERA5".to_string(),
            variable_id: "t2m".to_string(),
            variable_key: "t2m".to_string(),
            units: "K".to_string(),
            long_name: String::new(),
            times: Vec::new(),
            latitudes: vec![0.0],
            longitudes: vec![0.0],
            data: vec![value],
        })
    }

    #[tokio::test]
    async fn test_cache_hit_miss() {
        let cache = DatasetMemoryCache::new(10);
        let key = CacheKey::from_raw("kind-dataset_source-ERA5_variable-t2m");

        assert!(cache.get(&key).await.is_none());
        cache.insert(key.clone(), dataset(1.0)).await;
        assert_eq!(cache.get(&key).await.unwrap().data, vec![1.0]);

        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
        assert!(stats.bytes > 0);
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = DatasetMemoryCache::new(2);
        for i in 0..3 {
            cache
                .insert(CacheKey::from_raw(format!("key_{}", i)), dataset(i as f32))
                .await;
        }

        assert!(cache.get(&CacheKey::from_raw("key_0")).await.is_none());
        assert!(cache.get(&CacheKey::from_raw("key_1")).await.is_some());
        assert!(cache.get(&CacheKey::from_raw("key_2")).await.is_some());
    }

    #[tokio::test]
    async fn test_disabled_cache() {
        let cache = DatasetMemoryCache::new(0);
        let key = CacheKey::from_raw("k");
        cache.insert(key.clone(), dataset(1.0)).await;
        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = DatasetMemoryCache::new(4);
        let key = CacheKey::from_raw("k");
        cache.insert(key.clone(), dataset(1.0)).await;
        cache.invalidate(&key).await;
        assert!(cache.get(&key).await.is_none());

        cache.insert(key.clone(), dataset(2.0)).await;
        cache.clear().await;
        let stats = cache.stats().await;
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.hits, 0);
    }
}
