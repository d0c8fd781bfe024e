//! Shared check-compute-store flow for all three artifact kinds.

use std::sync::Arc;

use climate_common::{CacheKey, ExplorerError, ExplorerResult};
use serde::Serialize;
use storage::{Artifact, ArtifactCache};
use tracing::{debug, warn};

use crate::inflight::KeyLocks;
use crate::metrics::ResolverMetrics;

/// How an artifact was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Loaded from the cache (disk or memory).
    Hit,
    /// Computed and stored.
    Computed,
    /// Computed, but storing it failed.
    ComputedNotCached,
}

impl Resolution {
    pub fn is_hit(&self) -> bool {
        matches!(self, Resolution::Hit)
    }
}

/// A resolved artifact and how it was obtained.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub value: T,
    pub resolution: Resolution,
}

/// The artifact cache together with locking and accounting.
#[derive(Debug, Clone)]
pub struct CachedStore {
    cache: ArtifactCache,
    locks: Arc<KeyLocks>,
    metrics: Arc<ResolverMetrics>,
}

impl CachedStore {
    pub fn new(cache: ArtifactCache, locks: Arc<KeyLocks>, metrics: Arc<ResolverMetrics>) -> Self {
        Self {
            cache,
            locks,
            metrics,
        }
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn metrics(&self) -> &ResolverMetrics {
        &self.metrics
    }

    /// Cached artifact for `key`, if one can be read.
    ///
    /// Corrupt entries and read failures count as misses; the entry will
    /// be overwritten by the recomputed artifact.
    pub fn try_load<A: Artifact>(&self, key: &CacheKey) -> Option<A> {
        let ns = A::NAMESPACE;
        match self.cache.load::<A>(key) {
            Ok(artifact) => {
                self.metrics.record_hit(ns);
                debug!(namespace = %ns, key = %key, "Cache hit");
                Some(artifact)
            }
            Err(ExplorerError::CacheMiss { .. }) => None,
            Err(e @ ExplorerError::CorruptArtifact { .. }) => {
                self.metrics.record_corrupt(ns);
                warn!(namespace = %ns, key = %key, error = %e, "Corrupt cached artifact, recomputing");
                None
            }
            Err(e) => {
                warn!(namespace = %ns, key = %key, error = %e, "Cache read failed, recomputing");
                None
            }
        }
    }

    /// Return the cached artifact for `key` or compute and store it.
    ///
    /// A failed store does not fail the call: the computed artifact is
    /// returned as `ComputedNotCached`.
    pub async fn get_or_compute<A, F>(&self, key: &CacheKey, compute: F) -> ExplorerResult<Resolved<A>>
    where
        A: Artifact,
        F: FnOnce() -> ExplorerResult<A>,
    {
        if let Some(value) = self.try_load::<A>(key) {
            return Ok(Resolved {
                value,
                resolution: Resolution::Hit,
            });
        }

        let guard = self.locks.acquire(key).await;
        if guard.is_some() {
            // someone else may have finished while we waited
            if let Some(value) = self.try_load::<A>(key) {
                return Ok(Resolved {
                    value,
                    resolution: Resolution::Hit,
                });
            }
        }

        let ns = A::NAMESPACE;
        self.metrics.record_miss(ns);
        debug!(namespace = %ns, key = %key, "Cache miss, computing");

        let value = compute()?;
        let resolution = self.store(key, &value);
        drop(guard);
        Ok(Resolved { value, resolution })
    }

    /// Store a computed artifact, logging (not propagating) failures.
    pub fn store<A: Artifact>(&self, key: &CacheKey, value: &A) -> Resolution {
        let ns = A::NAMESPACE;
        match self.cache.store(key, value) {
            Ok(_) => Resolution::Computed,
            Err(e) => {
                self.metrics.record_store_failure(ns);
                warn!(
                    namespace = %ns,
                    key = %key,
                    error = %e,
                    "Failed to cache artifact, returning uncached result"
                );
                Resolution::ComputedNotCached
            }
        }
    }
}
