//! Persistence for the climate explorer.
//!
//! This crate provides:
//! - Dataset catalog and request log (SQLite), plus a static YAML catalog
//! - On-disk artifact cache for datasets, layers and series
//! - In-memory LRU of resolved datasets

pub mod artifact_cache;
pub mod catalog;
pub mod memory_cache;
pub mod series_csv;

pub use artifact_cache::{
    Artifact, ArtifactCache, CacheEntry, CacheStats, EvictionPolicy, Namespace, NamespaceStats,
    PruneReport,
};
pub use catalog::{
    Catalog, DatasetCatalog, DatasetDescriptor, RequestHistoryEntry, RequestRecord, StaticCatalog,
};
pub use memory_cache::{DatasetMemoryCache, MemoryCacheStats};
