//! Request resolution for the climate explorer.
//!
//! Every artifact an exploration produces goes through the same flow:
//! check the cache, compute on a miss, store the result. Three resolvers
//! share that flow:
//!
//! - [`DatasetResolver`]: catalog lookup and raw source loading
//! - [`LayerResolver`]: time-reduced 2D grids
//! - [`SeriesResolver`]: spatially reduced time series
//!
//! [`Explorer`] ties them together behind request validation.
//!
//! # Architecture
//!
//! ```text
//! ExploreRequest ──validate──► RequestDescriptor
//!                                     │
//!                            DatasetResolver ──► datasets/
//!                                     │
//!                      ┌──────────────┴──────────────┐
//!                      ▼                             ▼
//!               LayerResolver ──► layers/    SeriesResolver ──► series/
//! ```

pub mod cached;
pub mod config;
pub mod dataset;
pub mod explorer;
pub mod inflight;
pub mod layer;
pub mod metrics;
pub mod series;

pub use cached::{CachedStore, Resolution, Resolved};
pub use config::ExplorerConfig;
pub use dataset::{DatasetResolver, ResolvedDataset};
pub use explorer::{DateBounds, Exploration, Explorer, PointSeries, ResolutionReport};
pub use inflight::KeyLocks;
pub use layer::LayerResolver;
pub use metrics::{MetricsSnapshot, NamespaceSnapshot, ResolverMetrics};
pub use series::SeriesResolver;
