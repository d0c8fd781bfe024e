//! Climate grid processing.
//!
//! This crate holds the in-memory model of a climate variable and
//! everything that operates on it without caching:
//!
//! - **Sources**: read raw Zarr V3 stores, normalize coordinate names and
//!   concatenate along time ([`source`])
//! - **Aggregation**: time/space restriction and NaN-skipping reductions
//!   ([`aggregate`])
//! - **Artifacts**: Zarr encoding of datasets and layers ([`ZarrWriter`],
//!   [`reader`])
//!
//! # Architecture
//!
//! ```text
//! raw stores ──► source::load_dataset ──► RawDataset
//!                                            │
//!                 aggregate::restrict_time ◄─┤
//!                            │               │
//!             ┌──────────────┴─────┐         └──► ZarrWriter / reader
//!             ▼                    ▼
//!      reduce_time (Layer)   reduce_space (Series)
//! ```

pub mod aggregate;
pub mod config;
pub mod reader;
pub mod source;
pub mod types;
pub mod writer;

// Re-export commonly used types at crate root
pub use aggregate::Aggregator;
pub use config::{CodecConfig, ZarrCompression};
pub use source::{CoordinateKeys, SourceLayout};
pub use types::{Layer, RawDataset, Series, SeriesPoint, Summary};
pub use writer::{ZarrWriteResult, ZarrWriter};
