//! Common types shared across the climate explorer crates.

pub mod bbox;
pub mod error;
pub mod key;
pub mod request;
pub mod time;

pub use bbox::BoundingBox;
pub use error::{ErrorAudience, ExplorerError, ExplorerResult};
pub use key::CacheKey;
pub use request::{
    Aggregation, ExploreRequest, ReductionMethod, RequestDescriptor, RequestKind, Selection,
};
pub use time::{CfTimeUnits, DateRange};
