//! Writers for cached artifacts.

mod zarr_writer;

use sha2::{Digest, Sha256};

pub use zarr_writer::{ZarrWriteResult, ZarrWriter};

/// Digest of an array payload, stored next to it so a reader can tell a
/// complete array from one with missing or damaged chunks.
///
/// All NaN payloads hash alike since the fill value stands in for them.
pub(crate) fn values_checksum(values: &[f32]) -> String {
    let mut hasher = Sha256::new();
    for v in values {
        let bits = if v.is_nan() { f32::NAN.to_bits() } else { v.to_bits() };
        hasher.update(bits.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}
